//! What the ledger layer hands over alongside each block.
//!
//! The ingestion pipeline never derives any of this itself: deposits,
//! epoch-boundary snapshots, and the pool-membership set all come from the
//! ledger that validated the block.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::certs::DRep;
use crate::gov::GovActionId;
use crate::types::{Hash28, Hash32, Rational, StakeAddress};

/// Per-block output of the ledger.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ApplyResult {
    /// Resolved deposit per transaction hash; negative for net refunds.
    pub deposits: HashMap<Hash32, i64>,
    /// Present when this block is the first of a new epoch.
    pub new_epoch: Option<NewEpoch>,
    /// A slice of the stake distribution to persist with this block.
    pub stake_slice: Option<StakeSlice>,
    /// Pools already registered in the ledger state before this block.
    pub registered_pools: HashSet<Hash28>,
}

impl ApplyResult {
    pub fn deposit_for(&self, tx: &Hash32) -> Option<i64> {
        self.deposits.get(tx).copied()
    }

    pub fn is_pool_registered(&self, pool: &Hash28) -> bool {
        self.registered_pools.contains(pool)
    }
}

/// Protocol parameters in force for an epoch.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq,
    bincode::Encode, bincode::Decode,
)]
pub struct ProtocolParams {
    pub min_fee_a: u64,
    pub min_fee_b: u64,
    pub max_block_size: u64,
    pub max_tx_size: u64,
    pub max_bh_size: u64,
    pub key_deposit: u64,
    pub pool_deposit: u64,
    pub max_epoch: u64,
    pub optimal_pool_count: u64,
    pub influence: Rational,
    pub monetary_expand_rate: Rational,
    pub treasury_growth_rate: Rational,
    pub decentralisation: Rational,
    pub protocol_major: u16,
    pub protocol_minor: u16,
    pub min_utxo_value: u64,
    pub min_pool_cost: u64,
    #[serde(default)]
    pub coins_per_utxo_size: Option<u64>,
    #[serde(default)]
    pub price_mem: Option<Rational>,
    #[serde(default)]
    pub price_step: Option<Rational>,
    #[serde(default)]
    pub max_tx_ex_mem: Option<u64>,
    #[serde(default)]
    pub max_tx_ex_steps: Option<u64>,
    #[serde(default)]
    pub max_block_ex_mem: Option<u64>,
    #[serde(default)]
    pub max_block_ex_steps: Option<u64>,
    #[serde(default)]
    pub max_val_size: Option<u64>,
    #[serde(default)]
    pub collateral_percent: Option<u32>,
    #[serde(default)]
    pub max_collateral_inputs: Option<u32>,
    #[serde(default)]
    pub gov_action_lifetime: Option<u64>,
    #[serde(default)]
    pub gov_action_deposit: Option<u64>,
    #[serde(default)]
    pub drep_deposit: Option<u64>,
    #[serde(default)]
    pub drep_activity: Option<u64>,
    #[serde(default)]
    pub committee_min_size: Option<u64>,
    #[serde(default)]
    pub committee_max_term_length: Option<u64>,
}

/// Balances of the accounting pots at an epoch boundary.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct AdaPots {
    pub slot_no: u64,
    pub treasury: u64,
    pub reserves: u64,
    pub rewards: u64,
    pub utxo: u64,
    pub deposits_stake: u64,
    #[serde(default)]
    pub deposits_drep: u64,
    #[serde(default)]
    pub deposits_proposal: u64,
    pub fees: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DRepStake {
    pub drep: DRep,
    pub amount: u64,
    #[serde(default)]
    pub active_until: Option<u64>,
}

/// Governance outcomes decided at the boundary.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct EnactState {
    /// Actions ratified in the epoch that just ended.
    pub ratified: Vec<GovActionId>,
    /// The most recently enacted action per purpose. Earlier actions in
    /// the same chain are enacted implicitly.
    pub enacted: Vec<GovActionId>,
    pub dropped: Vec<GovActionId>,
    pub expired: Vec<GovActionId>,
}

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum RewardKind {
    Member,
    Leader,
    Reserves,
    Treasury,
    Refund,
    ProposalRefund,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RewardEntry {
    pub address: StakeAddress,
    pub kind: RewardKind,
    pub amount: u64,
    #[serde(default)]
    pub pool: Option<Hash28>,
    pub earned_epoch: u64,
    pub spendable_epoch: u64,
}

/// Epoch-boundary event. Each part is independently optional.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NewEpoch {
    /// The epoch being entered.
    pub epoch_no: u64,
    #[serde(default)]
    pub params: Option<ProtocolParams>,
    #[serde(default)]
    pub nonce: Option<Hash32>,
    #[serde(default)]
    pub ada_pots: Option<AdaPots>,
    #[serde(default)]
    pub drep_distr: Option<Vec<DRepStake>>,
    #[serde(default)]
    pub enact: Option<EnactState>,
    #[serde(default)]
    pub rewards: Vec<RewardEntry>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StakeEntry {
    pub address: StakeAddress,
    pub pool: Hash28,
    pub amount: u64,
}

/// Part of an epoch's stake distribution, spread over the first blocks of
/// the epoch.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct StakeSlice {
    pub epoch_no: u64,
    pub entries: Vec<StakeEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_result_json_defaults() {
        let res: ApplyResult = serde_json::from_str("{}").unwrap();
        assert!(res.deposits.is_empty());
        assert!(res.new_epoch.is_none());
    }

    #[test]
    fn deposits_keyed_by_hex_hash() {
        let json = format!(r#"{{"deposits":{{"{}":-2000000}}}}"#, "11".repeat(32));
        let res: ApplyResult = serde_json::from_str(&json).unwrap();
        assert_eq!(res.deposit_for(&Hash32([0x11; 32])), Some(-2_000_000));
        assert_eq!(res.deposit_for(&Hash32([0x12; 32])), None);
    }
}
