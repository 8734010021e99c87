//! Governance: proposals, votes, and the parameter-update payloads they carry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::certs::DRep;
use crate::types::{Credential, Hash28, Hash32, Rational, StakeAddress};

/// Off-chain document reference: URL plus the hash of its content.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct Anchor {
    pub url: String,
    pub data_hash: Hash32,
}

/// Identifies a governance action by the transaction that proposed it and
/// the proposal's position in that transaction.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct GovActionId {
    pub tx_hash: Hash32,
    pub index: u32,
}

impl fmt::Display for GovActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.tx_hash, self.index)
    }
}

/// The chain a governance action extends. Actions of the same purpose link
/// to their predecessor; `Treasury` and `Info` actions stand alone.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum GovPurpose {
    ParamUpdate,
    HardFork,
    Committee,
    Constitution,
    Treasury,
    Info,
}

impl fmt::Display for GovPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Kind column of the governance action table.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub enum GovActionKind {
    ParameterChange,
    HardForkInitiation,
    TreasuryWithdrawals,
    NoConfidence,
    NewCommittee,
    NewConstitution,
    InfoAction,
}

impl GovActionKind {
    pub fn purpose(&self) -> GovPurpose {
        match self {
            GovActionKind::ParameterChange => GovPurpose::ParamUpdate,
            GovActionKind::HardForkInitiation => GovPurpose::HardFork,
            GovActionKind::NoConfidence | GovActionKind::NewCommittee => GovPurpose::Committee,
            GovActionKind::NewConstitution => GovPurpose::Constitution,
            GovActionKind::TreasuryWithdrawals => GovPurpose::Treasury,
            GovActionKind::InfoAction => GovPurpose::Info,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Constitution {
    pub anchor: Anchor,
    #[serde(default)]
    pub script_hash: Option<Hash28>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GovAction {
    ParameterChange {
        #[serde(default)]
        prev: Option<GovActionId>,
        update: ParamUpdate,
        #[serde(default)]
        policy_hash: Option<Hash28>,
    },
    HardForkInitiation {
        #[serde(default)]
        prev: Option<GovActionId>,
        major: u16,
        minor: u16,
    },
    TreasuryWithdrawals {
        withdrawals: Vec<(StakeAddress, u64)>,
        #[serde(default)]
        policy_hash: Option<Hash28>,
    },
    NoConfidence {
        #[serde(default)]
        prev: Option<GovActionId>,
    },
    UpdateCommittee {
        #[serde(default)]
        prev: Option<GovActionId>,
        #[serde(default)]
        removed: Vec<Credential>,
        #[serde(default)]
        added: Vec<(Credential, u64)>,
        threshold: Rational,
    },
    NewConstitution {
        #[serde(default)]
        prev: Option<GovActionId>,
        constitution: Constitution,
    },
    Info,
}

impl GovAction {
    pub fn kind(&self) -> GovActionKind {
        match self {
            GovAction::ParameterChange { .. } => GovActionKind::ParameterChange,
            GovAction::HardForkInitiation { .. } => GovActionKind::HardForkInitiation,
            GovAction::TreasuryWithdrawals { .. } => GovActionKind::TreasuryWithdrawals,
            GovAction::NoConfidence { .. } => GovActionKind::NoConfidence,
            GovAction::UpdateCommittee { .. } => GovActionKind::NewCommittee,
            GovAction::NewConstitution { .. } => GovActionKind::NewConstitution,
            GovAction::Info => GovActionKind::InfoAction,
        }
    }

    /// The predecessor this action claims to build on.
    pub fn prev(&self) -> Option<GovActionId> {
        match self {
            GovAction::ParameterChange { prev, .. }
            | GovAction::HardForkInitiation { prev, .. }
            | GovAction::NoConfidence { prev }
            | GovAction::UpdateCommittee { prev, .. }
            | GovAction::NewConstitution { prev, .. } => *prev,
            GovAction::TreasuryWithdrawals { .. } | GovAction::Info => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProposalProcedure {
    pub deposit: u64,
    pub return_address: StakeAddress,
    pub action: GovAction,
    pub anchor: Anchor,
}

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum VoterRole {
    ConstitutionalCommittee,
    DRep,
    SPO,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Voter {
    CommitteeHot(Credential),
    DRep(DRep),
    Pool(Hash28),
}

impl Voter {
    pub fn role(&self) -> VoterRole {
        match self {
            Voter::CommitteeHot(_) => VoterRole::ConstitutionalCommittee,
            Voter::DRep(_) => VoterRole::DRep,
            Voter::Pool(_) => VoterRole::SPO,
        }
    }
}

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    No,
    Yes,
    Abstain,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct VotingProcedure {
    pub voter: Voter,
    pub action_id: GovActionId,
    pub vote: Vote,
    #[serde(default)]
    pub anchor: Option<Anchor>,
}

/// A partial protocol-parameter update. Every field is optional; only the
/// parameters being changed are set.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Default,
    bincode::Encode, bincode::Decode,
)]
#[serde(default)]
pub struct ParamUpdate {
    pub min_fee_a: Option<u64>,
    pub min_fee_b: Option<u64>,
    pub max_block_size: Option<u64>,
    pub max_tx_size: Option<u64>,
    pub max_bh_size: Option<u64>,
    pub key_deposit: Option<u64>,
    pub pool_deposit: Option<u64>,
    pub max_epoch: Option<u64>,
    pub optimal_pool_count: Option<u64>,
    pub influence: Option<Rational>,
    pub monetary_expand_rate: Option<Rational>,
    pub treasury_growth_rate: Option<Rational>,
    pub decentralisation: Option<Rational>,
    pub protocol_major: Option<u16>,
    pub protocol_minor: Option<u16>,
    pub min_utxo_value: Option<u64>,
    pub min_pool_cost: Option<u64>,
    pub coins_per_utxo_size: Option<u64>,
    pub price_mem: Option<Rational>,
    pub price_step: Option<Rational>,
    pub max_tx_ex_mem: Option<u64>,
    pub max_tx_ex_steps: Option<u64>,
    pub max_block_ex_mem: Option<u64>,
    pub max_block_ex_steps: Option<u64>,
    pub max_val_size: Option<u64>,
    pub collateral_percent: Option<u32>,
    pub max_collateral_inputs: Option<u32>,
    pub gov_action_lifetime: Option<u64>,
    pub gov_action_deposit: Option<u64>,
    pub drep_deposit: Option<u64>,
    pub drep_activity: Option<u64>,
    pub committee_min_size: Option<u64>,
    pub committee_max_term_length: Option<u64>,
    pub min_fee_ref_script_cost_per_byte: Option<Rational>,
}

impl ParamUpdate {
    /// Whether the update changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == ParamUpdate::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn committee_actions_share_purpose() {
        assert_eq!(GovActionKind::NoConfidence.purpose(), GovActionKind::NewCommittee.purpose());
        assert_ne!(GovActionKind::ParameterChange.purpose(), GovActionKind::HardForkInitiation.purpose());
    }

    #[test]
    fn standalone_actions_have_no_prev() {
        let info = GovAction::Info;
        assert_eq!(info.prev(), None);
        assert_eq!(info.kind(), GovActionKind::InfoAction);
    }

    #[test]
    fn empty_param_update() {
        assert!(ParamUpdate::default().is_empty());
        let upd = ParamUpdate { max_tx_size: Some(16_384), ..ParamUpdate::default() };
        assert!(!upd.is_empty());
    }

    #[test]
    fn voter_roles() {
        assert_eq!(Voter::Pool(Hash28([0; 28])).role(), VoterRole::SPO);
        assert_eq!(Voter::DRep(DRep::AlwaysAbstain).role(), VoterRole::DRep);
    }
}
