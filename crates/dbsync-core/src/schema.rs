//! The relational row catalog.
//!
//! One struct per table, all collected in the [`DbRow`] sum type so a store
//! can handle rows generically. Ids are surrogate keys assigned by the store
//! on insert, one sequence per table starting at 1.
//!
//! Column semantics follow the established schema: hashes are fixed-width,
//! signed amounts that can exceed 64 bits are [`DbInt65`], times are unix
//! seconds.

use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::gov::{GovActionKind, ParamUpdate, Vote, VoterRole};
use crate::ledger::{ProtocolParams, RewardKind};
use crate::types::{Era, Hash28, Hash32, RedeemerPurpose, ScriptKind};

/// Surrogate key of a row.
pub type DbId = u64;

/// A signed amount stored as a sign flag plus a 64-bit magnitude.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, bincode::Encode, bincode::Decode)]
pub struct DbInt65 {
    pub negative: bool,
    pub magnitude: u64,
}

impl DbInt65 {
    /// Magnitudes beyond 64 bits saturate.
    pub fn from_i128(value: i128) -> Self {
        let magnitude = u64::try_from(value.unsigned_abs()).unwrap_or(u64::MAX);
        Self { negative: value < 0 && magnitude != 0, magnitude }
    }

    pub fn to_i128(&self) -> i128 {
        let m = self.magnitude as i128;
        if self.negative { -m } else { m }
    }

    pub fn negate(&self) -> Self {
        Self::from_i128(-self.to_i128())
    }
}

impl From<i64> for DbInt65 {
    fn from(value: i64) -> Self {
        Self::from_i128(value as i128)
    }
}

/// Kind of document a voting anchor points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, bincode::Encode, bincode::Decode)]
pub enum AnchorKind {
    GovAction,
    Drep,
    Vote,
    CommitteeDereg,
    Constitution,
}

/// Per-table id boundary: the next id each table would hand out at some
/// point in time. Deleting from it removes everything inserted since.
#[derive(Clone, Debug, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct MinIds(pub BTreeMap<Table, DbId>);

impl MinIds {
    pub fn get(&self, table: Table) -> Option<DbId> {
        self.0.get(&table).copied()
    }

    pub fn set(&mut self, table: Table, id: DbId) {
        self.0.insert(table, id);
    }
}

/// A row type bound to its table.
pub trait TableRow: Into<DbRow> + TryFrom<DbRow, Error = StoreError> + Clone {
    const TABLE: Table;
}

macro_rules! db_rows {
    ($($variant:ident => $row:ident, $name:literal;)*) => {
        /// Every table of the schema.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, bincode::Encode, bincode::Decode)]
        pub enum Table {
            $($variant,)*
        }

        impl Table {
            pub const ALL: &'static [Table] = &[$(Table::$variant,)*];

            /// Name of the table in the relational schema.
            pub fn name(&self) -> &'static str {
                match self {
                    $(Table::$variant => $name,)*
                }
            }
        }

        impl std::fmt::Display for Table {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }

        #[derive(Clone, Debug, PartialEq, bincode::Encode, bincode::Decode)]
        pub enum DbRow {
            $($variant(self::$row),)*
        }

        impl DbRow {
            pub fn table(&self) -> Table {
                match self {
                    $(DbRow::$variant(_) => Table::$variant,)*
                }
            }
        }

        $(
            impl TableRow for $row {
                const TABLE: Table = Table::$variant;
            }

            impl From<$row> for DbRow {
                fn from(row: $row) -> Self {
                    DbRow::$variant(row)
                }
            }

            impl TryFrom<DbRow> for $row {
                type Error = StoreError;

                fn try_from(row: DbRow) -> Result<Self, StoreError> {
                    match row {
                        DbRow::$variant(r) => Ok(r),
                        other => Err(StoreError::WrongTable(other.table().name().to_string())),
                    }
                }
            }
        )*
    };
}

db_rows! {
    Block => BlockRow, "block";
    SlotLeader => SlotLeaderRow, "slot_leader";
    Tx => TxRow, "tx";
    TxOut => TxOutRow, "tx_out";
    TxIn => TxInRow, "tx_in";
    CollateralTxIn => CollateralTxInRow, "collateral_tx_in";
    ReferenceTxIn => ReferenceTxInRow, "reference_tx_in";
    CollateralTxOut => CollateralTxOutRow, "collateral_tx_out";
    Address => AddressRow, "address";
    StakeAddress => StakeAddressRow, "stake_address";
    PoolHash => PoolHashRow, "pool_hash";
    PoolMetadataRef => PoolMetadataRefRow, "pool_metadata_ref";
    PoolUpdate => PoolUpdateRow, "pool_update";
    PoolOwner => PoolOwnerRow, "pool_owner";
    PoolRelay => PoolRelayRow, "pool_relay";
    PoolRetire => PoolRetireRow, "pool_retire";
    StakeRegistration => StakeRegistrationRow, "stake_registration";
    StakeDeregistration => StakeDeregistrationRow, "stake_deregistration";
    Delegation => DelegationRow, "delegation";
    DelegationVote => DelegationVoteRow, "delegation_vote";
    Withdrawal => WithdrawalRow, "withdrawal";
    Reserve => ReserveRow, "reserve";
    Treasury => TreasuryRow, "treasury";
    PotTransfer => PotTransferRow, "pot_transfer";
    MultiAsset => MultiAssetRow, "multi_asset";
    MaTxOut => MaTxOutRow, "ma_tx_out";
    MaTxMint => MaTxMintRow, "ma_tx_mint";
    TxMetadata => TxMetadataRow, "tx_metadata";
    Datum => DatumRow, "datum";
    RedeemerData => RedeemerDataRow, "redeemer_data";
    Redeemer => RedeemerRow, "redeemer";
    Script => ScriptRow, "script";
    ExtraKeyWitness => ExtraKeyWitnessRow, "extra_key_witness";
    ParamProposal => ParamProposalRow, "param_proposal";
    EpochParam => EpochParamRow, "epoch_param";
    AdaPots => AdaPotsRow, "ada_pots";
    Epoch => EpochRow, "epoch";
    EpochStake => EpochStakeRow, "epoch_stake";
    Reward => RewardRow, "reward";
    DrepHash => DrepHashRow, "drep_hash";
    DrepRegistration => DrepRegistrationRow, "drep_registration";
    DrepDistr => DrepDistrRow, "drep_distr";
    CommitteeHash => CommitteeHashRow, "committee_hash";
    CommitteeRegistration => CommitteeRegistrationRow, "committee_registration";
    CommitteeDeRegistration => CommitteeDeRegistrationRow, "committee_de_registration";
    VotingAnchor => VotingAnchorRow, "voting_anchor";
    GovActionProposal => GovActionProposalRow, "gov_action_proposal";
    TreasuryWithdrawal => TreasuryWithdrawalRow, "treasury_withdrawal";
    Committee => CommitteeRow, "committee";
    CommitteeMember => CommitteeMemberRow, "committee_member";
    Constitution => ConstitutionRow, "constitution";
    VotingProcedure => VotingProcedureRow, "voting_procedure";
    OffChainPoolData => OffChainPoolDataRow, "off_chain_pool_data";
    OffChainPoolFetchError => OffChainPoolFetchErrorRow, "off_chain_pool_fetch_error";
    OffChainVoteData => OffChainVoteDataRow, "off_chain_vote_data";
    OffChainVoteFetchError => OffChainVoteFetchErrorRow, "off_chain_vote_fetch_error";
    ReverseIndex => ReverseIndexRow, "reverse_index";
}

/// Unique-key encodings. Stores namespace these by table.
pub mod keys {
    use super::DbId;

    pub fn raw(bytes: &[u8]) -> Vec<u8> {
        bytes.to_vec()
    }

    /// `(parent id, index)` pairs such as `(tx, output index)`.
    pub fn pair(parent: DbId, index: u64) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.extend_from_slice(&parent.to_be_bytes());
        out.extend_from_slice(&index.to_be_bytes());
        out
    }

    pub fn block_no(no: u64) -> Vec<u8> {
        let mut out = b"no".to_vec();
        out.extend_from_slice(&no.to_be_bytes());
        out
    }

    /// Position of a transaction inside its block.
    pub fn tx_slot(block_id: DbId, index: u64) -> Vec<u8> {
        let mut out = b"bi".to_vec();
        out.extend_from_slice(&pair(block_id, index));
        out
    }

    pub fn number(no: u64) -> Vec<u8> {
        no.to_be_bytes().to_vec()
    }

    pub fn multi_asset(policy: &[u8], name: &[u8]) -> Vec<u8> {
        let mut out = policy.to_vec();
        out.extend_from_slice(name);
        out
    }

    pub fn anchor(data_hash: &[u8], url: &str) -> Vec<u8> {
        let mut out = data_hash.to_vec();
        out.extend_from_slice(url.as_bytes());
        out
    }

    pub fn committee(raw: &[u8], has_script: bool) -> Vec<u8> {
        let mut out = raw.to_vec();
        out.push(has_script as u8);
        out
    }

    pub fn pool_metadata(pool_id: DbId, url: &str, hash: &[u8]) -> Vec<u8> {
        let mut out = pool_id.to_be_bytes().to_vec();
        out.extend_from_slice(hash);
        out.extend_from_slice(url.as_bytes());
        out
    }
}

impl DbRow {
    /// Unique keys of the row. The first one is the lookup key for
    /// content-addressed tables.
    pub fn unique_keys(&self) -> Vec<Vec<u8>> {
        match self {
            DbRow::Block(r) => {
                let mut out = vec![keys::raw(r.hash.as_bytes())];
                if let Some(no) = r.block_no {
                    out.push(keys::block_no(no));
                }
                out
            }
            DbRow::SlotLeader(r) => vec![keys::raw(r.hash.as_bytes())],
            DbRow::Tx(r) => vec![keys::raw(r.hash.as_bytes()), keys::tx_slot(r.block_id, r.block_index)],
            DbRow::TxOut(r) => vec![keys::pair(r.tx_id, r.index)],
            DbRow::CollateralTxOut(r) => vec![keys::pair(r.tx_id, r.index)],
            DbRow::Address(r) => vec![keys::raw(&r.raw)],
            DbRow::StakeAddress(r) => vec![keys::raw(&r.hash_raw)],
            DbRow::PoolHash(r) => vec![keys::raw(r.hash_raw.as_bytes())],
            DbRow::PoolMetadataRef(r) => vec![keys::pool_metadata(r.pool_id, &r.url, r.hash.as_bytes())],
            DbRow::MultiAsset(r) => vec![keys::multi_asset(r.policy.as_bytes(), &r.name)],
            DbRow::Datum(r) => vec![keys::raw(r.hash.as_bytes())],
            DbRow::RedeemerData(r) => vec![keys::raw(r.hash.as_bytes())],
            DbRow::Script(r) => vec![keys::raw(r.hash.as_bytes())],
            DbRow::EpochParam(r) => vec![keys::number(r.epoch_no)],
            DbRow::Epoch(r) => vec![keys::number(r.no)],
            DbRow::DrepHash(r) => vec![keys::raw(r.view.as_bytes())],
            DbRow::CommitteeHash(r) => vec![keys::committee(r.raw.as_bytes(), r.has_script)],
            DbRow::VotingAnchor(r) => vec![keys::anchor(r.data_hash.as_bytes(), &r.url)],
            DbRow::GovActionProposal(r) => vec![keys::pair(r.tx_id, r.index as u64)],
            DbRow::ReverseIndex(r) => vec![keys::number(r.block_id)],
            _ => Vec::new(),
        }
    }

    /// Transaction that consumed this row, for outputs.
    pub fn consumed_by(&self) -> Option<DbId> {
        match self {
            DbRow::TxOut(r) => r.consumed_by_tx_id,
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Blocks and transactions
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct BlockRow {
    pub hash: Hash32,
    pub epoch_no: Option<u64>,
    pub slot_no: Option<u64>,
    pub epoch_slot_no: Option<u64>,
    pub block_no: Option<u64>,
    pub previous_id: Option<DbId>,
    pub slot_leader_id: DbId,
    pub size: u64,
    pub time: i64,
    pub tx_count: u64,
    pub proto_major: u16,
    pub proto_minor: u16,
    pub vrf_key: Option<String>,
    pub op_cert: Option<Hash32>,
    pub op_cert_counter: Option<u64>,
    pub era: Era,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct SlotLeaderRow {
    pub hash: Hash28,
    pub pool_hash_id: Option<DbId>,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct TxRow {
    pub hash: Hash32,
    pub block_id: DbId,
    pub block_index: u64,
    pub out_sum: u128,
    pub fee: u64,
    pub deposit: Option<i64>,
    pub size: u64,
    pub invalid_before: Option<u64>,
    pub invalid_hereafter: Option<u64>,
    pub valid_contract: bool,
    pub script_size: u64,
    pub treasury_donation: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct TxOutRow {
    pub tx_id: DbId,
    pub index: u64,
    pub address_id: DbId,
    pub stake_address_id: Option<DbId>,
    pub value: u64,
    pub data_hash: Option<Hash32>,
    pub inline_datum_id: Option<DbId>,
    pub reference_script_id: Option<DbId>,
    pub consumed_by_tx_id: Option<DbId>,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct TxInRow {
    pub tx_in_id: DbId,
    pub tx_out_id: DbId,
    pub tx_out_index: u64,
    pub redeemer_id: Option<DbId>,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct CollateralTxInRow {
    pub tx_in_id: DbId,
    pub tx_out_id: DbId,
    pub tx_out_index: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct ReferenceTxInRow {
    pub tx_in_id: DbId,
    pub tx_out_id: DbId,
    pub tx_out_index: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct CollateralTxOutRow {
    pub tx_id: DbId,
    pub index: u64,
    pub address_id: DbId,
    pub stake_address_id: Option<DbId>,
    pub value: u64,
    pub data_hash: Option<Hash32>,
    pub inline_datum_id: Option<DbId>,
    pub reference_script_id: Option<DbId>,
    /// Rendered multi-asset contents; collateral assets get no `ma_tx_out` rows.
    pub multi_assets_descr: String,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct AddressRow {
    pub raw: Vec<u8>,
    pub view: String,
    pub has_script: bool,
    pub payment_cred: Option<Hash28>,
    pub stake_address_id: Option<DbId>,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct StakeAddressRow {
    pub hash_raw: Vec<u8>,
    pub view: String,
    pub script_hash: Option<Hash28>,
}

// ---------------------------------------------------------------------------
// Pools and stake certificates
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct PoolHashRow {
    pub hash_raw: Hash28,
    pub view: String,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct PoolMetadataRefRow {
    pub pool_id: DbId,
    pub url: String,
    pub hash: Hash32,
    pub registered_tx_id: DbId,
}

#[derive(Clone, Debug, PartialEq, bincode::Encode, bincode::Decode)]
pub struct PoolUpdateRow {
    pub hash_id: DbId,
    pub cert_index: u16,
    pub vrf_key_hash: Hash32,
    pub pledge: u64,
    pub active_epoch_no: u64,
    pub meta_id: Option<DbId>,
    pub margin: f64,
    pub fixed_cost: u64,
    pub deposit: Option<u64>,
    pub registered_tx_id: DbId,
    pub reward_addr_id: DbId,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct PoolOwnerRow {
    pub addr_id: DbId,
    pub pool_update_id: DbId,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct PoolRelayRow {
    pub update_id: DbId,
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
    pub dns_name: Option<String>,
    pub dns_srv_name: Option<String>,
    pub port: Option<u16>,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct PoolRetireRow {
    pub hash_id: DbId,
    pub cert_index: u16,
    pub announced_tx_id: DbId,
    pub retiring_epoch: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct StakeRegistrationRow {
    pub addr_id: DbId,
    pub cert_index: u16,
    pub epoch_no: u64,
    pub deposit: Option<u64>,
    pub tx_id: DbId,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct StakeDeregistrationRow {
    pub addr_id: DbId,
    pub cert_index: u16,
    pub epoch_no: u64,
    pub tx_id: DbId,
    pub redeemer_id: Option<DbId>,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct DelegationRow {
    pub addr_id: DbId,
    pub cert_index: u16,
    pub pool_hash_id: DbId,
    pub active_epoch_no: u64,
    pub tx_id: DbId,
    pub slot_no: u64,
    pub redeemer_id: Option<DbId>,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct DelegationVoteRow {
    pub addr_id: DbId,
    pub cert_index: u16,
    pub drep_hash_id: DbId,
    pub tx_id: DbId,
    pub redeemer_id: Option<DbId>,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct WithdrawalRow {
    pub addr_id: DbId,
    pub amount: u64,
    pub redeemer_id: Option<DbId>,
    pub tx_id: DbId,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct ReserveRow {
    pub addr_id: DbId,
    pub cert_index: u16,
    pub amount: DbInt65,
    pub tx_id: DbId,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct TreasuryRow {
    pub addr_id: DbId,
    pub cert_index: u16,
    pub amount: DbInt65,
    pub tx_id: DbId,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct PotTransferRow {
    pub cert_index: u16,
    pub treasury: DbInt65,
    pub reserves: DbInt65,
    pub tx_id: DbId,
}

// ---------------------------------------------------------------------------
// Assets, metadata, and witnesses
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct MultiAssetRow {
    pub policy: Hash28,
    pub name: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct MaTxOutRow {
    pub ident: DbId,
    pub quantity: u64,
    pub tx_out_id: DbId,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct MaTxMintRow {
    pub ident: DbId,
    pub quantity: DbInt65,
    pub tx_id: DbId,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct TxMetadataRow {
    pub key: u64,
    /// JSON rendering; `None` when the payload does not decode.
    pub json: Option<String>,
    pub bytes: Vec<u8>,
    pub tx_id: DbId,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct DatumRow {
    pub hash: Hash32,
    pub tx_id: DbId,
    pub value: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct RedeemerDataRow {
    pub hash: Hash32,
    pub tx_id: DbId,
    pub value: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct RedeemerRow {
    pub tx_id: DbId,
    pub unit_mem: u64,
    pub unit_steps: u64,
    pub fee: Option<u64>,
    pub purpose: RedeemerPurpose,
    pub index: u32,
    pub script_hash: Option<Hash28>,
    pub redeemer_data_id: DbId,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct ScriptRow {
    pub tx_id: DbId,
    pub hash: Hash28,
    pub kind: ScriptKind,
    pub bytes: Vec<u8>,
    pub serialised_size: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct ExtraKeyWitnessRow {
    pub hash: Hash28,
    pub tx_id: DbId,
}

#[derive(Clone, Debug, PartialEq, bincode::Encode, bincode::Decode)]
pub struct ParamProposalRow {
    pub epoch_no: u64,
    pub key: Option<Hash28>,
    pub update: ParamUpdate,
    pub registered_tx_id: DbId,
}

// ---------------------------------------------------------------------------
// Epoch bookkeeping
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, bincode::Encode, bincode::Decode)]
pub struct EpochParamRow {
    pub epoch_no: u64,
    pub params: ProtocolParams,
    pub nonce: Option<Hash32>,
    pub block_id: DbId,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct AdaPotsRow {
    pub slot_no: u64,
    pub epoch_no: u64,
    pub treasury: u64,
    pub reserves: u64,
    pub rewards: u64,
    pub utxo: u64,
    pub deposits_stake: u64,
    pub deposits_drep: u64,
    pub deposits_proposal: u64,
    pub fees: u64,
    pub block_id: DbId,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct EpochRow {
    pub no: u64,
    pub out_sum: u128,
    pub fees: u128,
    pub tx_count: u64,
    pub blk_count: u64,
    pub start_time: i64,
    pub end_time: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct EpochStakeRow {
    pub addr_id: DbId,
    pub pool_id: DbId,
    pub amount: u64,
    pub epoch_no: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct RewardRow {
    pub addr_id: DbId,
    pub kind: RewardKind,
    pub amount: u64,
    pub earned_epoch: u64,
    pub spendable_epoch: u64,
    pub pool_id: Option<DbId>,
}

// ---------------------------------------------------------------------------
// Governance
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct DrepHashRow {
    pub raw: Option<Hash28>,
    pub view: String,
    pub has_script: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct DrepRegistrationRow {
    pub tx_id: DbId,
    pub cert_index: u16,
    /// Positive on registration, negative on deregistration, absent on update.
    pub deposit: Option<DbInt65>,
    pub drep_hash_id: DbId,
    pub voting_anchor_id: Option<DbId>,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct DrepDistrRow {
    pub hash_id: DbId,
    pub amount: u64,
    pub epoch_no: u64,
    pub active_until: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct CommitteeHashRow {
    pub raw: Hash28,
    pub has_script: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct CommitteeRegistrationRow {
    pub tx_id: DbId,
    pub cert_index: u16,
    pub cold_key_id: DbId,
    pub hot_key_id: DbId,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct CommitteeDeRegistrationRow {
    pub tx_id: DbId,
    pub cert_index: u16,
    pub cold_key_id: DbId,
    pub voting_anchor_id: Option<DbId>,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct VotingAnchorRow {
    pub url: String,
    pub data_hash: Hash32,
    pub block_id: DbId,
    pub kind: AnchorKind,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct GovActionProposalRow {
    pub tx_id: DbId,
    pub index: u32,
    pub prev_gov_action_proposal: Option<DbId>,
    pub deposit: u64,
    pub return_address: DbId,
    pub expiration: Option<u64>,
    pub voting_anchor_id: DbId,
    pub kind: GovActionKind,
    /// JSON rendering of the action payload.
    pub description: String,
    pub param_proposal: Option<DbId>,
    pub ratified_epoch: Option<u64>,
    pub enacted_epoch: Option<u64>,
    pub dropped_epoch: Option<u64>,
    pub expired_epoch: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct TreasuryWithdrawalRow {
    pub gov_action_proposal_id: DbId,
    pub stake_address_id: DbId,
    pub amount: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct CommitteeRow {
    pub gov_action_proposal_id: Option<DbId>,
    pub quorum_numerator: u64,
    pub quorum_denominator: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct CommitteeMemberRow {
    pub committee_id: DbId,
    pub committee_hash_id: DbId,
    pub expiration_epoch: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct ConstitutionRow {
    pub gov_action_proposal_id: Option<DbId>,
    pub voting_anchor_id: DbId,
    pub script_hash: Option<Hash28>,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct VotingProcedureRow {
    pub tx_id: DbId,
    pub index: u32,
    pub gov_action_proposal_id: DbId,
    pub voter_role: VoterRole,
    pub committee_voter: Option<DbId>,
    pub drep_voter: Option<DbId>,
    pub pool_voter: Option<DbId>,
    pub vote: Vote,
    pub voting_anchor_id: Option<DbId>,
}

// ---------------------------------------------------------------------------
// Off-chain data
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct OffChainPoolDataRow {
    pub pool_id: DbId,
    pub ticker_name: String,
    pub hash: Hash32,
    pub json: String,
    pub bytes: Vec<u8>,
    pub pmr_id: DbId,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct OffChainPoolFetchErrorRow {
    pub pool_id: DbId,
    pub fetch_time: i64,
    pub pmr_id: DbId,
    pub fetch_error: String,
    pub retry_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct OffChainVoteDataRow {
    pub voting_anchor_id: DbId,
    pub hash: Hash32,
    pub json: Option<String>,
    pub bytes: Vec<u8>,
    pub warning: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct OffChainVoteFetchErrorRow {
    pub voting_anchor_id: DbId,
    pub fetch_error: String,
    pub fetch_time: i64,
    pub retry_count: u32,
}

/// Lowest ids inserted by a recent block, kept to speed up rollback.
#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct ReverseIndexRow {
    pub block_id: DbId,
    pub min_ids: MinIds,
}
