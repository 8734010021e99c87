//! Chain input types: blocks, transactions, outputs, scripts, and metadata.
//!
//! These are the already-validated values handed over by the ledger layer.
//! Nothing here is re-validated; the ingestion pipeline only projects them
//! into rows. All amounts are in lovelace.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::certs::TxCertificate;
use crate::gov::{ParamUpdate, ProposalProcedure, VotingProcedure};

macro_rules! fixed_hash {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, bincode::Encode, bincode::Decode)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Width of the hash in bytes.
            pub const LEN: usize = $len;

            /// Return the underlying bytes.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Copy the bytes into a fresh vector.
            pub fn to_vec(&self) -> Vec<u8> {
                self.0.to_vec()
            }

            /// Parse from a slice of exactly the right width.
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                let arr: [u8; $len] = bytes.try_into().ok()?;
                Some(Self(arr))
            }

            /// Lower-case hex rendering.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
                Self::from_slice(&bytes).ok_or_else(|| {
                    serde::de::Error::custom(format!(
                        "expected {} bytes, got {}",
                        $len,
                        bytes.len()
                    ))
                })
            }
        }
    };
}

fixed_hash!(
    /// A 32-byte hash: block hashes, transaction hashes, datum hashes.
    Hash32,
    32
);

fixed_hash!(
    /// A 28-byte hash: key hashes, script hashes, pool ids, policy ids.
    Hash28,
    28
);

/// Hex (de)serialization for variable-length byte strings.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Ledger era a block was produced in.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "lowercase")]
pub enum Era {
    #[default]
    Byron,
    Shelley,
    Allegra,
    Mary,
    Alonzo,
    Babbage,
    Conway,
}

impl Era {
    /// Whether the era has Plutus scripts (and therefore phase-2 validation).
    pub fn has_plutus(&self) -> bool {
        *self >= Era::Alonzo
    }

    /// Whether the era carries on-chain governance.
    pub fn has_governance(&self) -> bool {
        *self >= Era::Conway
    }
}

impl fmt::Display for Era {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Era::Byron => "byron",
            Era::Shelley => "shelley",
            Era::Allegra => "allegra",
            Era::Mary => "mary",
            Era::Alonzo => "alonzo",
            Era::Babbage => "babbage",
            Era::Conway => "conway",
        };
        f.write_str(name)
    }
}

/// Network discriminant carried in address headers.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

impl Network {
    fn header_bits(&self) -> u8 {
        match self {
            Network::Mainnet => 0x01,
            Network::Testnet => 0x00,
        }
    }
}

/// A payment or stake credential.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
#[serde(tag = "type", content = "hash", rename_all = "snake_case")]
pub enum Credential {
    KeyHash(Hash28),
    ScriptHash(Hash28),
}

impl Credential {
    pub fn hash(&self) -> &Hash28 {
        match self {
            Credential::KeyHash(h) | Credential::ScriptHash(h) => h,
        }
    }

    pub fn is_script(&self) -> bool {
        matches!(self, Credential::ScriptHash(_))
    }
}

/// A reward (stake) address: network plus stake credential.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct StakeAddress {
    #[serde(default)]
    pub network: Network,
    pub credential: Credential,
}

impl StakeAddress {
    /// Raw 29-byte encoding: header byte followed by the credential hash.
    pub fn to_bytes(&self) -> Vec<u8> {
        let kind = if self.credential.is_script() { 0xF0 } else { 0xE0 };
        let mut out = Vec::with_capacity(29);
        out.push(kind | self.network.header_bits());
        out.extend_from_slice(self.credential.hash().as_bytes());
        out
    }

    /// Textual view stored alongside the raw bytes.
    pub fn view(&self) -> String {
        let prefix = match self.network {
            Network::Mainnet => "stake",
            Network::Testnet => "stake_test",
        };
        format!("{prefix}:{}", hex::encode(self.to_bytes()))
    }

    /// Script hash when the credential is a script.
    pub fn script_hash(&self) -> Option<Hash28> {
        match self.credential {
            Credential::ScriptHash(h) => Some(h),
            Credential::KeyHash(_) => None,
        }
    }
}

/// A payment address as it appears in an output.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    /// Raw address bytes; the unique key of the address table.
    #[serde(with = "hex_bytes")]
    pub raw: Vec<u8>,
    /// Human-readable rendering.
    pub view: String,
    /// Payment credential, absent for bootstrap (Byron) addresses.
    #[serde(default)]
    pub payment: Option<Credential>,
    /// Delegation part of the address, if any.
    #[serde(default)]
    pub stake: Option<StakeAddress>,
}

impl Address {
    pub fn has_script(&self) -> bool {
        self.payment.is_some_and(|c| c.is_script())
    }
}

/// A datum or redeemer payload: hash plus raw CBOR bytes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Datum {
    pub hash: Hash32,
    #[serde(with = "hex_bytes")]
    pub bytes: Vec<u8>,
}

/// Datum attached to an output.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum OutDatum {
    Hash(Hash32),
    Inline(Datum),
}

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum ScriptKind {
    Timelock,
    PlutusV1,
    PlutusV2,
    PlutusV3,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Script {
    pub hash: Hash28,
    pub kind: ScriptKind,
    #[serde(with = "hex_bytes")]
    pub bytes: Vec<u8>,
}

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum RedeemerPurpose {
    Spend,
    Mint,
    Cert,
    Reward,
    Voting,
    Proposing,
}

impl fmt::Display for RedeemerPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Redeemer {
    pub purpose: RedeemerPurpose,
    pub index: u32,
    pub unit_mem: u64,
    pub unit_steps: u64,
    #[serde(default)]
    pub fee: Option<u64>,
    #[serde(default)]
    pub script_hash: Option<Hash28>,
    pub data: Datum,
}

/// One multi-asset quantity inside an output.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct OutAsset {
    pub policy: Hash28,
    #[serde(with = "hex_bytes")]
    pub name: Vec<u8>,
    pub quantity: u64,
}

/// A minted (positive) or burned (negative) quantity.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MintAsset {
    pub policy: Hash28,
    #[serde(with = "hex_bytes")]
    pub name: Vec<u8>,
    pub quantity: i128,
}

/// Reference to an output being spent.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TxIn {
    pub tx_hash: Hash32,
    pub index: u64,
    /// Index of the spending redeemer, for script-locked outputs.
    #[serde(default)]
    pub redeemer_index: Option<u32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub index: u64,
    pub address: Address,
    pub value: u64,
    #[serde(default)]
    pub assets: Vec<OutAsset>,
    #[serde(default)]
    pub datum: Option<OutDatum>,
    #[serde(default)]
    pub reference_script: Option<Script>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Withdrawal {
    pub address: StakeAddress,
    pub amount: u64,
    #[serde(default)]
    pub redeemer_index: Option<u32>,
}

/// One top-level metadata entry: label plus raw CBOR value.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxMetadatum {
    pub key: u64,
    #[serde(with = "hex_bytes")]
    pub bytes: Vec<u8>,
}

/// A pre-governance protocol-parameter update proposal.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ParamProposal {
    pub key: Hash28,
    pub epoch_no: u64,
    pub update: ParamUpdate,
}

/// A validated transaction.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Tx {
    pub hash: Hash32,
    pub block_index: u64,
    pub size: u64,
    /// `false` when phase-2 (script) validation failed.
    pub valid_contract: bool,
    /// Fee from the body; `None` when it must be derived.
    pub fees: Option<u64>,
    pub inputs: Vec<TxIn>,
    pub collateral_inputs: Vec<TxIn>,
    pub reference_inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub collateral_output: Option<TxOut>,
    pub withdrawals: Vec<Withdrawal>,
    pub certificates: Vec<TxCertificate>,
    pub metadata: Vec<TxMetadatum>,
    pub mint: Vec<MintAsset>,
    pub scripts: Vec<Script>,
    pub datums: Vec<Datum>,
    pub redeemers: Vec<Redeemer>,
    pub extra_key_witnesses: Vec<Hash28>,
    pub param_proposals: Vec<ParamProposal>,
    pub proposals: Vec<ProposalProcedure>,
    pub votes: Vec<VotingProcedure>,
    pub invalid_before: Option<u64>,
    pub invalid_hereafter: Option<u64>,
    pub treasury_donation: u64,
}

impl Default for Hash32 {
    fn default() -> Self {
        Hash32([0u8; 32])
    }
}

impl Default for Tx {
    fn default() -> Self {
        Self {
            hash: Hash32::default(),
            block_index: 0,
            size: 0,
            valid_contract: true,
            fees: None,
            inputs: Vec::new(),
            collateral_inputs: Vec::new(),
            reference_inputs: Vec::new(),
            outputs: Vec::new(),
            collateral_output: None,
            withdrawals: Vec::new(),
            certificates: Vec::new(),
            metadata: Vec::new(),
            mint: Vec::new(),
            scripts: Vec::new(),
            datums: Vec::new(),
            redeemers: Vec::new(),
            extra_key_witnesses: Vec::new(),
            param_proposals: Vec::new(),
            proposals: Vec::new(),
            votes: Vec::new(),
            invalid_before: None,
            invalid_hereafter: None,
            treasury_donation: 0,
        }
    }
}

impl Tx {
    /// Inputs the transaction actually consumes: collateral when phase-2
    /// validation failed, the regular inputs otherwise.
    pub fn spent_inputs(&self) -> &[TxIn] {
        if self.valid_contract {
            &self.inputs
        } else {
            &self.collateral_inputs
        }
    }

    /// Outputs the transaction actually produces: the collateral return when
    /// phase-2 validation failed, the regular outputs otherwise.
    pub fn produced_outputs(&self) -> Vec<&TxOut> {
        if self.valid_contract {
            self.outputs.iter().collect()
        } else {
            self.collateral_output.iter().collect()
        }
    }

    /// Sum of produced output values.
    pub fn out_sum(&self) -> u128 {
        self.produced_outputs().iter().map(|o| o.value as u128).sum()
    }

    /// Sum of withdrawal amounts (zero for failed transactions).
    pub fn withdrawal_sum(&self) -> u128 {
        if !self.valid_contract {
            return 0;
        }
        self.withdrawals.iter().map(|w| w.amount as u128).sum()
    }

    /// Total serialized size of the scripts witnessed by this transaction.
    pub fn script_size(&self) -> u64 {
        self.scripts.iter().map(|s| s.bytes.len() as u64).sum()
    }
}

/// The block producer as identified in the header.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SlotLeader {
    pub hash: Hash28,
    /// Pool the leader key belongs to, absent for genesis delegates.
    #[serde(default)]
    pub pool: Option<Hash28>,
    #[serde(default)]
    pub description: String,
}

/// A validated block.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Block {
    pub hash: Hash32,
    /// Absent only for the first block of the chain.
    #[serde(default)]
    pub prev_hash: Option<Hash32>,
    pub era: Era,
    /// Slot fields are absent for epoch-boundary blocks.
    #[serde(default)]
    pub slot_no: Option<u64>,
    #[serde(default)]
    pub epoch_no: Option<u64>,
    #[serde(default)]
    pub epoch_slot_no: Option<u64>,
    #[serde(default)]
    pub block_no: Option<u64>,
    pub time: DateTime<Utc>,
    pub size: u64,
    pub proto_major: u16,
    pub proto_minor: u16,
    pub slot_leader: SlotLeader,
    #[serde(default)]
    pub vrf_key: Option<String>,
    #[serde(default)]
    pub op_cert: Option<Hash32>,
    #[serde(default)]
    pub op_cert_counter: Option<u64>,
    #[serde(default)]
    pub txs: Vec<Tx>,
}

impl Block {
    /// Short identifier for logs and errors.
    pub fn label(&self) -> String {
        self.hash.to_hex()
    }
}

/// A rational number as carried in protocol parameters and pool margins.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct Rational {
    pub numerator: u64,
    pub denominator: u64,
}

impl Rational {
    pub fn new(numerator: u64, denominator: u64) -> Self {
        Self { numerator, denominator }
    }

    /// Floating-point value; a zero denominator yields zero.
    pub fn to_f64(&self) -> f64 {
        if self.denominator == 0 {
            return 0.0;
        }
        self.numerator as f64 / self.denominator as f64
    }
}
