//! Certificates: the closed set of on-chain instructions that mutate stake,
//! pool, and governance state.
//!
//! Every variant maps to exactly one insertion routine in the ingestion
//! pipeline; adding an era's certificate kind means extending [`Certificate`]
//! and the exhaustive match that dispatches on it.

use serde::{Deserialize, Serialize};

use crate::gov::Anchor;
use crate::types::{Credential, Hash28, Hash32, Rational, StakeAddress};

/// A delegated representative.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
#[serde(tag = "type", content = "hash", rename_all = "snake_case")]
pub enum DRep {
    KeyHash(Hash28),
    ScriptHash(Hash28),
    AlwaysAbstain,
    AlwaysNoConfidence,
}

impl DRep {
    /// Raw credential hash, absent for the two predefined DReps.
    pub fn raw(&self) -> Option<Hash28> {
        match self {
            DRep::KeyHash(h) | DRep::ScriptHash(h) => Some(*h),
            DRep::AlwaysAbstain | DRep::AlwaysNoConfidence => None,
        }
    }

    /// Unique textual view; the predefined DReps use fixed names.
    pub fn view(&self) -> String {
        match self {
            DRep::KeyHash(h) => format!("drep:{h}"),
            DRep::ScriptHash(h) => format!("drep_script:{h}"),
            DRep::AlwaysAbstain => "drep_always_abstain".to_string(),
            DRep::AlwaysNoConfidence => "drep_always_no_confidence".to_string(),
        }
    }

    pub fn has_script(&self) -> bool {
        matches!(self, DRep::ScriptHash(_))
    }
}

impl From<Credential> for DRep {
    fn from(cred: Credential) -> Self {
        match cred {
            Credential::KeyHash(h) => DRep::KeyHash(h),
            Credential::ScriptHash(h) => DRep::ScriptHash(h),
        }
    }
}

/// Where a delegation certificate points.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DelegTarget {
    Pool(Hash28),
    DRep(DRep),
    PoolAndDRep(Hash28, DRep),
}

impl DelegTarget {
    pub fn pool(&self) -> Option<Hash28> {
        match self {
            DelegTarget::Pool(p) | DelegTarget::PoolAndDRep(p, _) => Some(*p),
            DelegTarget::DRep(_) => None,
        }
    }

    pub fn drep(&self) -> Option<DRep> {
        match self {
            DelegTarget::DRep(d) | DelegTarget::PoolAndDRep(_, d) => Some(*d),
            DelegTarget::Pool(_) => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Relay {
    SingleHostAddr {
        #[serde(default)]
        ipv4: Option<String>,
        #[serde(default)]
        ipv6: Option<String>,
        #[serde(default)]
        port: Option<u16>,
    },
    SingleHostName {
        dns_name: String,
        #[serde(default)]
        port: Option<u16>,
    },
    MultiHostName {
        dns_srv_name: String,
    },
}

/// Parameters of a pool registration (or re-registration).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PoolParams {
    pub pool: Hash28,
    pub vrf_key_hash: Hash32,
    pub pledge: u64,
    pub cost: u64,
    pub margin: Rational,
    pub reward_account: StakeAddress,
    #[serde(default)]
    pub owners: Vec<StakeAddress>,
    #[serde(default)]
    pub relays: Vec<Relay>,
    #[serde(default)]
    pub metadata: Option<Anchor>,
}

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum MirPot {
    Reserves,
    Treasury,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MirTarget {
    /// Per-address deltas; may be negative from Alonzo on.
    StakeAddresses(Vec<(StakeAddress, i128)>),
    /// Transfer to the other accounting pot.
    OtherPot(u64),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Certificate {
    StakeRegistration {
        address: StakeAddress,
        #[serde(default)]
        deposit: Option<u64>,
    },
    StakeDeregistration {
        address: StakeAddress,
        #[serde(default)]
        refund: Option<u64>,
    },
    /// Stake delegation, vote delegation, or both at once.
    Delegation {
        address: StakeAddress,
        target: DelegTarget,
    },
    /// Registration and delegation in one certificate.
    RegDelegation {
        address: StakeAddress,
        target: DelegTarget,
        deposit: u64,
    },
    PoolRegistration(PoolParams),
    PoolRetirement {
        pool: Hash28,
        epoch: u64,
    },
    Mir {
        pot: MirPot,
        target: MirTarget,
    },
    GenesisDelegation {
        genesis: Hash28,
        delegate: Hash28,
    },
    DRepRegistration {
        drep: Credential,
        deposit: u64,
        #[serde(default)]
        anchor: Option<Anchor>,
    },
    DRepUpdate {
        drep: Credential,
        #[serde(default)]
        anchor: Option<Anchor>,
    },
    DRepDeregistration {
        drep: Credential,
        refund: u64,
    },
    CommitteeHotAuth {
        cold: Credential,
        hot: Credential,
    },
    CommitteeResignation {
        cold: Credential,
        #[serde(default)]
        anchor: Option<Anchor>,
    },
}

impl Certificate {
    /// Whether the certificate only exists from the governance era on.
    pub fn is_governance(&self) -> bool {
        matches!(
            self,
            Certificate::DRepRegistration { .. }
                | Certificate::DRepUpdate { .. }
                | Certificate::DRepDeregistration { .. }
                | Certificate::CommitteeHotAuth { .. }
                | Certificate::CommitteeResignation { .. }
        )
    }

    /// Routine name used in logs and error context.
    pub fn routine(&self) -> &'static str {
        match self {
            Certificate::StakeRegistration { .. } => "insert_stake_registration",
            Certificate::StakeDeregistration { .. } => "insert_stake_deregistration",
            Certificate::Delegation { .. } => "insert_delegation",
            Certificate::RegDelegation { .. } => "insert_reg_delegation",
            Certificate::PoolRegistration(_) => "insert_pool_registration",
            Certificate::PoolRetirement { .. } => "insert_pool_retirement",
            Certificate::Mir { .. } => "insert_mir",
            Certificate::GenesisDelegation { .. } => "insert_genesis_delegation",
            Certificate::DRepRegistration { .. } => "insert_drep_registration",
            Certificate::DRepUpdate { .. } => "insert_drep_update",
            Certificate::DRepDeregistration { .. } => "insert_drep_deregistration",
            Certificate::CommitteeHotAuth { .. } => "insert_committee_registration",
            Certificate::CommitteeResignation { .. } => "insert_committee_deregistration",
        }
    }
}

/// A certificate together with its position in the transaction.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxCertificate {
    pub index: u16,
    #[serde(default)]
    pub redeemer_index: Option<u32>,
    pub cert: Certificate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predefined_dreps_have_fixed_views() {
        assert_eq!(DRep::AlwaysAbstain.view(), "drep_always_abstain");
        assert!(DRep::AlwaysNoConfidence.raw().is_none());
        let h = Hash28([7; 28]);
        assert_ne!(DRep::KeyHash(h).view(), DRep::ScriptHash(h).view());
    }

    #[test]
    fn deleg_target_parts() {
        let p = Hash28([1; 28]);
        let both = DelegTarget::PoolAndDRep(p, DRep::AlwaysAbstain);
        assert_eq!(both.pool(), Some(p));
        assert_eq!(both.drep(), Some(DRep::AlwaysAbstain));
        assert_eq!(DelegTarget::Pool(p).drep(), None);
    }

    #[test]
    fn certificate_json_is_tagged() {
        let json = format!(r#"{{"type":"pool_retirement","pool":"{}","epoch":9}}"#, "01".repeat(28));
        let cert: Certificate = serde_json::from_str(&json).unwrap();
        assert_eq!(cert, Certificate::PoolRetirement { pool: Hash28([1; 28]), epoch: 9 });
        assert!(!cert.is_governance());
    }
}
