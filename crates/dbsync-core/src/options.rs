//! Feature flags controlling which categories of rows are produced.

use serde::{Deserialize, Serialize};

/// Which parts of the chain are projected.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct InsertOptions {
    /// Track inputs and outputs at all.
    pub inputs_outputs: bool,
    /// Consume ledger-derived data (deposits, epoch snapshots).
    pub use_ledger_data: bool,
    pub shelley_certs: bool,
    pub rewards: bool,
    pub multi_assets: bool,
    pub metadata: bool,
    /// Only keep metadata with these labels; `None` keeps all.
    pub metadata_keys: Option<Vec<u64>>,
    /// Datums, redeemers, scripts, and collateral.
    pub plutus_extra: bool,
    pub offchain_pool_data: bool,
    pub governance: bool,
}

impl Default for InsertOptions {
    fn default() -> Self {
        Self {
            inputs_outputs: true,
            use_ledger_data: true,
            shelley_certs: true,
            rewards: true,
            multi_assets: true,
            metadata: true,
            metadata_keys: None,
            plutus_extra: true,
            offchain_pool_data: true,
            governance: true,
        }
    }
}

impl InsertOptions {
    /// Everything off except blocks and transactions.
    pub fn minimal() -> Self {
        Self {
            inputs_outputs: false,
            use_ledger_data: false,
            shelley_certs: false,
            rewards: false,
            multi_assets: false,
            metadata: false,
            metadata_keys: None,
            plutus_extra: false,
            offchain_pool_data: false,
            governance: false,
        }
    }

    /// Whether metadata with this label is stored.
    pub fn keeps_metadata_key(&self, key: u64) -> bool {
        self.metadata && self.metadata_keys.as_ref().is_none_or(|keys| keys.contains(&key))
    }
}

/// How outputs are tracked once spent.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct TxOutOptions {
    /// Record which transaction consumed each output.
    pub consumed: bool,
    /// Periodically delete consumed outputs.
    pub prune: bool,
    /// Defer UTxO population until the tip is reached.
    pub bootstrap: bool,
    /// Populate `tx_in` even when consumption is tracked on outputs.
    pub force_tx_in: bool,
}

/// Output-tracking policy derived from [`TxOutOptions`] and whether
/// bootstrap is active.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PruneConsumeMigration {
    pub prune_tx_out: bool,
    pub consume_or_prune_tx_out: bool,
    pub skip_tx_in: bool,
}

impl PruneConsumeMigration {
    pub fn derive(consumed: bool, prune: bool, bootstrap: bool, force_tx_in: bool) -> Self {
        let prune_tx_out = prune || bootstrap;
        let consume_or_prune_tx_out = consumed || prune_tx_out;
        Self {
            prune_tx_out,
            consume_or_prune_tx_out,
            skip_tx_in: consume_or_prune_tx_out && !force_tx_in,
        }
    }

    pub fn from_options(opts: &TxOutOptions, bootstrap_active: bool) -> Self {
        Self::derive(opts.consumed, opts.prune, bootstrap_active, opts.force_tx_in)
    }
}

/// Blocks behind the tip before a consumed output may be pruned.
pub fn safe_block_diff(security_param: u64) -> u64 {
    2 * security_param
}

/// Blocks between two pruning passes.
pub fn prune_interval(security_param: u64) -> u64 {
    10 * security_param
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn bootstrap_implies_prune() {
        let m = PruneConsumeMigration::derive(false, false, true, false);
        assert!(m.prune_tx_out);
        assert!(m.consume_or_prune_tx_out);
        assert!(m.skip_tx_in);
    }

    #[test]
    fn force_tx_in_keeps_inputs() {
        let m = PruneConsumeMigration::derive(true, false, false, true);
        assert!(m.consume_or_prune_tx_out);
        assert!(!m.skip_tx_in);
    }

    #[test]
    fn metadata_allow_list() {
        let opts = InsertOptions { metadata_keys: Some(vec![674]), ..InsertOptions::default() };
        assert!(opts.keeps_metadata_key(674));
        assert!(!opts.keeps_metadata_key(721));
        assert!(InsertOptions::default().keeps_metadata_key(721));
        assert!(!InsertOptions::minimal().keeps_metadata_key(674));
    }

    #[test]
    fn thresholds_scale_with_k() {
        assert_eq!(safe_block_diff(2160), 4320);
        assert_eq!(prune_interval(2160), 21_600);
    }

    proptest! {
        #[test]
        fn derivation_is_pure(c: bool, p: bool, b: bool, f: bool) {
            let a = PruneConsumeMigration::derive(c, p, b, f);
            prop_assert_eq!(a, PruneConsumeMigration::derive(c, p, b, f));
            if a.prune_tx_out {
                prop_assert!(a.consume_or_prune_tx_out);
            }
            if a.skip_tx_in {
                prop_assert!(!f);
            }
        }

        #[test]
        fn spent_inputs_always_leave_a_trace(c: bool, p: bool, b: bool, f: bool) {
            // Either tx_in rows are written or outputs record their consumer.
            let m = PruneConsumeMigration::derive(c, p, b, f);
            prop_assert!(!m.skip_tx_in || m.consume_or_prune_tx_out);
        }
    }
}
