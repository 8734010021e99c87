//! Transaction processor.
//!
//! Turns one validated transaction into its row set. Fee and deposit are
//! taken from the ledger when known and derived from resolved input values
//! otherwise. Inputs are resolved only as far as the selected strategy and
//! the output-tracking policy need.
//!
//! A transaction whose phase-2 validation failed settles only its
//! collateral: collateral inputs are spent, the collateral return is
//! produced, and nothing else of the body is stored.

use std::collections::HashMap;

use tracing::trace;

use dbsync_core::cbor;
use dbsync_core::error::{LookupError, SyncError};
use dbsync_core::schema::{
    keys, CollateralTxInRow, CollateralTxOutRow, DbId, DbInt65, ExtraKeyWitnessRow, MaTxMintRow, MaTxOutRow,
    ParamProposalRow, RedeemerRow, ReferenceTxInRow, Table, TxInRow, TxMetadataRow, TxOutRow, TxRow,
    WithdrawalRow,
};
use dbsync_core::store::{DbStore, DbStoreExt};
use dbsync_core::types::{OutDatum, RedeemerPurpose, Tx, TxIn, TxOut};

use crate::batch::OutputRef;
use crate::block::BlockCtx;
use crate::cache::CacheAction;
use crate::certificate::insert_certificate;
use crate::entities;
use crate::governance::{insert_proposal, insert_vote};
use crate::state::SyncEnv;

/// Redeemer ids of one transaction keyed by `(purpose, index)`.
pub type RedeemerIds = HashMap<(RedeemerPurpose, u32), DbId>;

/// What the stored transaction row ended up with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxSummary {
    pub tx_id: DbId,
    pub fee: u64,
    pub out_sum: u128,
    pub deposit: Option<i64>,
}

/// How fee and deposit are obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FeeStrategy {
    /// Input/output tracking is off; take what the body and ledger say.
    Untracked,
    /// Fee and deposit both known; inputs are resolved only for their rows.
    Known { fee: u64, deposit: i64 },
    /// Fee known; deposit is what the inputs and withdrawals do not explain.
    DeriveDeposit { fee: u64 },
    /// Fee absent; derived from input and output values.
    DeriveFee,
}

/// A spent input resolved against the batch or the store.
struct ResolvedInput<'t> {
    input: &'t TxIn,
    producer: DbId,
    output: Option<OutputRef>,
    value: Option<u64>,
}

fn io_tracked(env: &SyncEnv) -> bool {
    env.options.inputs_outputs && !env.state.bootstrap_active()
}

fn fee_strategy(env: &SyncEnv, ctx: &BlockCtx<'_>, tx: &Tx) -> FeeStrategy {
    if !io_tracked(env) {
        return FeeStrategy::Untracked;
    }
    let ledger_deposit = if env.options.use_ledger_data { ctx.apply.deposit_for(&tx.hash) } else { None };
    match (tx.fees, ledger_deposit) {
        (Some(fee), Some(deposit)) => FeeStrategy::Known { fee, deposit },
        (Some(fee), None) => FeeStrategy::DeriveDeposit { fee },
        (None, _) => FeeStrategy::DeriveFee,
    }
}

fn resolve_input<'t, S: DbStore + ?Sized>(
    ctx: &BlockCtx<'_>,
    store: &S,
    input: &'t TxIn,
    need_value: bool,
) -> Result<ResolvedInput<'t>, SyncError> {
    let producer = store
        .lookup(Table::Tx, input.tx_hash.as_bytes())?
        .ok_or_else(|| LookupError::Tx(input.tx_hash.to_hex()))?;

    if let Some((pos, row)) = ctx.batch.pending_out(producer, input.index) {
        return Ok(ResolvedInput { input, producer, output: Some(OutputRef::Pending(pos)), value: Some(row.value) });
    }
    match store.find::<TxOutRow>(&keys::pair(producer, input.index))? {
        Some(id) => {
            let value = if need_value { store.fetch::<TxOutRow>(id)?.map(|o| o.value) } else { None };
            Ok(ResolvedInput { input, producer, output: Some(OutputRef::Stored(id)), value })
        }
        None => Ok(ResolvedInput { input, producer, output: None, value: None }),
    }
}

/// Sum of resolved values, `None` if any value is unknown.
fn input_sum(inputs: &[ResolvedInput<'_>]) -> Option<u128> {
    inputs.iter().map(|i| i.value.map(u128::from)).sum()
}

/// Fee and deposit for the transaction under the selected strategy.
fn settle_fee(strategy: FeeStrategy, tx: &Tx, inputs: &[ResolvedInput<'_>], ledger_deposit: Option<i64>) -> (u64, Option<i64>) {
    let out_sum = tx.out_sum() as i128;
    let withdrawals = tx.withdrawal_sum() as i128;
    match strategy {
        FeeStrategy::Untracked => (tx.fees.unwrap_or(0), ledger_deposit),
        FeeStrategy::Known { fee, deposit } => (fee, Some(deposit)),
        FeeStrategy::DeriveDeposit { fee } => {
            let deposit = input_sum(inputs)
                .and_then(|total| i64::try_from(total as i128 + withdrawals - out_sum - fee as i128).ok());
            (fee, deposit)
        }
        FeeStrategy::DeriveFee => match input_sum(inputs) {
            Some(total) => {
                let fee = (total as i128 + withdrawals - out_sum).max(0);
                (u64::try_from(fee).unwrap_or(u64::MAX), Some(0))
            }
            None => (0, None),
        },
    }
}

/// Insert a transaction and everything it carries.
pub fn insert_tx<S: DbStore + ?Sized>(ctx: &mut BlockCtx<'_>, store: &mut S, tx: &Tx) -> Result<TxSummary, SyncError> {
    let env = ctx.env;
    let strategy = fee_strategy(env, ctx, tx);

    let need_value = matches!(strategy, FeeStrategy::DeriveDeposit { .. } | FeeStrategy::DeriveFee);
    let resolve = !matches!(strategy, FeeStrategy::Untracked);
    let mut inputs = Vec::new();
    if resolve {
        for input in tx.spent_inputs() {
            inputs.push(resolve_input(ctx, store, input, need_value)?);
        }
    }

    let ledger_deposit = if env.options.use_ledger_data { ctx.apply.deposit_for(&tx.hash) } else { None };
    let (fee, deposit) = settle_fee(strategy, tx, &inputs, ledger_deposit);
    let out_sum = tx.out_sum();

    let tx_id = store.insert_row(TxRow {
        hash: tx.hash,
        block_id: ctx.block_id,
        block_index: tx.block_index,
        out_sum,
        fee,
        deposit,
        size: tx.size,
        invalid_before: tx.invalid_before,
        invalid_hereafter: tx.invalid_hereafter,
        valid_contract: tx.valid_contract,
        script_size: tx.script_size(),
        treasury_donation: tx.treasury_donation,
    })?;
    trace!(tx = %tx.hash, tx_id, fee, ?deposit, "tx inserted");

    if io_tracked(env) {
        for out in tx.produced_outputs() {
            let (row, assets) = output_row(ctx.env, store, tx_id, out)?;
            ctx.batch.push_out(row, assets);
        }
    }

    let redeemers = if tx.valid_contract && env.options.plutus_extra {
        insert_redeemers(store, tx_id, tx)?
    } else {
        RedeemerIds::new()
    };

    if io_tracked(env) {
        for resolved in &inputs {
            spend_input(ctx, tx_id, resolved, &redeemers)?;
        }
    }

    if !tx.valid_contract {
        return Ok(TxSummary { tx_id, fee, out_sum, deposit });
    }

    if env.options.plutus_extra {
        for datum in &tx.datums {
            entities::datum_id(&env.cache, store, tx_id, datum)?;
        }
        if io_tracked(env) {
            insert_collateral(ctx, store, tx_id, tx)?;
        }
    }

    for meta in &tx.metadata {
        if env.options.keeps_metadata_key(meta.key) {
            ctx.batch.push_metadata(TxMetadataRow {
                key: meta.key,
                json: cbor::to_json(&meta.bytes),
                bytes: meta.bytes.clone(),
                tx_id,
            });
        }
    }

    if env.options.shelley_certs {
        for cert in &tx.certificates {
            if cert.cert.is_governance() && !env.options.governance {
                continue;
            }
            insert_certificate(ctx, store, tx_id, cert, &redeemers)?;
        }
        for w in &tx.withdrawals {
            let addr_id = entities::stake_address_id(&env.cache, store, &w.address, CacheAction::Cache)?;
            let redeemer_id = redeemer_ref(env, &redeemers, RedeemerPurpose::Reward, w.redeemer_index)?;
            store.insert_row(WithdrawalRow { addr_id, amount: w.amount, redeemer_id, tx_id })?;
        }
        for p in &tx.param_proposals {
            store.insert_row(ParamProposalRow {
                epoch_no: p.epoch_no,
                key: Some(p.key),
                update: p.update.clone(),
                registered_tx_id: tx_id,
            })?;
        }
    }

    if env.options.multi_assets {
        for m in &tx.mint {
            let ident = entities::multi_asset_id(&env.cache, store, &m.policy, &m.name)?;
            ctx.batch.push_mint(MaTxMintRow { ident, quantity: DbInt65::from_i128(m.quantity), tx_id });
        }
    }

    if env.options.plutus_extra {
        for script in &tx.scripts {
            entities::script_id(store, tx_id, script)?;
        }
        for hash in &tx.extra_key_witnesses {
            store.insert_row(ExtraKeyWitnessRow { hash: *hash, tx_id })?;
        }
    }

    if env.options.governance {
        for (index, proposal) in tx.proposals.iter().enumerate() {
            insert_proposal(ctx, store, tx_id, index as u32, proposal)?;
        }
        for (index, vote) in tx.votes.iter().enumerate() {
            insert_vote(ctx, store, tx_id, index as u32, vote)?;
        }
    }

    Ok(TxSummary { tx_id, fee, out_sum, deposit })
}

fn spend_input(
    ctx: &mut BlockCtx<'_>,
    tx_id: DbId,
    resolved: &ResolvedInput<'_>,
    redeemers: &RedeemerIds,
) -> Result<(), SyncError> {
    let migration = ctx.env.state.migration();
    if migration.consume_or_prune_tx_out {
        let output = resolved.output.ok_or_else(|| LookupError::TxOut {
            tx: resolved.input.tx_hash.to_hex(),
            index: resolved.input.index,
        })?;
        ctx.batch.mark_consumed(output, tx_id);
    }
    if !migration.skip_tx_in {
        let redeemer_id = redeemer_ref(ctx.env, redeemers, RedeemerPurpose::Spend, resolved.input.redeemer_index)?;
        ctx.batch.push_in(TxInRow {
            tx_in_id: tx_id,
            tx_out_id: resolved.producer,
            tx_out_index: resolved.input.index,
            redeemer_id,
        });
    }
    Ok(())
}

fn insert_redeemers<S: DbStore + ?Sized>(store: &mut S, tx_id: DbId, tx: &Tx) -> Result<RedeemerIds, SyncError> {
    let mut ids = RedeemerIds::new();
    for r in &tx.redeemers {
        let redeemer_data_id = entities::redeemer_data_id(store, tx_id, &r.data)?;
        let id = store.insert_row(RedeemerRow {
            tx_id,
            unit_mem: r.unit_mem,
            unit_steps: r.unit_steps,
            fee: r.fee,
            purpose: r.purpose,
            index: r.index,
            script_hash: r.script_hash,
            redeemer_data_id,
        })?;
        ids.insert((r.purpose, r.index), id);
    }
    Ok(ids)
}

/// Redeemer id referenced by an input, withdrawal, or certificate.
///
/// A reference to a redeemer the transaction does not carry is an error,
/// unless redeemers are not being stored at all.
pub fn redeemer_ref(
    env: &SyncEnv,
    redeemers: &RedeemerIds,
    purpose: RedeemerPurpose,
    index: Option<u32>,
) -> Result<Option<DbId>, SyncError> {
    let Some(index) = index else {
        return Ok(None);
    };
    if !env.options.plutus_extra {
        return Ok(None);
    }
    match redeemers.get(&(purpose, index)) {
        Some(id) => Ok(Some(*id)),
        None => Err(LookupError::Redeemer { purpose: purpose.to_string(), index }.into()),
    }
}

fn insert_collateral<S: DbStore + ?Sized>(
    ctx: &mut BlockCtx<'_>,
    store: &mut S,
    tx_id: DbId,
    tx: &Tx,
) -> Result<(), SyncError> {
    for input in &tx.collateral_inputs {
        let producer = producer_id(store, input)?;
        store.insert_row(CollateralTxInRow { tx_in_id: tx_id, tx_out_id: producer, tx_out_index: input.index })?;
    }
    for input in &tx.reference_inputs {
        let producer = producer_id(store, input)?;
        store.insert_row(ReferenceTxInRow { tx_in_id: tx_id, tx_out_id: producer, tx_out_index: input.index })?;
    }
    if let Some(out) = &tx.collateral_output {
        let (row, _) = output_row(ctx.env, store, tx_id, out)?;
        let multi_assets_descr = out
            .assets
            .iter()
            .map(|a| format!("{}.{}:{}", a.policy, hex::encode(&a.name), a.quantity))
            .collect::<Vec<_>>()
            .join(",");
        store.insert_row(CollateralTxOutRow {
            tx_id,
            index: row.index,
            address_id: row.address_id,
            stake_address_id: row.stake_address_id,
            value: row.value,
            data_hash: row.data_hash,
            inline_datum_id: row.inline_datum_id,
            reference_script_id: row.reference_script_id,
            multi_assets_descr,
        })?;
    }
    Ok(())
}

fn producer_id<S: DbStore + ?Sized>(store: &S, input: &TxIn) -> Result<DbId, SyncError> {
    Ok(store
        .lookup(Table::Tx, input.tx_hash.as_bytes())?
        .ok_or_else(|| LookupError::Tx(input.tx_hash.to_hex()))?)
}

/// Build an output row and its asset list, inserting the entities it
/// references (addresses, datums, scripts, assets) on the way.
pub fn output_row<S: DbStore + ?Sized>(
    env: &SyncEnv,
    store: &mut S,
    tx_id: DbId,
    out: &TxOut,
) -> Result<(TxOutRow, Vec<(DbId, u64)>), SyncError> {
    let stake_address_id = match &out.address.stake {
        Some(stake) => Some(entities::stake_address_id(&env.cache, store, stake, CacheAction::Cache)?),
        None => None,
    };
    let address_id = entities::address_id(&env.cache, store, &out.address, stake_address_id)?;

    let (data_hash, inline_datum_id) = match &out.datum {
        None => (None, None),
        Some(OutDatum::Hash(h)) => (Some(*h), None),
        Some(OutDatum::Inline(d)) => {
            let id = if env.options.plutus_extra { Some(entities::datum_id(&env.cache, store, tx_id, d)?) } else { None };
            (Some(d.hash), id)
        }
    };
    let reference_script_id = match &out.reference_script {
        Some(script) if env.options.plutus_extra => Some(entities::script_id(store, tx_id, script)?),
        _ => None,
    };

    let mut assets = Vec::new();
    if env.options.multi_assets {
        for a in &out.assets {
            assets.push((entities::multi_asset_id(&env.cache, store, &a.policy, &a.name)?, a.quantity));
        }
    }

    let row = TxOutRow {
        tx_id,
        index: out.index,
        address_id,
        stake_address_id,
        value: out.value,
        data_hash,
        inline_datum_id,
        reference_script_id,
        consumed_by_tx_id: None,
    };
    Ok((row, assets))
}

/// Insert one output with its assets immediately, bypassing the batch.
/// Used for the ledger UTxO handed over at the end of bootstrap.
pub fn insert_output_now<S: DbStore + ?Sized>(
    env: &SyncEnv,
    store: &mut S,
    tx_id: DbId,
    out: &TxOut,
) -> Result<DbId, SyncError> {
    let (row, assets) = output_row(env, store, tx_id, out)?;
    let out_id = store.insert_row(row)?;
    for (ident, quantity) in assets {
        store.insert_row(MaTxOutRow { ident, quantity, tx_out_id: out_id })?;
    }
    Ok(out_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbsync_core::types::{Address, Hash32};

    fn out(index: u64, value: u64) -> TxOut {
        TxOut {
            index,
            address: Address { raw: vec![index as u8], view: "addr".into(), payment: None, stake: None },
            value,
            assets: vec![],
            datum: None,
            reference_script: None,
        }
    }

    fn resolved(input: &TxIn, value: Option<u64>) -> ResolvedInput<'_> {
        ResolvedInput { input, producer: 1, output: None, value }
    }

    fn input() -> TxIn {
        TxIn { tx_hash: Hash32([1; 32]), index: 0, redeemer_index: None }
    }

    // --- settle_fee ---

    #[test]
    fn derived_deposit_is_the_unexplained_remainder() {
        let i = input();
        let tx = Tx { fees: Some(10), outputs: vec![out(0, 80)], ..Tx::default() };
        let (fee, deposit) = settle_fee(FeeStrategy::DeriveDeposit { fee: 10 }, &tx, &[resolved(&i, Some(100))], None);
        assert_eq!((fee, deposit), (10, Some(10)));
    }

    #[test]
    fn unresolved_value_leaves_deposit_unknown() {
        let i = input();
        let tx = Tx { fees: Some(10), outputs: vec![out(0, 80)], ..Tx::default() };
        let (_, deposit) = settle_fee(FeeStrategy::DeriveDeposit { fee: 10 }, &tx, &[resolved(&i, None)], None);
        assert_eq!(deposit, None);
    }

    #[test]
    fn derived_fee_is_floored_at_zero() {
        let i = input();
        let tx = Tx { outputs: vec![out(0, 150)], ..Tx::default() };
        assert_eq!(settle_fee(FeeStrategy::DeriveFee, &tx, &[resolved(&i, Some(100))], None), (0, Some(0)));
        let tx = Tx { outputs: vec![out(0, 60)], ..Tx::default() };
        assert_eq!(settle_fee(FeeStrategy::DeriveFee, &tx, &[resolved(&i, Some(100))], None), (40, Some(0)));
    }

    #[test]
    fn untracked_uses_body_and_ledger() {
        let tx = Tx { fees: Some(7), ..Tx::default() };
        assert_eq!(settle_fee(FeeStrategy::Untracked, &tx, &[], Some(2_000_000)), (7, Some(2_000_000)));
        let tx = Tx::default();
        assert_eq!(settle_fee(FeeStrategy::Untracked, &tx, &[], None), (0, None));
    }

    #[test]
    fn failed_tx_fee_counts_collateral_only() {
        let i = input();
        let tx = Tx {
            valid_contract: false,
            outputs: vec![out(0, 1_000)],
            collateral_output: Some(out(1, 70)),
            ..Tx::default()
        };
        assert_eq!(settle_fee(FeeStrategy::DeriveFee, &tx, &[resolved(&i, Some(100))], None), (30, Some(0)));
    }
}
