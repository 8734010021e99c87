//! Governance proposals, votes, anchors, and the epoch-boundary enactment
//! bookkeeping.
//!
//! A proposal may name a predecessor of the same purpose. The predecessor
//! must already be stored; a proposal pointing at an unknown action or at an
//! action of another purpose fails the block.

use serde::Serialize;
use tracing::warn;

use dbsync_core::error::{LookupError, StoreError, SyncError};
use dbsync_core::gov::{Anchor, GovAction, GovActionId, GovPurpose, ProposalProcedure, Voter, VotingProcedure};
use dbsync_core::ledger::EnactState;
use dbsync_core::schema::{
    keys, AnchorKind, CommitteeMemberRow, CommitteeRow, ConstitutionRow, DbId, GovActionProposalRow, ParamProposalRow,
    Table, TreasuryWithdrawalRow, VotingAnchorRow, VotingProcedureRow,
};
use dbsync_core::store::{DbStore, DbStoreExt};

use crate::block::BlockCtx;
use crate::cache::CacheAction;
use crate::entities;
use crate::offchain::{FetchRequest, VoteFetchRequest};

/// Voting anchor id, inserting the anchor (and queueing its document
/// fetch) the first time it is seen.
pub fn voting_anchor<S: DbStore + ?Sized>(
    ctx: &mut BlockCtx<'_>,
    store: &mut S,
    anchor: &Anchor,
    kind: AnchorKind,
) -> Result<DbId, SyncError> {
    let key = keys::anchor(anchor.data_hash.as_bytes(), &anchor.url);
    if let Some(id) = store.find::<VotingAnchorRow>(&key)? {
        return Ok(id);
    }
    let id = store.insert_row(VotingAnchorRow {
        url: anchor.url.clone(),
        data_hash: anchor.data_hash,
        block_id: ctx.block_id,
        kind,
    })?;
    if ctx.env.options.governance {
        ctx.fetches.push(FetchRequest::Vote(VoteFetchRequest {
            voting_anchor_id: id,
            url: anchor.url.clone(),
            hash: anchor.data_hash,
            retry_count: 0,
        }));
    }
    Ok(id)
}

/// Stored id of a governance action, optionally checking its purpose.
pub fn resolve_gov_action<S: DbStore + ?Sized>(
    store: &S,
    id: &GovActionId,
    expected: Option<GovPurpose>,
) -> Result<DbId, SyncError> {
    let missing = || LookupError::GovAction(id.to_string());
    let tx_id = store.lookup(Table::Tx, id.tx_hash.as_bytes())?.ok_or_else(missing)?;
    let gov_id = store.find::<GovActionProposalRow>(&keys::pair(tx_id, id.index as u64))?.ok_or_else(missing)?;
    if let Some(expected) = expected {
        let row = store.fetch::<GovActionProposalRow>(gov_id)?.ok_or_else(missing)?;
        let found = row.kind.purpose();
        if found != expected {
            return Err(LookupError::GovActionPurpose {
                id: id.to_string(),
                found: found.to_string(),
                expected: expected.to_string(),
            }
            .into());
        }
    }
    Ok(gov_id)
}

fn to_json<T: Serialize + ?Sized>(what: &'static str, value: &T) -> Result<String, SyncError> {
    serde_json::to_string(value).map_err(|e| SyncError::Encode { what, reason: e.to_string() })
}

pub fn insert_proposal<S: DbStore + ?Sized>(
    ctx: &mut BlockCtx<'_>,
    store: &mut S,
    tx_id: DbId,
    index: u32,
    proposal: &ProposalProcedure,
) -> Result<DbId, SyncError> {
    let env = ctx.env;
    let action = &proposal.action;
    let kind = action.kind();

    let return_address = entities::stake_address_id(&env.cache, store, &proposal.return_address, CacheAction::Cache)?;
    let voting_anchor_id = voting_anchor(ctx, store, &proposal.anchor, AnchorKind::GovAction)?;
    let prev_gov_action_proposal = match action.prev() {
        Some(prev) => Some(resolve_gov_action(store, &prev, Some(kind.purpose()))?),
        None => None,
    };
    let param_proposal = match action {
        GovAction::ParameterChange { update, .. } => Some(store.insert_row(ParamProposalRow {
            epoch_no: ctx.epoch_no,
            key: None,
            update: update.clone(),
            registered_tx_id: tx_id,
        })?),
        _ => None,
    };
    let expiration = env.state.params().and_then(|p| p.gov_action_lifetime).map(|l| ctx.epoch_no + l);

    let gov_id = store.insert_row(GovActionProposalRow {
        tx_id,
        index,
        prev_gov_action_proposal,
        deposit: proposal.deposit,
        return_address,
        expiration,
        voting_anchor_id,
        kind,
        description: to_json("governance action", action)?,
        param_proposal,
        ratified_epoch: None,
        enacted_epoch: None,
        dropped_epoch: None,
        expired_epoch: None,
    })?;

    match action {
        GovAction::TreasuryWithdrawals { withdrawals, .. } => {
            for (address, amount) in withdrawals {
                let stake_address_id = entities::stake_address_id(&env.cache, store, address, CacheAction::Cache)?;
                store.insert_row(TreasuryWithdrawalRow {
                    gov_action_proposal_id: gov_id,
                    stake_address_id,
                    amount: *amount,
                })?;
            }
        }
        GovAction::UpdateCommittee { added, threshold, .. } => {
            let committee_id = store.insert_row(CommitteeRow {
                gov_action_proposal_id: Some(gov_id),
                quorum_numerator: threshold.numerator,
                quorum_denominator: threshold.denominator,
            })?;
            for (cred, expiration_epoch) in added {
                let committee_hash_id = entities::committee_hash_id(store, cred)?;
                store.insert_row(CommitteeMemberRow {
                    committee_id,
                    committee_hash_id,
                    expiration_epoch: *expiration_epoch,
                })?;
            }
        }
        GovAction::NewConstitution { constitution, .. } => {
            let voting_anchor_id = voting_anchor(ctx, store, &constitution.anchor, AnchorKind::Constitution)?;
            store.insert_row(ConstitutionRow {
                gov_action_proposal_id: Some(gov_id),
                voting_anchor_id,
                script_hash: constitution.script_hash,
            })?;
        }
        GovAction::ParameterChange { .. }
        | GovAction::HardForkInitiation { .. }
        | GovAction::NoConfidence { .. }
        | GovAction::Info => {}
    }
    Ok(gov_id)
}

pub fn insert_vote<S: DbStore + ?Sized>(
    ctx: &mut BlockCtx<'_>,
    store: &mut S,
    tx_id: DbId,
    index: u32,
    vote: &VotingProcedure,
) -> Result<DbId, SyncError> {
    let gov_action_proposal_id = resolve_gov_action(store, &vote.action_id, None)?;
    let (mut committee_voter, mut drep_voter, mut pool_voter) = (None, None, None);
    match &vote.voter {
        Voter::CommitteeHot(cred) => committee_voter = Some(entities::committee_hash_id(store, cred)?),
        Voter::DRep(drep) => drep_voter = Some(entities::drep_hash_id(store, drep)?),
        Voter::Pool(pool) => pool_voter = Some(entities::pool_id(&ctx.env.cache, store, pool)?),
    }
    let voting_anchor_id = match &vote.anchor {
        Some(a) => Some(voting_anchor(ctx, store, a, AnchorKind::Vote)?),
        None => None,
    };
    Ok(store.insert_row(VotingProcedureRow {
        tx_id,
        index,
        gov_action_proposal_id,
        voter_role: vote.voter.role(),
        committee_voter,
        drep_voter,
        pool_voter,
        vote: vote.vote,
        voting_anchor_id,
    })?)
}

/// Record ratification, enactment, dropping, and expiry for the epoch
/// being entered.
///
/// Enacting an action also enacts every not-yet-enacted predecessor on its
/// chain. Unknown action ids are logged and skipped.
pub fn apply_enact_state<S: DbStore + ?Sized>(store: &mut S, epoch_no: u64, enact: &EnactState) -> Result<(), SyncError> {
    for id in &enact.ratified {
        mark(store, id, |row| row.ratified_epoch = Some(epoch_no))?;
    }
    for id in &enact.enacted {
        let Some(mut current) = lookup_or_warn(store, id)? else {
            continue;
        };
        loop {
            let mut row = fetch_proposal(store, current)?;
            if row.enacted_epoch.is_some() {
                break;
            }
            row.enacted_epoch = Some(epoch_no);
            let prev = row.prev_gov_action_proposal;
            store.replace(current, row.into())?;
            match prev {
                Some(p) => current = p,
                None => break,
            }
        }
    }
    for id in &enact.dropped {
        mark(store, id, |row| row.dropped_epoch = Some(epoch_no))?;
    }
    for id in &enact.expired {
        mark(store, id, |row| row.expired_epoch = Some(epoch_no))?;
    }
    Ok(())
}

fn lookup_or_warn<S: DbStore + ?Sized>(store: &S, id: &GovActionId) -> Result<Option<DbId>, SyncError> {
    match resolve_gov_action(store, id, None) {
        Ok(gov_id) => Ok(Some(gov_id)),
        Err(SyncError::Lookup(_)) => {
            warn!(action = %id, "governance action from ledger state not found");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn fetch_proposal<S: DbStore + ?Sized>(store: &S, id: DbId) -> Result<GovActionProposalRow, StoreError> {
    store
        .fetch::<GovActionProposalRow>(id)?
        .ok_or_else(|| StoreError::MissingRow { table: Table::GovActionProposal.name().to_string(), id })
}

fn mark<S: DbStore + ?Sized>(
    store: &mut S,
    id: &GovActionId,
    f: impl FnOnce(&mut GovActionProposalRow),
) -> Result<(), SyncError> {
    if let Some(gov_id) = lookup_or_warn(store, id)? {
        store.modify::<GovActionProposalRow>(gov_id, f)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbsync_core::gov::GovActionKind;
    use dbsync_core::schema::TxRow;
    use dbsync_core::store::MemoryStore;
    use dbsync_core::types::Hash32;

    fn tx_row(seed: u8) -> TxRow {
        TxRow {
            hash: Hash32([seed; 32]),
            block_id: 1,
            block_index: seed as u64,
            out_sum: 0,
            fee: 0,
            deposit: None,
            size: 0,
            invalid_before: None,
            invalid_hereafter: None,
            valid_contract: true,
            script_size: 0,
            treasury_donation: 0,
        }
    }

    fn proposal(tx_id: DbId, kind: GovActionKind, prev: Option<DbId>) -> GovActionProposalRow {
        GovActionProposalRow {
            tx_id,
            index: 0,
            prev_gov_action_proposal: prev,
            deposit: 0,
            return_address: 1,
            expiration: None,
            voting_anchor_id: 1,
            kind,
            description: String::new(),
            param_proposal: None,
            ratified_epoch: None,
            enacted_epoch: None,
            dropped_epoch: None,
            expired_epoch: None,
        }
    }

    fn id(seed: u8) -> GovActionId {
        GovActionId { tx_hash: Hash32([seed; 32]), index: 0 }
    }

    /// Three chained hard-fork proposals in three transactions.
    fn chain() -> (MemoryStore, Vec<DbId>) {
        let mut store = MemoryStore::new();
        let mut ids = Vec::new();
        let mut prev = None;
        for seed in 1..=3 {
            let tx_id = store.insert_row(tx_row(seed)).unwrap();
            let gid = store.insert_row(proposal(tx_id, GovActionKind::HardForkInitiation, prev)).unwrap();
            ids.push(gid);
            prev = Some(gid);
        }
        (store, ids)
    }

    // --- descriptions ---

    #[test]
    fn action_description_is_tagged_json() {
        let action = GovAction::HardForkInitiation { prev: None, major: 10, minor: 0 };
        let json = to_json("governance action", &action).unwrap();
        assert!(json.contains(r#""type":"hard_fork_initiation""#), "{json}");
    }

    #[test]
    fn unencodable_description_is_an_error() {
        let value = std::collections::HashMap::from([((1u8, 2u8), 3u8)]);
        let err = to_json("governance action", &value).unwrap_err();
        assert!(matches!(err, SyncError::Encode { what: "governance action", .. }));
    }

    // --- resolution ---

    #[test]
    fn purpose_mismatch_is_rejected() {
        let (store, _) = chain();
        let err = resolve_gov_action(&store, &id(1), Some(GovPurpose::Constitution)).unwrap_err();
        assert!(matches!(err, SyncError::Lookup(LookupError::GovActionPurpose { .. })));
        assert!(resolve_gov_action(&store, &id(1), Some(GovPurpose::HardFork)).is_ok());
    }

    #[test]
    fn unknown_action_is_a_lookup_error() {
        let (store, _) = chain();
        let err = resolve_gov_action(&store, &id(9), None).unwrap_err();
        assert!(matches!(err, SyncError::Lookup(LookupError::GovAction(_))));
    }

    // --- enactment ---

    #[test]
    fn enactment_walks_the_chain() {
        let (mut store, ids) = chain();
        let enact = EnactState { enacted: vec![id(3)], ratified: vec![id(3)], ..EnactState::default() };
        apply_enact_state(&mut store, 7, &enact).unwrap();
        for gid in &ids {
            let row: GovActionProposalRow = store.fetch(*gid).unwrap().unwrap();
            assert_eq!(row.enacted_epoch, Some(7));
        }
        let last: GovActionProposalRow = store.fetch(ids[2]).unwrap().unwrap();
        assert_eq!(last.ratified_epoch, Some(7));
    }

    #[test]
    fn enactment_stops_at_enacted_predecessor() {
        let (mut store, ids) = chain();
        apply_enact_state(&mut store, 5, &EnactState { enacted: vec![id(1)], ..EnactState::default() }).unwrap();
        apply_enact_state(&mut store, 6, &EnactState { enacted: vec![id(3)], ..EnactState::default() }).unwrap();
        let first: GovActionProposalRow = store.fetch(ids[0]).unwrap().unwrap();
        let second: GovActionProposalRow = store.fetch(ids[1]).unwrap().unwrap();
        assert_eq!(first.enacted_epoch, Some(5));
        assert_eq!(second.enacted_epoch, Some(6));
    }

    #[test]
    fn unknown_ids_are_skipped() {
        let (mut store, _) = chain();
        let enact = EnactState { dropped: vec![id(42)], expired: vec![id(2)], ..EnactState::default() };
        apply_enact_state(&mut store, 3, &enact).unwrap();
        let rows = store.rows::<GovActionProposalRow>().unwrap();
        assert_eq!(rows[1].1.expired_epoch, Some(3));
        assert!(rows.iter().all(|(_, r)| r.dropped_epoch.is_none()));
    }
}
