//! Certificate dispatch: one insertion routine per certificate variant.

use tracing::debug;

use dbsync_core::certs::{Certificate, DRep, DelegTarget, MirPot, MirTarget, PoolParams, Relay, TxCertificate};
use dbsync_core::constants::{DELEGATION_DELAY, POOL_REGISTRATION_DELAY, POOL_UPDATE_DELAY};
use dbsync_core::error::SyncError;
use dbsync_core::gov::Anchor;
use dbsync_core::schema::{
    keys, AnchorKind, CommitteeDeRegistrationRow, CommitteeRegistrationRow, DbId, DbInt65, DelegationRow,
    DelegationVoteRow, DrepRegistrationRow, PoolMetadataRefRow, PoolOwnerRow, PoolRelayRow, PoolRetireRow,
    PoolUpdateRow, PotTransferRow, ReserveRow, StakeDeregistrationRow, StakeRegistrationRow, TreasuryRow,
};
use dbsync_core::store::{DbStore, DbStoreExt};
use dbsync_core::types::{Credential, Hash28, RedeemerPurpose, StakeAddress};

use crate::block::BlockCtx;
use crate::cache::CacheAction;
use crate::entities;
use crate::governance::voting_anchor;
use crate::offchain::{FetchRequest, PoolFetchRequest};
use crate::tx::{redeemer_ref, RedeemerIds};

/// Insert one certificate. Errors carry the routine of the variant.
pub fn insert_certificate<S: DbStore + ?Sized>(
    ctx: &mut BlockCtx<'_>,
    store: &mut S,
    tx_id: DbId,
    cert: &TxCertificate,
    redeemers: &RedeemerIds,
) -> Result<(), SyncError> {
    dispatch(ctx, store, tx_id, cert, redeemers)
        .map_err(|e| e.in_block(ctx.block.label(), ctx.block.era, cert.cert.routine()))
}

fn dispatch<S: DbStore + ?Sized>(
    ctx: &mut BlockCtx<'_>,
    store: &mut S,
    tx_id: DbId,
    cert: &TxCertificate,
    redeemers: &RedeemerIds,
) -> Result<(), SyncError> {
    let index = cert.index;
    let redeemer_id = redeemer_ref(ctx.env, redeemers, RedeemerPurpose::Cert, cert.redeemer_index)?;
    match &cert.cert {
        Certificate::StakeRegistration { address, deposit } => {
            insert_stake_registration(ctx, store, tx_id, index, address, *deposit)
        }
        Certificate::StakeDeregistration { address, .. } => {
            let cache = &ctx.env.cache;
            let addr_id = entities::stake_address_id(cache, store, address, CacheAction::Evict)?;
            store.insert_row(StakeDeregistrationRow {
                addr_id,
                cert_index: index,
                epoch_no: ctx.epoch_no,
                tx_id,
                redeemer_id,
            })?;
            Ok(())
        }
        Certificate::Delegation { address, target } => {
            insert_delegation(ctx, store, tx_id, index, address, target, redeemer_id)
        }
        Certificate::RegDelegation { address, target, deposit } => {
            insert_stake_registration(ctx, store, tx_id, index, address, Some(*deposit))?;
            insert_delegation(ctx, store, tx_id, index, address, target, redeemer_id)
        }
        Certificate::PoolRegistration(params) => insert_pool_registration(ctx, store, tx_id, index, params),
        Certificate::PoolRetirement { pool, epoch } => {
            let hash_id = entities::pool_id(&ctx.env.cache, store, pool)?;
            store.insert_row(PoolRetireRow {
                hash_id,
                cert_index: index,
                announced_tx_id: tx_id,
                retiring_epoch: *epoch,
            })?;
            Ok(())
        }
        Certificate::Mir { pot, target } => insert_mir(ctx, store, tx_id, index, *pot, target),
        Certificate::GenesisDelegation { genesis, delegate } => {
            debug!(%genesis, %delegate, "genesis delegation not stored");
            Ok(())
        }
        Certificate::DRepRegistration { drep, deposit, anchor } => {
            let deposit = Some(DbInt65::from_i128(*deposit as i128));
            insert_drep(ctx, store, tx_id, index, drep, deposit, anchor.as_ref())
        }
        Certificate::DRepUpdate { drep, anchor } => insert_drep(ctx, store, tx_id, index, drep, None, anchor.as_ref()),
        Certificate::DRepDeregistration { drep, refund } => {
            let deposit = Some(DbInt65::from_i128(-(*refund as i128)));
            insert_drep(ctx, store, tx_id, index, drep, deposit, None)
        }
        Certificate::CommitteeHotAuth { cold, hot } => {
            let cold_key_id = entities::committee_hash_id(store, cold)?;
            let hot_key_id = entities::committee_hash_id(store, hot)?;
            store.insert_row(CommitteeRegistrationRow { tx_id, cert_index: index, cold_key_id, hot_key_id })?;
            Ok(())
        }
        Certificate::CommitteeResignation { cold, anchor } => {
            let cold_key_id = entities::committee_hash_id(store, cold)?;
            let voting_anchor_id = match anchor {
                Some(a) => Some(voting_anchor(ctx, store, a, AnchorKind::CommitteeDereg)?),
                None => None,
            };
            store.insert_row(CommitteeDeRegistrationRow { tx_id, cert_index: index, cold_key_id, voting_anchor_id })?;
            Ok(())
        }
    }
}

fn insert_stake_registration<S: DbStore + ?Sized>(
    ctx: &BlockCtx<'_>,
    store: &mut S,
    tx_id: DbId,
    index: u16,
    address: &StakeAddress,
    deposit: Option<u64>,
) -> Result<(), SyncError> {
    // Fresh registrations are rarely referenced again soon.
    let addr_id = entities::stake_address_id(&ctx.env.cache, store, address, CacheAction::DoNotCache)?;
    let deposit = deposit.or_else(|| ctx.env.state.params().map(|p| p.key_deposit));
    store.insert_row(StakeRegistrationRow { addr_id, cert_index: index, epoch_no: ctx.epoch_no, deposit, tx_id })?;
    Ok(())
}

fn insert_delegation<S: DbStore + ?Sized>(
    ctx: &BlockCtx<'_>,
    store: &mut S,
    tx_id: DbId,
    index: u16,
    address: &StakeAddress,
    target: &DelegTarget,
    redeemer_id: Option<DbId>,
) -> Result<(), SyncError> {
    let addr_id = entities::stake_address_id(&ctx.env.cache, store, address, CacheAction::Cache)?;
    if let Some(pool) = target.pool() {
        let pool_hash_id = entities::pool_id(&ctx.env.cache, store, &pool)?;
        store.insert_row(DelegationRow {
            addr_id,
            cert_index: index,
            pool_hash_id,
            active_epoch_no: ctx.epoch_no + DELEGATION_DELAY,
            tx_id,
            slot_no: ctx.slot_no,
            redeemer_id,
        })?;
    }
    if let Some(drep) = target.drep() {
        let drep_hash_id = entities::drep_hash_id(store, &drep)?;
        store.insert_row(DelegationVoteRow { addr_id, cert_index: index, drep_hash_id, tx_id, redeemer_id })?;
    }
    Ok(())
}

/// Epochs until a pool registration takes effect: a pool already active, or
/// already registered earlier in this block, waits one epoch longer.
pub fn pool_activation_delay(already_registered: bool) -> u64 {
    if already_registered { POOL_UPDATE_DELAY } else { POOL_REGISTRATION_DELAY }
}

fn insert_pool_registration<S: DbStore + ?Sized>(
    ctx: &mut BlockCtx<'_>,
    store: &mut S,
    tx_id: DbId,
    index: u16,
    params: &PoolParams,
) -> Result<(), SyncError> {
    let env = ctx.env;
    let hash_id = entities::pool_id(&env.cache, store, &params.pool)?;

    let already = ctx.apply.is_pool_registered(&params.pool) || ctx.pools_registered.contains(&params.pool);
    ctx.pools_registered.insert(params.pool);
    let delay = pool_activation_delay(already);
    let deposit = if already { None } else { env.state.params().map(|p| p.pool_deposit) };

    let meta_id = match &params.metadata {
        Some(anchor) => Some(pool_metadata_ref(ctx, store, hash_id, &params.pool, anchor, tx_id)?),
        None => None,
    };
    let reward_addr_id = entities::stake_address_id(&env.cache, store, &params.reward_account, CacheAction::Cache)?;

    let update_id = store.insert_row(PoolUpdateRow {
        hash_id,
        cert_index: index,
        vrf_key_hash: params.vrf_key_hash,
        pledge: params.pledge,
        active_epoch_no: ctx.epoch_no + delay,
        meta_id,
        margin: params.margin.to_f64(),
        fixed_cost: params.cost,
        deposit,
        registered_tx_id: tx_id,
        reward_addr_id,
    })?;
    debug!(pool = %params.pool, active_epoch = ctx.epoch_no + delay, "pool registered");

    for owner in &params.owners {
        let addr_id = entities::stake_address_id(&env.cache, store, owner, CacheAction::Cache)?;
        store.insert_row(PoolOwnerRow { addr_id, pool_update_id: update_id })?;
    }
    for relay in &params.relays {
        store.insert_row(relay_row(update_id, relay))?;
    }
    Ok(())
}

fn relay_row(update_id: DbId, relay: &Relay) -> PoolRelayRow {
    let empty = PoolRelayRow { update_id, ipv4: None, ipv6: None, dns_name: None, dns_srv_name: None, port: None };
    match relay {
        Relay::SingleHostAddr { ipv4, ipv6, port } => {
            PoolRelayRow { ipv4: ipv4.clone(), ipv6: ipv6.clone(), port: *port, ..empty }
        }
        Relay::SingleHostName { dns_name, port } => {
            PoolRelayRow { dns_name: Some(dns_name.clone()), port: *port, ..empty }
        }
        Relay::MultiHostName { dns_srv_name } => PoolRelayRow { dns_srv_name: Some(dns_srv_name.clone()), ..empty },
    }
}

/// Metadata reference of a pool, queueing a fetch the first time it is seen.
fn pool_metadata_ref<S: DbStore + ?Sized>(
    ctx: &mut BlockCtx<'_>,
    store: &mut S,
    pool_id: DbId,
    pool: &Hash28,
    anchor: &Anchor,
    tx_id: DbId,
) -> Result<DbId, SyncError> {
    let key = keys::pool_metadata(pool_id, &anchor.url, anchor.data_hash.as_bytes());
    if let Some(id) = store.find::<PoolMetadataRefRow>(&key)? {
        return Ok(id);
    }
    let pmr_id = store.insert_row(PoolMetadataRefRow {
        pool_id,
        url: anchor.url.clone(),
        hash: anchor.data_hash,
        registered_tx_id: tx_id,
    })?;
    if ctx.env.options.offchain_pool_data {
        ctx.fetches.push(FetchRequest::Pool(PoolFetchRequest {
            pool_id,
            pmr_id,
            pool: *pool,
            url: anchor.url.clone(),
            hash: anchor.data_hash,
            retry_count: 0,
        }));
    }
    Ok(pmr_id)
}

fn insert_mir<S: DbStore + ?Sized>(
    ctx: &BlockCtx<'_>,
    store: &mut S,
    tx_id: DbId,
    index: u16,
    pot: MirPot,
    target: &MirTarget,
) -> Result<(), SyncError> {
    match target {
        MirTarget::StakeAddresses(entries) => {
            for (address, amount) in entries {
                let addr_id = entities::stake_address_id(&ctx.env.cache, store, address, CacheAction::Cache)?;
                let amount = DbInt65::from_i128(*amount);
                match pot {
                    MirPot::Reserves => store.insert_row(ReserveRow { addr_id, cert_index: index, amount, tx_id })?,
                    MirPot::Treasury => store.insert_row(TreasuryRow { addr_id, cert_index: index, amount, tx_id })?,
                };
            }
        }
        MirTarget::OtherPot(amount) => {
            let moved = DbInt65::from_i128(*amount as i128);
            let (treasury, reserves) = match pot {
                MirPot::Reserves => (moved, moved.negate()),
                MirPot::Treasury => (moved.negate(), moved),
            };
            store.insert_row(PotTransferRow { cert_index: index, treasury, reserves, tx_id })?;
        }
    }
    Ok(())
}

fn insert_drep<S: DbStore + ?Sized>(
    ctx: &mut BlockCtx<'_>,
    store: &mut S,
    tx_id: DbId,
    index: u16,
    drep: &Credential,
    deposit: Option<DbInt65>,
    anchor: Option<&Anchor>,
) -> Result<(), SyncError> {
    let drep_hash_id = entities::drep_hash_id(store, &DRep::from(*drep))?;
    let voting_anchor_id = match anchor {
        Some(a) => Some(voting_anchor(ctx, store, a, AnchorKind::Drep)?),
        None => None,
    };
    store.insert_row(DrepRegistrationRow { tx_id, cert_index: index, deposit, drep_hash_id, voting_anchor_id })?;
    Ok(())
}
