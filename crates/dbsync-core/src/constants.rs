//! Protocol and pipeline constants.

/// Security parameter (maximum rollback depth) of mainnet.
pub const DEFAULT_SECURITY_PARAM: u64 = 2160;

/// Capacity of each off-chain work and result queue.
pub const QUEUE_CAPACITY: usize = 100;

/// Blocks between two progress log lines when far from the tip.
pub const LOG_INTERVAL_BLOCKS: u64 = 5000;

/// Blocks from the tip within which every block is logged.
pub const NEAR_TIP_BLOCKS: u64 = 10;

/// Blocks from the tip within which a reverse index is kept.
pub const DEFAULT_REVERSE_INDEX_WINDOW: u64 = 2160;

/// Delay before a delegation takes effect, in epochs.
pub const DELEGATION_DELAY: u64 = 2;

/// Activation delay of a first pool registration, in epochs.
pub const POOL_REGISTRATION_DELAY: u64 = 2;

/// Activation delay of a pool re-registration, in epochs.
pub const POOL_UPDATE_DELAY: u64 = 3;

/// Default capacities of the entity cache classes.
pub const DEFAULT_STAKE_CACHE: usize = 160_000;
pub const DEFAULT_POOL_CACHE: usize = 8_000;
pub const DEFAULT_BLOCK_CACHE: usize = 2_160;
pub const DEFAULT_DATUM_CACHE: usize = 250_000;
pub const DEFAULT_MULTI_ASSET_CACHE: usize = 250_000;
pub const DEFAULT_ADDRESS_CACHE: usize = 50_000;

/// Largest off-chain document fetched, in bytes.
pub const MAX_OFFCHAIN_BYTES: usize = 3_000;

/// Durable key of the bootstrap state marker.
pub const BOOTSTRAP_META_KEY: &str = "bootstrap.state";
