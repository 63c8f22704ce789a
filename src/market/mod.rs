pub mod batching;
pub mod filters;
pub mod merge;
pub mod normalize;
pub mod pipeline;
pub mod scanner_api;
pub mod store;
pub mod subscriptions;
pub mod transport;
pub mod types;
pub mod wire;

pub const SCANNER_PAIRS_EVENT: &str = "scanner-pairs";
pub const PAIR_STATS_EVENT: &str = "pair-stats";
pub const TICK_EVENT: &str = "tick";
