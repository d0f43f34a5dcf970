pub mod block;
pub mod coalesce;
pub mod mshr;
pub mod push;
pub mod queues;
pub mod tile;
mod unit_tests;
pub mod wle;
pub mod work;

pub use block::Block;
pub use coalesce::{CoalesceConfig, CoalesceEngine, CoalesceSink, CoalesceStats};
pub use mshr::MshrTable;
pub use push::{PushConfig, PushEngine, PushStats};
pub use queues::{MemFn, MemFnEntry, PostPushWbQueue, ResponseQueue};
pub use tile::Tile;
pub use wle::{WlConfig, WlStats, WorkListEngine};
pub use work::WorkTracker;
