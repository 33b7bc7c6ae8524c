//! The API of simpool-core.

mod backing;
mod configuration;
mod error;
mod pool;

pub use backing::BackingAllocator;
pub use configuration::{
    Configuration, ReclaimPolicy, DEFAULT_MIN_GROWTH_BYTES, DEFAULT_MIN_INITIAL_BYTES, DEFAULT_MIN_USAGE_THRESHOLD,
    DEFAULT_USAGE_THRESHOLD_FLOOR,
};
pub use error::{Error, Result};
pub use pool::DynamicPool;
