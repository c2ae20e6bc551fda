//! Buffer pooling for the per-frame hot path.

mod buffer_pool;

pub use buffer_pool::{BufferPool, PoolStats, Pooled};
