//! Partitioning primitives
//!
//! - `weighted`: split an extent (or an in-memory sequence) proportionally to weights
//! - `stream`: cut an input sequence into consecutive sub-sequences on demand

pub mod stream;
pub mod weighted;

pub use stream::{partition, Partition, StreamPartitioner};
pub use weighted::{split_weighted, split_weighted_range};
