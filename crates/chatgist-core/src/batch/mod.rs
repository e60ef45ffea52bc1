//! Batch partitioning for summarization requests.

pub mod partition;

pub use partition::{BatchBudget, Batches, message_weight, partition};
