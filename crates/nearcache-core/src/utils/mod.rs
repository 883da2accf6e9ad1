//! Small self-contained helpers shared across the crate.
//!
//! ## Hashing (`murmur`)
//! - MurmurHash3 x86_32, the partition hash applied to key tokens
//! - Must match the cluster's own hashing so partition ids line up

pub mod murmur;

pub use murmur::{murmur3_x86_32, DEFAULT_MURMUR_SEED};
