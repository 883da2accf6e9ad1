//! Mock Infrastructure for Testing the Near Cache
//!
//! This module provides an in-process cluster that stands in for every collaborator
//! the near cache consumes, so invalidation flows can be driven deterministically.
//!
//! ## Components
//!
//! - `MockCluster`: owns server-side invalidation sequences and partition guids, delivers
//!   events to subscribed handlers, and can drop events or fail members on demand
//! - Test helpers for keys, values and logging
//!
//! ## Usage
//!
//! ```ignore
//! use tests::mock_infrastructure::{key, MockCluster};
//!
//! let cluster = MockCluster::new(3, 31);
//! let manager = NearCacheManager::new(options, cluster.context(client_id))?;
//!
//! // A write on another client invalidates the cached entry
//! cluster.write("users", &key("alice"), remote_client);
//! ```

pub mod cluster_mock;
pub mod test_helpers;

pub use cluster_mock::MockCluster;
pub use test_helpers::*;
