//! Sluice test utilities.
//!
//! - [`FakeConnector`]: in-memory transport that counts every session and
//!   cursor it opens and can fail on demand
//! - [`fixtures`]: the `users`/`orders` store and a matching config
//! - `postgres` (feature `docker-tests`): isolated schemas on a live server
//!
//! # Usage
//!
//! ```rust,ignore
//! use sluice_test_utils::fixtures;
//! use sluice_source::ConnectionManager;
//! use std::sync::Arc;
//!
//! let fake = fixtures::users_and_orders().fail_describe("orders").build();
//! let manager = ConnectionManager::new(Arc::new(fake.clone()));
//! // ... drive discover/read ...
//! assert!(fake.stats().all_released());
//! ```

pub mod fake;
pub mod fixtures;

#[cfg(feature = "docker-tests")]
pub mod postgres;

pub use fake::{FakeColumn, FakeConnector, FakeDialect, FakeStats, FakeStoreBuilder, FakeTable};
pub use fixtures::{test_config, users_and_orders, TEST_PASSWORD};

#[cfg(feature = "docker-tests")]
pub use postgres::{PgTestSchema, TestPgConfig};
