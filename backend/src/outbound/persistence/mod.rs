//! PostgreSQL persistence adapters using Diesel.
//!
//! Repositories translate between row structs and domain values; no business
//! rule lives here. Connections come from a `bb8` pool through
//! `diesel-async`, and every Diesel failure is mapped onto the owning port's
//! error type.
//!
//! ```ignore
//! use pinledger::outbound::persistence::{DbPool, DieselAccountRepository, PoolConfig};
//!
//! let pool = DbPool::new(PoolConfig::new("postgres://localhost/pinledger")).await?;
//! let accounts = DieselAccountRepository::new(pool);
//! ```

mod diesel_account_repository;
mod diesel_helpers;
mod diesel_upload_repository;
pub(crate) mod models;
mod pool;
pub(crate) mod schema;

pub use diesel_account_repository::DieselAccountRepository;
pub(crate) use diesel_helpers::map_diesel_error;
pub use diesel_upload_repository::DieselUploadRepository;
pub use pool::{DbPool, PoolConfig, PoolError};
