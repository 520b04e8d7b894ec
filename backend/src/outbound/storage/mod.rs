//! Content store adapters.
//!
//! A thin HTTP client for the IPFS (Kubo) RPC API implementing the
//! `ContentStore` port.

mod dto;
mod ipfs_http_store;

pub use ipfs_http_store::{DEFAULT_REQUEST_TIMEOUT, IpfsHttpStore};
