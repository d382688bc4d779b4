//! Synchronous client core for a wiki's `api.php` query/action API.
//!
//! # Overview
//! `ApiClient` merges default parameters into each request, hands it to a
//! caller-supplied `Transport`, decodes the JSON body and classifies the error
//! envelope. It runs the token login handshake and keeps the session cookies
//! in a `KeyValueStore` so a later process can reuse them. `ApiRegistry`
//! groups clients by site code.
//!
//! # Design
//! - The core never touches the network: `Transport` is the I/O boundary,
//!   which keeps every state transition testable with a scripted double.
//! - Persistence goes through `KeyValueStore`, a TTL store with lazy eviction.
//!   `MemoryStore` and `FileStore` ship with the crate.
//! - Everything is blocking and single-threaded per client; mutating methods
//!   take `&mut self`.
//! - An optional `QueryLog` per client records exact parameters and responses.

pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod query_log;
pub mod registry;
pub mod services;
pub mod storage;
pub mod types;

#[cfg(test)]
mod testing;

pub use client::ApiClient;
pub use config::{ClientConfig, ConfigError};
pub use error::{ApiError, TransportError};
pub use http::{Cookies, Headers, HttpMethod, Parameters, RequestOptions, Response, Transport};
pub use query_log::{LogField, LogRecord, QueryLog, QueryLogError};
pub use registry::ApiRegistry;
pub use services::{Pages, SiteInfo};
pub use storage::{Expiry, FileStore, KeyValueStore, MemoryStore, StoreError};
pub use types::{AllPagesContinue, PageList, PageRef};
