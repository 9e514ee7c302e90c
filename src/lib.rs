//! A client-side HTTP/1.1 wire engine: redirects are surfaced verbatim
//! rather than auto-followed, response bodies are lazy and at-most-once
//! consumable, and a per-origin pool reuses connections subject to
//! concurrency and idle-timeout bounds.
//!
//! HTTP/2, automatic redirect following, cookies, caching, retries, and
//! multipart encoding are explicitly out of scope — see the module-level
//! docs on [`agent`] and [`pool`] for what each subsystem owns.

pub mod agent;
pub mod body;
pub mod client;
pub mod codec;
pub mod config;
pub mod connect;
pub mod error;
pub mod http;
pub mod origin;
pub mod pool;

pub use agent::Agent;
pub use body::{Blob, Body};
pub use client::Client;
pub use config::{ClientConfig, IdleTimeout, PoolConfig};
pub use connect::{Connector, DirectConnector};
pub use error::{Error, Kind, Result};
pub use http::request::{Request, RequestBody};
pub use http::response::Response;
pub use origin::{Origin, Scheme};
pub use pool::Pool;
