//! # irm-client
//!
//! Async IMS Connect client built on `irm-protocol`.
//!
//! This crate provides:
//! - Sessions over plain TCP or TLS with read-until-declared-length framing
//! - The ACK sub-protocol for output that requires acknowledgment
//! - Transaction workers that pair each request with its response
//! - A worker pool sharing one request queue across N sessions

pub mod ack;
pub mod connection;
pub mod error;
pub mod pool;
pub mod tls;
pub mod worker;

pub use ack::{AckCoordinator, AckOutcome};
pub use connection::{connect, ConnectionConfig, ImsStream, Session, TlsClientConfig};
pub use error::ClientError;
pub use pool::{PoolConfig, PoolParts, WorkerPool};
pub use worker::{Worker, WorkerConfig, WorkerReport, WorkerState, WorkerStats};
