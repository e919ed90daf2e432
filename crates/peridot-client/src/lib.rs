//! # peridot-client: proxy connection pipeline for `peridot`
//!
//! This crate manages client connections to a peridot proxy. The central type
//! is the [`Processor`]: one managed connection plus a coordinator task that
//! stamps outbound sequences, correlates responses, and expires stragglers.
//!
//! ```text
//! caller ──ProcessRequest──▶ ┌───────────────────────────────┐
//!                            │          Processor            │
//!                            │  coordinator ── PendingTracker│──▶ proxy
//!                            │      │              │         │◀── (TCP/TLS)
//!                            │   writer half    reader task  │
//!                            └───────────────────────────────┘
//! ```
//!
//! The coordinator is the single owner of the pending-request state; it
//! serializes request registration, response matching, and timeout sweeps
//! through one `select!` loop, so the tracker itself needs no locking.
//!
//! ## Usage
//!
//! ```ignore
//! use peridot_client::{Processor, ProcessorConfig, ServiceEndpoint};
//! use peridot_wire::{OpCode, OperationalMessage};
//!
//! let endpoint = ServiceEndpoint::new("proxy.example:5080");
//! let processor = Processor::new(endpoint, "orders", ProcessorConfig::default());
//! processor.start();
//!
//! let op = OperationalMessage::request(OpCode::Set, "", "user:42").with_payload("v1");
//! let response = processor.process_request(op).await?;
//! ```

mod connection;
mod endpoint;
mod error;
mod pem;
mod processor;
mod security;
mod tracker;

pub use endpoint::ServiceEndpoint;
pub use error::{ClientError, ClientResult};
pub use processor::{Processor, ProcessorConfig, ProcessorStats};
pub use security::{SecurityConfig, SecurityContext};
