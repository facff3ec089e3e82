//! # fluidlink-transport
//!
//! Serial link ownership for fluidlink.
//!
//! This crate provides:
//! - [`LinkStream`], the byte stream over the physical port (or an in-memory
//!   loopback for tests)
//! - [`Transport`], which owns the stream, runs the background read loop, and
//!   broadcasts received chunks to subscribers
//! - Idempotent close that waits for the read loop to exit

pub mod config;
pub mod error;
pub mod stream;
pub mod transport;

pub use config::TransportConfig;
pub use error::TransportError;
pub use stream::LinkStream;
pub use transport::{Transport, TransportEvent};
