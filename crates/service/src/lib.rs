//! HTTP access-control and audit layer for the MediaGate file gateway.
//!
//! This crate wires the building blocks from `common` into an axum router:
//! - Strict and lenient caller resolution (`auth`)
//! - The path authorization gate and signed-link handling (`down`)
//! - The media-audit middleware observing outbound responses (`media_audit`)
//! - The fs API and content routes over an abstract `Storage` (`fs`, `http`)
//! - In-memory store implementations for the default wiring and tests
//!   (`memory`)

pub mod auth;
pub mod config;
pub mod down;
pub mod fs;
pub mod http;
pub mod media_audit;
pub mod memory;
pub mod state;

pub use config::Config;
pub use http::router;
pub use state::{State as GateState, StateSetupError};
