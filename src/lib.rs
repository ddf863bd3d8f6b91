//! keygate: token authentication, sliding quota and hybrid RSA/AES envelope
//! encryption in front of JSON actions.
//!
//! The binary in `main.rs` wires these modules together; integration tests in
//! `tests/` drive them directly.

pub mod api;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod pipeline;
pub mod store;
