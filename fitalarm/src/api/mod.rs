//! Local control API.
//!
//! Handlers talk to the endpoint through [`commands::EndpointCommand`]
//! messages and read its published status; they never touch alarm state
//! directly.

pub mod commands;
pub mod server;
mod v0;

pub use server::{SharedState, router, serve};
