//! HTTP API
//!
//! JSON endpoints for the menu, matchmaking, decisions and the long-poll
//! game view. Callers are identified by the `x-user-id` header set by an
//! authenticating proxy in front of the service.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{create_app, ApiServer};
