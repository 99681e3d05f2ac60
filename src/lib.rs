//! CoolRouter oracle node
//!
//! Watches the router program's event log, votes on every new request with
//! this node's own answer and, once voting completes, takes part in a
//! damped race to publish the winning answer back on-chain.

pub mod app_state;
pub mod codec;
pub mod config;
pub mod error;
pub mod handlers;
pub mod indexer;
pub mod models;
pub mod node;
pub mod routes;
pub mod rpc;
pub mod schema;
pub mod services;
pub mod transaction;

pub use error::{OracleError, Result};
