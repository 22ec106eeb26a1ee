//! Droidstore server.
//!
//! A passive store in the producer/consumer relationship between the
//! controller (producer) and the droids (consumers): runs and tasks live
//! in the store, droids claim tasks one at a time through `checkout`, and
//! the run lifecycle drives a supervising compute job in the cluster.

pub mod auth;
pub mod config;
pub mod http;
pub mod orchestrator;
pub mod state;

pub use config::Config;
pub use state::AppState;
