//! Grouping task client.
//!
//! Submits long-running grouping jobs over REST, tracks their status over
//! a STOMP push channel, and fetches the two dependent result resources
//! exactly once when the job finishes (or when the fallback timer says
//! it is time to look).
//!
//! The end-to-end flow lives in [`orchestrator::TaskOrchestrator`]; the
//! other modules are its building blocks.

pub mod api;
pub mod backend;
pub mod channel;
pub mod client;
pub mod config;
pub mod events;
pub mod fetcher;
pub mod guard;
pub mod orchestrator;
pub mod reconnect;
pub mod stomp;
pub mod timer;
pub mod transport;
