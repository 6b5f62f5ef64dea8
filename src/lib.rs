//! # ticketq
//!
//! Asynchronous ticket submission queue.
//!
//! Accepts ticket-creation requests, records them durably, deduplicates
//! retried requests by client reference and materializes tickets in
//! background workers with bounded retries. Postgres (sqlx + pgmq) backs
//! production; an in-memory backend serves tests and embedders.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod http;
pub mod materialize;
pub mod model;
pub mod queue;
pub mod store;
pub mod telemetry;
