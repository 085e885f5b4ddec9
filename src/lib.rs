//! # stageq
//!
//! Durable staged file pipeline. Files discovered on remote sources (SFTP
//! folders, IMAP mailboxes) are staged in an object store through a
//! reversible transform chain and then handed to a processing callback.
//! Postgres-backed queues make every stage idempotent, so the whole
//! pipeline can be re-run periodically and interrupted at any point.

pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod model;
pub mod pipeline;
pub mod storage;
pub mod telemetry;
pub mod transform;
pub mod transport;
pub mod workflow;
