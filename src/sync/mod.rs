//! Multi-device progress synchronization
//!
//! Clients submit whole progress payloads stamped with the last version they
//! saw. Writes go through an optimistic compare-and-swap; when the stored
//! version is not behind the incoming one, the conflict resolver merges both
//! sides so no device ever erases another device's progress. Every accepted
//! write lands in an append-only history, resolved conflicts in a conflict
//! log, and the submitting device in the per-user registry.

pub mod conflict;
pub mod service;
pub mod store;
pub mod types;
