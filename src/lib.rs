//! Aula Server Library
//!
//! Multi-device learning-progress synchronization with conflict resolution,
//! a per-user device registry and role-based access control. This crate
//! exposes the modules for testing; the server binary is in main.rs.
//!
//! # Modules
//!
//! - `sync`: progress records, conflict resolution and the sync service
//! - `auth`: roles, permissions, token identities and the claims mirror
//! - `db`: SQLite pool setup and the repositories
//! - `routes`: the HTTP API surface

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
pub mod sync;
pub mod tasks;
