//! Route modules for the Aula server

pub mod devices;
pub mod sync;
pub mod users;
