//! # entrev-server
//!
//! HTTP surface for entrev: hooks for hosts to report entity changes, and
//! the commit log with undo and rollback.

pub mod api;
pub mod server;

pub use server::EntrevServer;
