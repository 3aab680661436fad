//! Corridor server binary support library.
//!
//! Exposes configuration so integration tooling can build a server the
//! same way the binary does.

pub mod config;

pub use config::ServerConfig;
