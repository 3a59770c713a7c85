//! `simp_client`
//!
//! Thin client for the SIMP daemon's control channel. The [`client`] module
//! holds the connection API; the binary wraps it in an interactive shell.

pub mod client;

pub use client::ChatClient;
