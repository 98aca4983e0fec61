//! Core of the rate-limited telegram queue.
//!
//! This crate is transport-agnostic. The directory/send endpoint lives behind
//! [`ports::DirectoryTransport`], implemented over HTTP in `tgq-http`.

pub mod campaign;
pub mod client;
pub mod config;
pub mod directory;
pub mod domain;
pub mod errors;
pub mod governor;
pub mod logging;
pub mod markup;
pub mod ports;
pub mod queue;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::TelegramClient;
pub use errors::{Error, Result};
