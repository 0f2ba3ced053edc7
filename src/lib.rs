#[macro_use]
extern crate structure;

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;

pub use client::Socks4Client;
pub use config::Config;
pub use error::{Error, Result};
