//! `dsreplication`: configure, initialize and monitor replication between
//! LDAP directory servers.
//!
//! The binary parses its arguments with [`cli::Cli`] into a validated
//! [`user_data::Operation`], then [`operations::Executor`] runs it against
//! servers reached through a [`directory::Connector`].

pub mod ads;
pub mod cache;
pub mod cli;
pub mod config;
pub mod connection;
pub mod console;
pub mod directory;
pub mod error;
pub mod logging;
pub mod operations;
pub mod server_config;
pub mod tasks;
pub mod user_data;

pub use config::ToolConfig;
pub use error::{ReplicationCliError, ReturnCode};
