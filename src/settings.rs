//! Engine connection settings parsed from process arguments.
//!
//! The UI host forwards the engine-related part of its command line to
//! `PluginService::start`. Settings are parsed exactly once, when the shared
//! connection manager initializes, and never change afterwards.
//!
//! ```text
//! [--host <addr>] [--port <n>] [-- <launch args>...]
//! ```

use clap::Parser;

use crate::config::Config;
use crate::error::EngineError;

/// Raw argument surface understood by the connection layer.
#[derive(Parser, Debug)]
#[command(
    name = "engine",
    no_binary_name = true,
    disable_help_flag = true,
    disable_version_flag = true
)]
struct EngineArgs {
    /// Engine host (defaults to loopback).
    #[arg(long)]
    host: Option<String>,

    /// Engine port.
    #[arg(long)]
    port: Option<u16>,

    /// Arguments forwarded to the engine process when it is launched.
    #[arg(last = true)]
    launch_args: Vec<String>,
}

/// Immutable endpoint description for the engine process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Engine host name or address.
    pub host: String,
    /// Engine TCP port.
    pub port: u16,
    /// Process-launch arguments carried alongside the endpoint.
    pub launch_args: Vec<String>,
}

impl ConnectionSettings {
    /// Settings pointing at `host:port` with no launch arguments.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            launch_args: Vec::new(),
        }
    }

    /// Parse `args` (without the binary name), filling gaps from `defaults`.
    pub fn parse<I, S>(args: I, defaults: &Config) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString> + Clone,
    {
        let parsed = EngineArgs::try_parse_from(args)
            .map_err(|e| EngineError::InvalidArguments(e.to_string().trim().to_owned()))?;

        let host = parsed.host.unwrap_or_else(|| defaults.host.clone());
        if host.trim().is_empty() {
            return Err(EngineError::InvalidArguments("empty --host".to_owned()));
        }

        Ok(Self {
            host,
            port: parsed.port.unwrap_or(defaults.port),
            launch_args: parsed.launch_args,
        })
    }

    /// `host:port` for log lines.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
