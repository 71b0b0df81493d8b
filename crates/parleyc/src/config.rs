use crate::backoff::{ExponentialBackoff, Reconnector};
use clap::{Parser, Subcommand};
use std::time::Duration;

/// CLI interface for the relay client.
#[derive(Parser, Debug)]
#[command(name = "parleyc", about = "parley relay client")]
#[command(version)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Relay server URL.
    #[arg(long, global = true, env = "PARLEYC_RELAY", default_value = "ws://127.0.0.1:8080")]
    pub relay: String,

    /// Identifier to authenticate as.
    #[arg(long, global = true, env = "PARLEYC_WALLET")]
    pub wallet: Option<String>,

    /// Consecutive failed connection attempts before giving up.
    #[arg(long, global = true, default_value = "5")]
    pub max_attempts: u32,

    /// Increase log verbosity (repeat for more detail).
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Stay connected and print every inbound frame as a JSON line.
    Listen,
    /// Send one message and wait for the relay's answer.
    Send {
        /// Recipient identifier.
        recipient: String,
        /// Message content.
        content: String,
    },
    /// Mark a received message as read.
    Read {
        /// Id of the message to mark.
        message_id: String,
    },
}

/// Runtime configuration for the relay link.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the relay server.
    pub relay: String,
    /// Identifier sent in `authenticate`.
    pub wallet: String,
    /// Reconnection backoff settings.
    pub reconnect: ReconnectConfig,
    /// Interval between keepalive pings, in seconds.
    pub keepalive_interval_s: u64,
}

/// Reconnect backoff parameters.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before the first reconnect attempt, in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between reconnect attempts, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_factor: f64,
    /// Consecutive failures before the client gives up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Reconnect state machine for these parameters.
    #[must_use]
    pub fn reconnector(&self) -> Reconnector {
        Reconnector::new(
            ExponentialBackoff::new(
                Duration::from_millis(self.initial_delay_ms),
                Duration::from_millis(self.max_delay_ms),
                self.backoff_factor,
            ),
            self.max_attempts,
        )
    }
}

impl ClientConfig {
    /// Configuration for `wallet` talking to `relay` with default timings.
    #[must_use]
    pub fn new(relay: impl Into<String>, wallet: impl Into<String>) -> Self {
        Self {
            relay: relay.into(),
            wallet: wallet.into(),
            reconnect: ReconnectConfig::default(),
            keepalive_interval_s: 30,
        }
    }

    /// Build from parsed CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if no wallet was given or the
    /// result fails [`validate`](Self::validate).
    pub fn from_cli(cli: &Cli) -> Result<Self, String> {
        let wallet = cli
            .wallet
            .clone()
            .ok_or_else(|| "--wallet (or PARLEYC_WALLET) is required".to_string())?;
        let mut config = Self::new(cli.relay.clone(), wallet);
        config.reconnect.max_attempts = cli.max_attempts;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.relay.is_empty() {
            return Err("relay URL must not be empty".to_string());
        }
        if !(self.relay.starts_with("ws://") || self.relay.starts_with("wss://")) {
            return Err(format!(
                "relay URL must start with ws:// or wss://, got: {}",
                self.relay
            ));
        }

        if self.wallet.trim().is_empty() {
            return Err("wallet must not be empty".to_string());
        }

        if self.reconnect.initial_delay_ms == 0 {
            return Err("reconnect.initial_delay_ms must be greater than 0".to_string());
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err("reconnect.max_delay_ms must be >= initial_delay_ms".to_string());
        }
        if !self.reconnect.backoff_factor.is_finite() || self.reconnect.backoff_factor <= 0.0 {
            return Err(
                "reconnect.backoff_factor must be a finite number greater than 0".to_string(),
            );
        }
        if self.reconnect.max_attempts == 0 {
            return Err("reconnect.max_attempts must be greater than 0".to_string());
        }

        if self.keepalive_interval_s == 0 {
            return Err("keepalive_interval_s must be greater than 0".to_string());
        }

        Ok(())
    }
}
