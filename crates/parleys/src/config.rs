use crate::auth::IdentityPolicy;
use crate::store::RetentionPolicy;
use clap::Parser;
use std::net::SocketAddr;

/// Longest retention the relay accepts, in seconds (one year).
const MAX_RETENTION_SECS: u64 = 365 * 86_400;

/// CLI arguments for the relay server.
#[derive(Parser, Debug, Clone)]
#[command(name = "parleys")]
#[command(about = "parley presence-tracked message relay")]
#[command(version)]
pub struct Args {
    /// Socket address to listen on.
    #[arg(long, default_value = "0.0.0.0:8080", env = "PARLEY_LISTEN")]
    pub listen: SocketAddr,
    /// Port override for the listen address (set by most hosting platforms).
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,
    /// Socket address for the metrics endpoint.
    #[arg(long, default_value = "127.0.0.1:9090", env = "PARLEY_METRICS")]
    pub metrics_addr: SocketAddr,
    /// Maximum total concurrent connections.
    #[arg(long, default_value = "100000", env = "PARLEY_MAX_CONNS")]
    pub max_conns: usize,
    /// Maximum concurrent connections per IP address.
    #[arg(long, default_value = "10", env = "PARLEY_MAX_CONNS_IP")]
    pub max_conns_ip: usize,
    /// Maximum messages per minute per connection.
    #[arg(long, default_value = "120", env = "PARLEY_MSG_RATE")]
    pub msg_rate: u32,
    /// Maximum message bytes per minute per connection.
    #[arg(long, default_value = "1048576", env = "PARLEY_BW_RATE")]
    pub bw_rate: u64,
    /// Maximum message content size in bytes.
    #[arg(long, default_value = "65535", env = "PARLEY_MAX_PAYLOAD")]
    pub max_payload: usize,
    /// Seconds a new connection has to authenticate.
    #[arg(long, default_value = "30", env = "PARLEY_AUTH_TIMEOUT")]
    pub auth_timeout: u64,
    /// Seconds between liveness sweeps over registered connections.
    #[arg(long, default_value = "30", env = "PARLEY_PING_INTERVAL")]
    pub ping_interval: u64,
    /// Seconds without inbound traffic before a connection is closed.
    #[arg(long, default_value = "120", env = "PARLEY_IDLE_TIMEOUT")]
    pub idle_timeout: u64,
    /// Seconds between expired-message sweeps.
    #[arg(long, default_value = "60", env = "PARLEY_SWEEP_INTERVAL")]
    pub sweep_interval: u64,
    /// Seconds a read message is retained.
    #[arg(long, default_value = "86400", env = "PARLEY_READ_RETENTION")]
    pub read_retention: u64,
    /// Seconds an unread message is retained. Unset keeps it until read.
    #[arg(long, env = "PARLEY_UNREAD_RETENTION")]
    pub unread_retention: Option<u64>,
    /// Buffered messages kept per recipient before the oldest is evicted.
    #[arg(long, default_value = "10000", env = "PARLEY_MAX_PENDING")]
    pub max_pending_per_recipient: usize,
    /// How `authenticate` identifiers are validated.
    #[arg(long, value_enum, default_value = "opaque", env = "PARLEY_IDENTITY")]
    pub identity: IdentityPolicy,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub listen: SocketAddr,
    /// Socket address for the metrics endpoint.
    pub metrics_addr: SocketAddr,
    /// Maximum total concurrent connections.
    pub max_conns: usize,
    /// Maximum concurrent connections per IP address.
    pub max_conns_ip: usize,
    /// Maximum messages per minute per connection.
    pub msg_rate: u32,
    /// Maximum message bytes per minute per connection.
    pub bw_rate: u64,
    /// Maximum message content size in bytes.
    pub max_payload: usize,
    /// Seconds a new connection has to authenticate.
    pub auth_timeout: u64,
    /// Seconds between liveness sweeps.
    pub ping_interval: u64,
    /// Seconds without inbound traffic before a connection is closed.
    pub idle_timeout: u64,
    /// Seconds between expired-message sweeps.
    pub sweep_interval: u64,
    /// Seconds a read message is retained.
    pub read_retention: u64,
    /// Seconds an unread message is retained, if bounded.
    pub unread_retention: Option<u64>,
    /// Buffered messages kept per recipient.
    pub max_pending_per_recipient: usize,
    /// How `authenticate` identifiers are validated.
    pub identity: IdentityPolicy,
}

impl Default for ServerConfig {
    /// The CLI defaults, without consulting the environment.
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            metrics_addr: SocketAddr::from(([127, 0, 0, 1], 9090)),
            max_conns: 100_000,
            max_conns_ip: 10,
            msg_rate: 120,
            bw_rate: 1_048_576,
            max_payload: 65_535,
            auth_timeout: 30,
            ping_interval: 30,
            idle_timeout: 120,
            sweep_interval: 60,
            read_retention: 86_400,
            unread_retention: None,
            max_pending_per_recipient: 10_000,
            identity: IdentityPolicy::Opaque,
        }
    }
}

impl ServerConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_conns == 0 {
            return Err("max_conns must be greater than 0".to_string());
        }
        if self.max_conns > 1_000_000 {
            return Err("max_conns exceeds reasonable limit (1,000,000)".to_string());
        }

        if self.max_conns_ip == 0 {
            return Err("max_conns_ip must be greater than 0".to_string());
        }
        if self.max_conns_ip > self.max_conns {
            return Err("max_conns_ip cannot exceed max_conns".to_string());
        }

        if self.msg_rate == 0 {
            return Err("msg_rate must be greater than 0".to_string());
        }
        if self.msg_rate > 1_000_000 {
            return Err("msg_rate exceeds reasonable limit (1,000,000 msg/min)".to_string());
        }
        if self.bw_rate == 0 {
            return Err("bw_rate must be greater than 0".to_string());
        }
        if self.bw_rate > 100_000_000_000 {
            return Err("bw_rate exceeds reasonable limit (100 GB/min)".to_string());
        }

        const MAX_ALLOWED_PAYLOAD: usize = 16 * 1024 * 1024;
        if self.max_payload == 0 {
            return Err("max_payload must be greater than 0".to_string());
        }
        if self.max_payload > MAX_ALLOWED_PAYLOAD {
            return Err(format!(
                "max_payload exceeds maximum allowed ({MAX_ALLOWED_PAYLOAD} bytes)"
            ));
        }

        if self.auth_timeout == 0 {
            return Err("auth_timeout must be greater than 0".to_string());
        }
        if self.auth_timeout > 300 {
            return Err("auth_timeout exceeds reasonable limit (300 seconds)".to_string());
        }

        if self.ping_interval == 0 {
            return Err("ping_interval must be greater than 0".to_string());
        }
        if self.ping_interval > 3600 {
            return Err("ping_interval exceeds reasonable limit (3600 seconds)".to_string());
        }
        if self.idle_timeout == 0 {
            return Err("idle_timeout must be greater than 0".to_string());
        }
        if self.idle_timeout > 86_400 {
            return Err(
                "idle_timeout exceeds reasonable limit (86400 seconds / 1 day)".to_string(),
            );
        }

        if self.sweep_interval == 0 {
            return Err("sweep_interval must be greater than 0".to_string());
        }
        if self.sweep_interval > 86_400 {
            return Err("sweep_interval exceeds reasonable limit (86400 seconds)".to_string());
        }

        if self.read_retention == 0 {
            return Err("read_retention must be greater than 0".to_string());
        }
        if self.read_retention > MAX_RETENTION_SECS {
            return Err("read_retention exceeds reasonable limit (1 year)".to_string());
        }
        if let Some(unread) = self.unread_retention {
            if unread == 0 {
                return Err("unread_retention must be greater than 0".to_string());
            }
            if unread > MAX_RETENTION_SECS {
                return Err("unread_retention exceeds reasonable limit (1 year)".to_string());
            }
        }

        if self.max_pending_per_recipient == 0 {
            return Err("max_pending_per_recipient must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Store retention derived from this configuration.
    ///
    /// Only meaningful on a validated configuration.
    #[must_use]
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            read_retention: seconds(self.read_retention),
            unread_retention: self.unread_retention.map(seconds),
            max_per_recipient: self.max_pending_per_recipient,
        }
    }
}

fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(secs.min(MAX_RETENTION_SECS)).unwrap_or(i64::MAX))
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        let mut listen = args.listen;
        if let Some(port) = args.port {
            listen.set_port(port);
        }
        Self {
            listen,
            metrics_addr: args.metrics_addr,
            max_conns: args.max_conns,
            max_conns_ip: args.max_conns_ip,
            msg_rate: args.msg_rate,
            bw_rate: args.bw_rate,
            max_payload: args.max_payload,
            auth_timeout: args.auth_timeout,
            ping_interval: args.ping_interval,
            idle_timeout: args.idle_timeout,
            sweep_interval: args.sweep_interval,
            read_retention: args.read_retention,
            unread_retention: args.unread_retention,
            max_pending_per_recipient: args.max_pending_per_recipient,
            identity: args.identity,
        }
    }
}
