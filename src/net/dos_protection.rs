use std::net::IpAddr;
use std::time::Duration;

use hashbrown::HashMap;
use tokio::time::Instant;

/// Identifier handed out per accepted socket
pub type ConnectionId = u64;

/// Configuration for DoS protection
#[derive(Debug, Clone)]
pub struct DoSConfig {
    /// Maximum total concurrent connections
    pub max_connections_total: usize,
    /// Maximum connections per IP address
    pub max_connections_per_ip: usize,
    /// Maximum messages per window per connection
    pub max_messages_per_window: u32,
    /// Maximum frame size in bytes
    pub max_message_size: usize,
    /// Time window for rate limiting
    pub rate_limit_window: Duration,
    /// Rate limit violations before the connection is dropped
    pub violations_before_disconnect: u32,
}

impl Default for DoSConfig {
    fn default() -> Self {
        Self {
            max_connections_total: 400,
            max_connections_per_ip: 5,
            // Pose updates are sent every frame by some clients
            max_messages_per_window: 60,
            max_message_size: 16 * 1024,
            rate_limit_window: Duration::from_secs(1),
            violations_before_disconnect: 5,
        }
    }
}

impl DoSConfig {
    /// Socket budget for a server admitting `max_players` players. Leaves
    /// headroom for clients that connect and get rejected at join.
    pub fn for_players(max_players: usize) -> Self {
        Self {
            max_connections_total: max_players.saturating_mul(2).max(1),
            ..Default::default()
        }
    }
}

/// Tracks rate limiting for a single connection
#[derive(Debug)]
struct ConnectionRateLimit {
    message_count: u32,
    window_start: Instant,
    violations: u32,
}

impl ConnectionRateLimit {
    fn new() -> Self {
        Self {
            message_count: 0,
            window_start: Instant::now(),
            violations: 0,
        }
    }

    fn check_and_increment(&mut self, max_per_window: u32, window: Duration) -> bool {
        let now = Instant::now();

        if now.duration_since(self.window_start) >= window {
            self.window_start = now;
            self.message_count = 0;
        }

        self.message_count += 1;

        if self.message_count > max_per_window {
            self.violations += 1;
            false
        } else {
            true
        }
    }
}

/// Connection caps and per-connection message limits
pub struct DoSProtection {
    config: DoSConfig,
    ip_connections: HashMap<IpAddr, usize>,
    connection_rates: HashMap<ConnectionId, ConnectionRateLimit>,
    total_connections: usize,
    next_id: ConnectionId,
}

impl DoSProtection {
    pub fn new(config: DoSConfig) -> Self {
        Self {
            config,
            ip_connections: HashMap::new(),
            connection_rates: HashMap::new(),
            total_connections: 0,
            next_id: 1,
        }
    }

    pub fn config(&self) -> &DoSConfig {
        &self.config
    }

    /// Check if a new connection from this IP is allowed
    pub fn check_connection(&self, ip: IpAddr) -> Result<(), DoSError> {
        if self.total_connections >= self.config.max_connections_total {
            return Err(DoSError::TooManyConnections);
        }

        let ip_count = self.ip_connections.get(&ip).copied().unwrap_or(0);
        if ip_count >= self.config.max_connections_per_ip {
            return Err(DoSError::TooManyConnectionsFromIp);
        }

        Ok(())
    }

    pub fn register_connection(&mut self, ip: IpAddr) -> Result<ConnectionId, DoSError> {
        self.check_connection(ip)?;

        let connection_id = self.next_id;
        self.next_id += 1;

        *self.ip_connections.entry(ip).or_insert(0) += 1;
        self.connection_rates
            .insert(connection_id, ConnectionRateLimit::new());
        self.total_connections += 1;

        Ok(connection_id)
    }

    pub fn unregister_connection(&mut self, connection_id: ConnectionId, ip: IpAddr) {
        if self.connection_rates.remove(&connection_id).is_none() {
            return;
        }

        if let Some(count) = self.ip_connections.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.ip_connections.remove(&ip);
            }
        }

        self.total_connections = self.total_connections.saturating_sub(1);
    }

    /// Check if a frame from this connection is allowed
    pub fn check_message(&mut self, connection_id: ConnectionId, size: usize) -> Result<(), DoSError> {
        if size > self.config.max_message_size {
            return Err(DoSError::MessageTooLarge(size));
        }

        if let Some(rate) = self.connection_rates.get_mut(&connection_id) {
            if rate.violations >= self.config.violations_before_disconnect {
                return Err(DoSError::ViolationLimitExceeded);
            }

            if !rate.check_and_increment(
                self.config.max_messages_per_window,
                self.config.rate_limit_window,
            ) {
                return Err(DoSError::RateLimitExceeded);
            }
        }

        Ok(())
    }

    pub fn connection_count(&self) -> usize {
        self.total_connections
    }

    pub fn connections_from_ip(&self, ip: IpAddr) -> usize {
        self.ip_connections.get(&ip).copied().unwrap_or(0)
    }

    pub fn violation_count(&self, connection_id: ConnectionId) -> u32 {
        self.connection_rates
            .get(&connection_id)
            .map(|r| r.violations)
            .unwrap_or(0)
    }
}

impl Default for DoSProtection {
    fn default() -> Self {
        Self::new(DoSConfig::default())
    }
}

/// Errors from DoS protection checks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DoSError {
    #[error("Too many total connections")]
    TooManyConnections,
    #[error("Too many connections from this IP")]
    TooManyConnectionsFromIp,
    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),
    #[error("Rate limit exceeded")]
    RateLimitExceeded,
    #[error("Too many violations, connection terminated")]
    ViolationLimitExceeded,
}
