use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use crate::game::constants::fishing;
use crate::game::engine::FishingRules;
use crate::game::species::{SelectionMode, SpeciesTable, SpeciesTableError};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// WebSocket port
    pub port: u16,
    /// Maximum players on the island at once
    pub max_players: usize,
    /// How long a bite stays catchable
    pub catch_window_ms: u64,
    /// Species selection model
    pub selection_mode: SelectionMode,
    /// Optional JSON species table replacing the builtin one
    pub species_table_path: Option<PathBuf>,
    /// Accept `fishCaught` reports from clients (validated)
    pub accept_client_catches: bool,
    /// Port for the Prometheus endpoint
    pub metrics_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 3001,
            max_players: 200,
            catch_window_ms: fishing::CATCH_WINDOW_MS,
            selection_mode: SelectionMode::Compatible,
            species_table_path: None,
            accept_client_catches: false,
            metrics_port: 9090,
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from any key/value source. Invalid values are logged
    /// and replaced by the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("BIND_ADDRESS") {
            if let Ok(parsed) = addr.parse() {
                config.bind_address = parsed;
            } else {
                tracing::warn!("Invalid BIND_ADDRESS '{}', using default", addr);
            }
        }

        if let Some(port) = lookup("PORT") {
            match port.parse::<u16>() {
                Ok(parsed) if parsed > 0 => config.port = parsed,
                Ok(_) => tracing::warn!("PORT must be > 0, using default"),
                Err(_) => tracing::warn!("Invalid PORT '{}', using default", port),
            }
        }

        if let Some(max_players) = lookup("MAX_PLAYERS") {
            match max_players.parse::<usize>() {
                Ok(parsed) if parsed > 0 && parsed <= 10000 => config.max_players = parsed,
                Ok(_) => tracing::warn!("MAX_PLAYERS must be 1-10000, using default"),
                Err(_) => tracing::warn!("Invalid MAX_PLAYERS '{}', using default", max_players),
            }
        }

        if let Some(window) = lookup("CATCH_WINDOW_MS") {
            match window.parse::<u64>() {
                Ok(parsed) if parsed > 0 && parsed <= 60_000 => config.catch_window_ms = parsed,
                Ok(_) => tracing::warn!("CATCH_WINDOW_MS must be 1-60000, using default"),
                Err(_) => tracing::warn!("Invalid CATCH_WINDOW_MS '{}', using default", window),
            }
        }

        if let Some(mode) = lookup("SELECTION_MODE") {
            match mode.parse() {
                Ok(parsed) => config.selection_mode = parsed,
                Err(e) => tracing::warn!("{}, using default", e),
            }
        }

        if let Some(path) = lookup("SPECIES_TABLE_PATH") {
            if !path.trim().is_empty() {
                config.species_table_path = Some(PathBuf::from(path));
            }
        }

        if let Some(flag) = lookup("ACCEPT_CLIENT_CATCHES") {
            match parse_flag(&flag) {
                Some(parsed) => config.accept_client_catches = parsed,
                None => tracing::warn!("Invalid ACCEPT_CLIENT_CATCHES '{}', using default", flag),
            }
        }

        if let Some(port) = lookup("METRICS_PORT") {
            match port.parse::<u16>() {
                Ok(parsed) if parsed > 0 => config.metrics_port = parsed,
                Ok(_) => tracing::warn!("METRICS_PORT must be > 0, using default"),
                Err(_) => tracing::warn!("Invalid METRICS_PORT '{}', using default", port),
            }
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0".to_string());
        }
        if self.max_players == 0 {
            return Err("max_players must be at least 1".to_string());
        }
        if self.catch_window_ms == 0 {
            return Err("catch_window_ms must be at least 1".to_string());
        }
        if self.metrics_port == self.port {
            return Err("metrics_port must differ from port".to_string());
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Species table and timing shared by every angler
    pub fn rules(&self) -> Result<FishingRules, SpeciesTableError> {
        let species = match &self.species_table_path {
            Some(path) => SpeciesTable::load(path)?,
            None => SpeciesTable::builtin(),
        };

        Ok(FishingRules {
            species,
            selection: self.selection_mode,
            catch_window_ms: self.catch_window_ms,
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
