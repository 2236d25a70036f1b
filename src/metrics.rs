//! Prometheus-compatible metrics endpoint
//!
//! Exposes fishing server metrics in Prometheus format.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::game::engine::{BiteEndReason, FishingEvent};

const REACTION_HISTORY: usize = 1000;

/// Metrics registry for the fishing server
#[derive(Debug)]
pub struct Metrics {
    // Population
    pub connections_active: AtomicU64,
    pub players_online: AtomicU64,
    pub fishing_sessions_active: AtomicU64,

    // Fishing outcomes
    pub casts_total: AtomicU64,
    pub bite_attempts_total: AtomicU64,
    pub bites_total: AtomicU64,
    pub bites_missed_total: AtomicU64,
    pub catches_total: AtomicU64,
    pub escapes_total: AtomicU64,
    pub reported_catches_total: AtomicU64,
    pub rejected_catches_total: AtomicU64,
    pub points_awarded_total: AtomicU64,

    // Bite-to-reel reaction time (milliseconds)
    pub reaction_p50_ms: AtomicU64,
    pub reaction_p95_ms: AtomicU64,

    // Network stats
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,

    start_time: Instant,

    // Rolling reaction times for percentile calculation
    reaction_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_active: AtomicU64::new(0),
            players_online: AtomicU64::new(0),
            fishing_sessions_active: AtomicU64::new(0),
            casts_total: AtomicU64::new(0),
            bite_attempts_total: AtomicU64::new(0),
            bites_total: AtomicU64::new(0),
            bites_missed_total: AtomicU64::new(0),
            catches_total: AtomicU64::new(0),
            escapes_total: AtomicU64::new(0),
            reported_catches_total: AtomicU64::new(0),
            rejected_catches_total: AtomicU64::new(0),
            points_awarded_total: AtomicU64::new(0),
            reaction_p50_ms: AtomicU64::new(0),
            reaction_p95_ms: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            start_time: Instant::now(),
            reaction_history: RwLock::new(VecDeque::with_capacity(REACTION_HISTORY)),
        }
    }

    /// Update counters from one engine event
    pub fn record_fishing_event(&self, event: &FishingEvent) {
        match event {
            FishingEvent::CastStarted { .. } => {
                self.casts_total.fetch_add(1, Ordering::Relaxed);
                self.fishing_sessions_active.fetch_add(1, Ordering::Relaxed);
            }
            FishingEvent::BiteMissed { .. } => {
                self.bite_attempts_total.fetch_add(1, Ordering::Relaxed);
                self.bites_missed_total.fetch_add(1, Ordering::Relaxed);
            }
            FishingEvent::BiteStarted { .. } => {
                self.bite_attempts_total.fetch_add(1, Ordering::Relaxed);
                self.bites_total.fetch_add(1, Ordering::Relaxed);
            }
            FishingEvent::BiteEnded {
                reason: BiteEndReason::Escaped,
            } => {
                self.escapes_total.fetch_add(1, Ordering::Relaxed);
            }
            FishingEvent::BiteEnded { .. } => {}
            FishingEvent::FishCaught {
                fish, reaction_ms, ..
            } => {
                self.catches_total.fetch_add(1, Ordering::Relaxed);
                self.points_awarded_total
                    .fetch_add(fish.points as u64, Ordering::Relaxed);
                self.record_reaction_time(*reaction_ms);
                // A catch ends the session without a separate Stopped
                self.session_ended();
            }
            FishingEvent::Stopped => {
                self.session_ended();
            }
        }
    }

    /// A fishing session went away (stop or disconnect)
    pub fn session_ended(&self) {
        // Saturating decrement; a disconnect may race a stop
        let _ = self.fishing_sessions_active.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |n| Some(n.saturating_sub(1)),
        );
    }

    /// Record a bite-to-reel time and update percentiles
    pub fn record_reaction_time(&self, ms: u64) {
        let mut history = self.reaction_history.write();
        history.push_back(ms);

        while history.len() > REACTION_HISTORY {
            history.pop_front();
        }

        let mut sorted: Vec<u64> = history.iter().copied().collect();
        sorted.sort_unstable();

        let p50_idx = (sorted.len() as f32 * 0.50) as usize;
        let p95_idx = (sorted.len() as f32 * 0.95) as usize;

        self.reaction_p50_ms.store(sorted[p50_idx.min(sorted.len() - 1)], Ordering::Relaxed);
        self.reaction_p95_ms.store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("fishing_connections_active", "Open WebSocket connections", "gauge",
            self.connections_active.load(Ordering::Relaxed));
        metric!("fishing_players_online", "Players who completed join", "gauge",
            self.players_online.load(Ordering::Relaxed));
        metric!("fishing_sessions_active", "Players with a line in the water", "gauge",
            self.fishing_sessions_active.load(Ordering::Relaxed));

        metric!("fishing_casts_total", "Fishing sessions started", "counter",
            self.casts_total.load(Ordering::Relaxed));
        metric!("fishing_bite_attempts_total", "Bite rolls performed", "counter",
            self.bite_attempts_total.load(Ordering::Relaxed));
        metric!("fishing_bites_total", "Bite rolls that opened a catch window", "counter",
            self.bites_total.load(Ordering::Relaxed));
        metric!("fishing_bites_missed_total", "Bite rolls that failed", "counter",
            self.bites_missed_total.load(Ordering::Relaxed));
        metric!("fishing_catches_total", "Fish caught by the server engine", "counter",
            self.catches_total.load(Ordering::Relaxed));
        metric!("fishing_escapes_total", "Bites that ran out of time", "counter",
            self.escapes_total.load(Ordering::Relaxed));
        metric!("fishing_reported_catches_total", "Client-reported catches accepted", "counter",
            self.reported_catches_total.load(Ordering::Relaxed));
        metric!("fishing_rejected_catches_total", "Client-reported catches rejected", "counter",
            self.rejected_catches_total.load(Ordering::Relaxed));
        metric!("fishing_points_awarded_total", "Points awarded for server catches", "counter",
            self.points_awarded_total.load(Ordering::Relaxed));

        metric!("fishing_reaction_p50_milliseconds", "Median bite-to-reel time", "gauge",
            self.reaction_p50_ms.load(Ordering::Relaxed));
        metric!("fishing_reaction_p95_milliseconds", "95th percentile bite-to-reel time", "gauge",
            self.reaction_p95_ms.load(Ordering::Relaxed));

        metric!("fishing_messages_sent_total", "Total messages sent", "counter",
            self.messages_sent.load(Ordering::Relaxed));
        metric!("fishing_messages_received_total", "Total messages received", "counter",
            self.messages_received.load(Ordering::Relaxed));
        metric!("fishing_bytes_sent_total", "Total bytes sent", "counter",
            self.bytes_sent.load(Ordering::Relaxed));
        metric!("fishing_bytes_received_total", "Total bytes received", "counter",
            self.bytes_received.load(Ordering::Relaxed));
        metric!("fishing_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// JSON format metrics (alternative for direct API access)
    pub fn to_json(&self) -> String {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        json!({
            "players": {
                "connections": load(&self.connections_active),
                "online": load(&self.players_online),
                "fishing": load(&self.fishing_sessions_active),
            },
            "fishing": {
                "casts": load(&self.casts_total),
                "bite_attempts": load(&self.bite_attempts_total),
                "bites": load(&self.bites_total),
                "misses": load(&self.bites_missed_total),
                "catches": load(&self.catches_total),
                "escapes": load(&self.escapes_total),
                "reported_catches": load(&self.reported_catches_total),
                "rejected_catches": load(&self.rejected_catches_total),
                "points_awarded": load(&self.points_awarded_total),
                "reaction_p50_ms": load(&self.reaction_p50_ms),
                "reaction_p95_ms": load(&self.reaction_p95_ms),
            },
            "network": {
                "messages_sent": load(&self.messages_sent),
                "messages_received": load(&self.messages_received),
                "bytes_sent": load(&self.bytes_sent),
                "bytes_received": load(&self.bytes_received),
            },
            "uptime_seconds": self.uptime_seconds(),
        })
        .to_string()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn http_response(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    )
}

/// Route one request line
fn respond(metrics: &Metrics, request: &str) -> String {
    let path = request
        .lines()
        .next()
        .and_then(|line| line.strip_prefix("GET "))
        .and_then(|rest| rest.split_whitespace().next());

    match path {
        Some("/metrics") => http_response(
            "200 OK",
            "text/plain; version=0.0.4",
            &metrics.to_prometheus(),
        ),
        Some("/metrics/json") => http_response("200 OK", "application/json", &metrics.to_json()),
        Some("/health") | Some("/") => http_response("200 OK", "text/plain", "OK"),
        _ => "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string(),
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);
                    let response = respond(&metrics, &request);

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}
