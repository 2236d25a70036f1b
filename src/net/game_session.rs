//! Island session - player registry, presentation mirror and event fan-out
//!
//! Each joined player owns an angler task. The session only holds the
//! handle plus what other clients need to draw the avatar; the fishing
//! rules themselves run inside the actor. Actor updates arrive on one
//! channel and are turned into protocol messages by the dispatcher.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use hashbrown::HashMap;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::game::actor::{AnglerCommand, AnglerHandle, AnglerNotice, AnglerUpdate, UpdateSender};
use crate::game::clock::unix_time_ms;
use crate::game::constants::names;
use crate::game::engine::{Cast, FishingEvent, FishingRules};
use crate::game::fish::{measurements_plausible, CaughtFish};
use crate::game::player::{random_spawn_position, PlayerAction, PlayerId, PlayerState};
use crate::game::random::RandSource;
use crate::game::species::SpeciesTable;
use crate::metrics::Metrics;
use crate::net::protocol::ServerMessage;
use crate::util::vec3::Vec3;

/// Outgoing messages for one connection
pub type Outbox = mpsc::Sender<ServerMessage>;

const OUTBOX_BUFFER: usize = 256;

pub fn outbox() -> (Outbox, mpsc::Receiver<ServerMessage>) {
    mpsc::channel(OUTBOX_BUFFER)
}

pub type SharedSession = Arc<RwLock<GameSession>>;

/// A joined player: connection, angler and the mirrored avatar state
pub struct PlayerConnection {
    pub id: PlayerId,
    pub name: String,
    pub position: Vec3,
    pub rotation: f32,
    pub action: PlayerAction,
    pub score: u32,
    /// Line in the water, as last reported by the angler
    pub fishing: bool,
    outbox: Outbox,
    angler: AnglerHandle,
}

impl PlayerConnection {
    fn update_message(&self) -> ServerMessage {
        ServerMessage::PlayerUpdate {
            id: self.id,
            name: self.name.clone(),
            position: self.position,
            action: self.action,
            rotation: self.rotation,
            score: self.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("Invalid player name")]
    InvalidName,
    #[error("Server at capacity ({0} players). Please try again later.")]
    ServerFull(usize),
}

/// Shared registry of everyone on the island
pub struct GameSession {
    players: HashMap<PlayerId, PlayerConnection>,
    rules: Arc<FishingRules>,
    max_players: usize,
    accept_client_catches: bool,
    metrics: Arc<Metrics>,
    updates: UpdateSender,
}

impl GameSession {
    /// Returns the session and the receiver the dispatcher must drain
    pub fn new(
        config: &ServerConfig,
        rules: Arc<FishingRules>,
        metrics: Arc<Metrics>,
    ) -> (Self, mpsc::UnboundedReceiver<AnglerUpdate>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let session = Self {
            players: HashMap::new(),
            rules,
            max_players: config.max_players,
            accept_client_catches: config.accept_client_catches,
            metrics,
            updates,
        };
        (session, rx)
    }

    pub fn rules(&self) -> &Arc<FishingRules> {
        &self.rules
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn can_accept_player(&self) -> bool {
        self.players.len() < self.max_players
    }

    pub fn get_player(&self, player_id: PlayerId) -> Option<&PlayerConnection> {
        self.players.get(&player_id)
    }

    /// Admits a player, spawns its angler and sends the joiner everything
    /// it needs to draw the island.
    pub fn add_player(&mut self, raw_name: &str, outbox: Outbox) -> Result<PlayerId, JoinError> {
        let name = sanitize_player_name(raw_name).ok_or(JoinError::InvalidName)?;
        if !self.can_accept_player() {
            return Err(JoinError::ServerFull(self.players.len()));
        }

        let player_id = Uuid::new_v4();
        let position = random_spawn_position();
        let angler = AnglerHandle::spawn(
            PlayerState::new(player_id, name.clone(), position),
            self.rules.clone(),
            RandSource::from_entropy(),
            self.updates.clone(),
        );

        info!("Adding player {} ({}) to the island", name, player_id);

        deliver(
            &outbox,
            player_id,
            ServerMessage::PlayerJoined {
                id: player_id,
                position,
            },
        );

        // Existing players, for the newcomer only
        for other in self.players.values() {
            deliver(&outbox, player_id, other.update_message());
        }

        let connection = PlayerConnection {
            id: player_id,
            name,
            position,
            rotation: 0.0,
            action: PlayerAction::Idle,
            score: 0,
            fishing: false,
            outbox,
            angler,
        };
        let announce = connection.update_message();
        self.players.insert(player_id, connection);
        self.broadcast(&announce);

        self.metrics
            .players_online
            .store(self.players.len() as u64, Ordering::Relaxed);

        Ok(player_id)
    }

    /// Drops the player and tells everyone else. The caller shuts the
    /// returned angler down outside the session lock.
    pub fn remove_player(&mut self, player_id: PlayerId) -> Option<AnglerHandle> {
        let connection = self.players.remove(&player_id)?;
        info!("Removing player {} ({}) from the island", connection.name, player_id);

        if connection.fishing {
            self.metrics.session_ended();
        }
        self.metrics
            .players_online
            .store(self.players.len() as u64, Ordering::Relaxed);

        self.broadcast(&ServerMessage::PlayerLeft { id: player_id });
        Some(connection.angler)
    }

    /// Removes everyone, for server shutdown
    pub fn drain(&mut self) -> Vec<AnglerHandle> {
        let handles: Vec<AnglerHandle> = self
            .players
            .drain()
            .map(|(_, connection)| connection.angler)
            .collect();
        self.metrics.players_online.store(0, Ordering::Relaxed);
        self.metrics.fishing_sessions_active.store(0, Ordering::Relaxed);
        handles
    }

    pub fn update_pose(&mut self, player_id: PlayerId, position: Vec3, action: PlayerAction, rotation: f32) {
        let Some(connection) = self.players.get_mut(&player_id) else {
            debug!("Pose update for unknown player {}", player_id);
            return;
        };

        if !position.is_finite() || !rotation.is_finite() {
            warn!("Ignoring non-finite pose from {}", player_id);
            return;
        }

        connection.position = position;
        connection.action = action;
        connection.rotation = rotation;

        // Poses are superseded by the next one, so a busy angler just skips it
        if let Err(e) = connection
            .angler
            .try_send(AnglerCommand::Pose { position, rotation })
        {
            debug!("Pose for {} not forwarded: {}", player_id, e);
        }

        let message = connection.update_message();
        self.broadcast(&message);
    }

    pub fn start_fishing(&self, player_id: PlayerId, cast: Cast) {
        if !cast.position.is_finite() || !cast.direction.map_or(true, |d| d.is_finite()) {
            warn!("Ignoring non-finite cast from {}", player_id);
            return;
        }
        self.command(player_id, AnglerCommand::StartFishing(cast));
    }

    pub fn stop_fishing(&self, player_id: PlayerId) {
        self.command(player_id, AnglerCommand::StopFishing);
    }

    /// Client-resolved catch. Only honoured when enabled, and only for
    /// fish the randomizer could have produced.
    pub fn report_catch(&self, player_id: PlayerId, fish: CaughtFish) {
        if !self.players.contains_key(&player_id) {
            debug!("Catch report for unknown player {}", player_id);
            return;
        }

        if !self.accept_client_catches {
            self.reject_catch(player_id, "Client-reported catches are disabled".to_string());
            return;
        }

        match validate_reported_catch(&self.rules.species, &fish) {
            Ok(fish) => self.command(player_id, AnglerCommand::ReportCatch(fish)),
            Err(reason) => self.reject_catch(player_id, reason),
        }
    }

    fn reject_catch(&self, player_id: PlayerId, reason: String) {
        warn!("Rejected catch report from {}: {}", player_id, reason);
        self.metrics
            .rejected_catches_total
            .fetch_add(1, Ordering::Relaxed);
        self.send_to(player_id, ServerMessage::Warning { message: reason });
    }

    fn command(&self, player_id: PlayerId, command: AnglerCommand) {
        let Some(connection) = self.players.get(&player_id) else {
            debug!("Command for unknown player {}", player_id);
            return;
        };

        if let Err(e) = connection.angler.try_send(command) {
            warn!("Dropped command for {}: {}", player_id, e);
            deliver(
                &connection.outbox,
                player_id,
                ServerMessage::Warning {
                    message: "Too many requests".to_string(),
                },
            );
        }
    }

    /// Mirrors one actor update and fans it out to clients
    pub fn apply_update(&mut self, update: AnglerUpdate) {
        let player_id = update.player_id;
        let Some(connection) = self.players.get_mut(&player_id) else {
            debug!("Update for departed player {}", player_id);
            return;
        };

        let mut to_player = None;
        let mut to_all = None;

        match update.notice {
            AnglerNotice::Fishing(event) => {
                self.metrics.record_fishing_event(&event);

                match event {
                    FishingEvent::CastStarted { .. } => {
                        connection.fishing = true;
                        connection.action = PlayerAction::Fishing;
                        debug!("{} cast the line", connection.name);
                        to_all = Some(connection.update_message());
                    }
                    FishingEvent::BiteMissed { species_id } => {
                        debug!("{} missed a bite from {}", connection.name, species_id);
                    }
                    FishingEvent::BiteStarted {
                        species_id,
                        window_ms,
                        bobber,
                    } => {
                        to_player = Some(ServerMessage::BiteStarted {
                            species_id,
                            window_ms,
                            bobber,
                        });
                    }
                    FishingEvent::BiteEnded { reason } => {
                        to_player = Some(ServerMessage::BiteEnded { reason });
                    }
                    FishingEvent::FishCaught { fish, score, reaction_ms } => {
                        info!(
                            "{} caught a {} ({} pts, {}ms reaction)",
                            connection.name, fish.name, fish.points, reaction_ms
                        );
                        connection.fishing = false;
                        connection.action = PlayerAction::Idle;
                        connection.score = score;
                        to_all = Some(ServerMessage::FishCaught {
                            player_id,
                            fish,
                            score,
                        });
                    }
                    FishingEvent::Stopped => {
                        connection.fishing = false;
                        connection.action = PlayerAction::Idle;
                        debug!("{} reeled in empty", connection.name);
                        to_all = Some(connection.update_message());
                    }
                }
            }
            AnglerNotice::Rejected(e) => {
                warn!("Fishing request from {} ignored: {}", player_id, e);
                to_player = Some(ServerMessage::Warning {
                    message: e.to_string(),
                });
            }
            AnglerNotice::CatchReported { fish, score } => {
                info!("{} reported a {} ({} pts)", connection.name, fish.name, fish.points);
                self.metrics
                    .reported_catches_total
                    .fetch_add(1, Ordering::Relaxed);
                connection.score = score;
                to_all = Some(ServerMessage::FishCaught {
                    player_id,
                    fish,
                    score,
                });
            }
        }

        if let Some(message) = to_player {
            deliver(&connection.outbox, player_id, message);
        }
        if let Some(message) = to_all {
            self.broadcast(&message);
        }
    }

    /// Broadcast a message to all joined players
    pub fn broadcast(&self, message: &ServerMessage) {
        for (player_id, connection) in self.players.iter() {
            deliver(&connection.outbox, *player_id, message.clone());
        }
    }

    /// Send a message to a specific player
    pub fn send_to(&self, player_id: PlayerId, message: ServerMessage) {
        match self.players.get(&player_id) {
            Some(connection) => deliver(&connection.outbox, player_id, message),
            None => debug!("Dropping {} for unknown player {}", message.event_name(), player_id),
        }
    }
}

/// Non-blocking send; a client that cannot keep up loses messages, not the server
fn deliver(outbox: &Outbox, player_id: PlayerId, message: ServerMessage) {
    match outbox.try_send(message) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(message)) => {
            warn!("Outbox full for {}, dropping {}", player_id, message.event_name());
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("Outbox closed for {}", player_id);
        }
    }
}

/// Sanitize player name: trim, remove control and markup chars, limit
/// length, collapse whitespace. `None` if nothing is left.
pub fn sanitize_player_name(raw: &str) -> Option<String> {
    let filtered: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .filter(|c| *c != '<' && *c != '>' && *c != '&')
        .take(names::MAX_LEN)
        .collect();

    let collapsed = filtered.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Checks a client-reported fish against the species table. Species fields
/// come from the table; only size and weight are taken from the client.
pub fn validate_reported_catch(table: &SpeciesTable, fish: &CaughtFish) -> Result<CaughtFish, String> {
    let species = table
        .get(&fish.id)
        .ok_or_else(|| format!("Unknown species '{}'", fish.id))?;

    if fish.points != species.points || fish.rarity != species.rarity {
        return Err(format!("Catch does not match species '{}'", species.id));
    }

    if !measurements_plausible(species.rarity, fish.size_cm, fish.weight_kg) {
        return Err(format!(
            "Implausible {} ({}cm, {}kg)",
            species.name, fish.size_cm, fish.weight_kg
        ));
    }

    Ok(CaughtFish::with_measurements(
        species,
        fish.size_cm,
        fish.weight_kg,
        unix_time_ms(),
    ))
}

/// Start the task that turns angler updates into client messages
pub fn start_dispatcher(
    session: SharedSession,
    mut updates: mpsc::UnboundedReceiver<AnglerUpdate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Fishing event dispatcher started");
        while let Some(update) = updates.recv().await {
            session.write().await.apply_update(update);
        }
        debug!("Fishing event dispatcher stopped");
    })
}

/// Stop every angler, for server shutdown
pub async fn shutdown_all(session: &SharedSession) {
    let handles = session.write().await.drain();
    let count = handles.len();
    for handle in handles {
        handle.shutdown().await;
    }
    info!("Stopped {} anglers", count);
}
