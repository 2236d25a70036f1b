//! Angler actor - one tokio task per player driving the fishing engine
//!
//! The task owns the player's `Angler` and waits on either its command
//! channel or the engine's single pending deadline. Whatever the engine
//! emits is forwarded on the shared update channel. The authoritative
//! server and an offline client run the same task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::game::clock::TokioClock;
use crate::game::engine::{Angler, Cast, FishingEvent, FishingRules, SessionError, SessionState};
use crate::game::fish::CaughtFish;
use crate::game::player::{PlayerId, PlayerState};
use crate::game::random::RandomSource;
use crate::util::vec3::Vec3;

/// Commands accepted by an angler task
#[derive(Debug)]
pub enum AnglerCommand {
    StartFishing(Cast),
    StopFishing,
    /// Catch resolved by the client itself (offline play, older clients)
    ReportCatch(CaughtFish),
    /// Avatar moved or turned; the session owns `action`
    Pose { position: Vec3, rotation: f32 },
    Query(oneshot::Sender<AnglerSnapshot>),
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct AnglerSnapshot {
    pub player: PlayerState,
    pub state: SessionState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnglerNotice {
    Fishing(FishingEvent),
    Rejected(SessionError),
    CatchReported { fish: CaughtFish, score: u32 },
}

/// Something an angler task has to say, tagged with its player
#[derive(Debug, Clone, PartialEq)]
pub struct AnglerUpdate {
    pub player_id: PlayerId,
    pub notice: AnglerNotice,
}

/// Sender half of the shared update channel. Unbounded so an angler never
/// waits on whoever consumes updates.
pub type UpdateSender = mpsc::UnboundedSender<AnglerUpdate>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AnglerBusy {
    #[error("angler command buffer is full")]
    Full,
    #[error("angler task has stopped")]
    Closed,
}

const COMMAND_BUFFER: usize = 32;

/// Handle to a running angler task
pub struct AnglerHandle {
    player_id: PlayerId,
    commands: mpsc::Sender<AnglerCommand>,
    task: JoinHandle<PlayerState>,
}

impl AnglerHandle {
    pub fn spawn<R>(player: PlayerState, rules: Arc<FishingRules>, rng: R, updates: UpdateSender) -> Self
    where
        R: RandomSource + Send + 'static,
    {
        let player_id = player.id;
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let angler = Angler::new(player, rules, TokioClock::new(), rng);
        let task = tokio::spawn(run_angler(angler, rx, updates));

        Self {
            player_id,
            commands,
            task,
        }
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    /// Queue a command. Returns false if the task has already stopped.
    pub async fn send(&self, command: AnglerCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    /// Queue a command without waiting for buffer space
    pub fn try_send(&self, command: AnglerCommand) -> Result<(), AnglerBusy> {
        self.commands.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => AnglerBusy::Full,
            mpsc::error::TrySendError::Closed(_) => AnglerBusy::Closed,
        })
    }

    pub async fn snapshot(&self) -> Option<AnglerSnapshot> {
        let (tx, rx) = oneshot::channel();
        if !self.send(AnglerCommand::Query(tx)).await {
            return None;
        }
        rx.await.ok()
    }

    /// Tears the session down without resolving any open bite and returns
    /// the final player state.
    pub async fn shutdown(self) -> Option<PlayerState> {
        let _ = self.commands.send(AnglerCommand::Shutdown).await;
        match self.task.await {
            Ok(player) => Some(player),
            Err(e) => {
                warn!("Angler task for {} ended abnormally: {}", self.player_id, e);
                None
            }
        }
    }
}

async fn run_angler<R: RandomSource>(
    mut angler: Angler<TokioClock, R>,
    mut commands: mpsc::Receiver<AnglerCommand>,
    updates: UpdateSender,
) -> PlayerState {
    let player_id = angler.player().id;
    debug!("Angler task started for {}", player_id);

    loop {
        let deadline = angler
            .next_deadline()
            .map(|ms| angler.clock().instant_at(ms));
        // Disabled branches still build their future, so it needs some instant
        let wake_at = deadline
            .unwrap_or_else(|| tokio::time::Instant::now() + Duration::from_secs(3600));

        let notices: Vec<AnglerNotice> = tokio::select! {
            command = commands.recv() => {
                match command {
                    None | Some(AnglerCommand::Shutdown) => break,
                    Some(command) => handle_command(&mut angler, command),
                }
            }
            _ = tokio::time::sleep_until(wake_at), if deadline.is_some() => {
                angler.poll().into_iter().map(AnglerNotice::Fishing).collect()
            }
        };

        for notice in notices {
            if updates.send(AnglerUpdate { player_id, notice }).is_err() {
                debug!("Update channel closed, stopping angler {}", player_id);
                return angler.player().clone();
            }
        }
    }

    debug!("Angler task stopped for {}", player_id);
    angler.player().clone()
}

fn handle_command<R: RandomSource>(
    angler: &mut Angler<TokioClock, R>,
    command: AnglerCommand,
) -> Vec<AnglerNotice> {
    match command {
        AnglerCommand::StartFishing(cast) => match angler.start_fishing(cast) {
            Ok(events) => events.into_iter().map(AnglerNotice::Fishing).collect(),
            Err(e) => vec![AnglerNotice::Rejected(e)],
        },
        AnglerCommand::StopFishing => match angler.stop_fishing() {
            Ok((_, events)) => events.into_iter().map(AnglerNotice::Fishing).collect(),
            Err(e) => vec![AnglerNotice::Rejected(e)],
        },
        AnglerCommand::ReportCatch(fish) => {
            let score = angler.record_reported_catch(fish.clone());
            vec![AnglerNotice::CatchReported { fish, score }]
        }
        AnglerCommand::Pose { position, rotation } => {
            let player = angler.player_mut();
            player.position = position;
            player.rotation = rotation;
            Vec::new()
        }
        AnglerCommand::Query(reply) => {
            let _ = reply.send(AnglerSnapshot {
                player: angler.player().clone(),
                state: angler.state(),
            });
            Vec::new()
        }
        // Handled by the loop
        AnglerCommand::Shutdown => Vec::new(),
    }
}
