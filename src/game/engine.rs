//! Fishing outcome engine
//!
//! One `Angler` per player. The engine is synchronous and owns no timers:
//! it exposes the single pending deadline through `next_deadline()` and
//! expects its driver to call `poll()` once that time has passed.
//!
//! ```text
//! Idle --start--> AwaitingBite --bite roll ok--> BiteWindowOpen --stop--> Idle (caught)
//!                   ^    |                             |
//!                   |    +--bite roll failed--+        +--window elapsed (escaped)
//!                   +-------------------------+--------+
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::game::clock::Clock;
use crate::game::constants::fishing;
use crate::game::fish::CaughtFish;
use crate::game::player::{PlayerAction, PlayerState};
use crate::game::random::RandomSource;
use crate::game::species::{FishSpecies, SelectionMode, SpeciesTable};
use crate::util::vec3::Vec3;

/// Shared, immutable rule set
#[derive(Debug, Clone)]
pub struct FishingRules {
    pub species: SpeciesTable,
    pub selection: SelectionMode,
    pub catch_window_ms: u64,
}

impl Default for FishingRules {
    fn default() -> Self {
        Self {
            species: SpeciesTable::builtin(),
            selection: SelectionMode::Compatible,
            catch_window_ms: fishing::CATCH_WINDOW_MS,
        }
    }
}

/// Where and which way the line was cast
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cast {
    pub position: Vec3,
    /// Facing direction; only the horizontal part is used
    pub direction: Option<Vec3>,
}

impl Cast {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            direction: None,
        }
    }

    /// Point on the water where the bobber sits
    pub fn bobber(&self) -> Vec3 {
        let base = Vec3::new(self.position.x, 0.0, self.position.z);
        match self.direction.map(|d| d.horizontal()) {
            Some(dir) if dir != Vec3::ZERO => base + dir * fishing::CAST_DISTANCE,
            _ => base,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingBite {
        species: usize,
        bites_at: u64,
    },
    BiteWindowOpen {
        species: usize,
        opened_at: u64,
        closes_at: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BiteEndReason {
    Caught,
    Escaped,
    /// Line pulled after the window had already run out
    Cancelled,
}

/// Signals for presentation and bookkeeping, in the order they happened
#[derive(Debug, Clone, PartialEq)]
pub enum FishingEvent {
    CastStarted { bobber: Vec3 },
    /// Delay expired but the bite roll failed; a new attempt was scheduled
    BiteMissed { species_id: String },
    BiteStarted {
        species_id: String,
        window_ms: u64,
        bobber: Vec3,
    },
    BiteEnded { reason: BiteEndReason },
    FishCaught {
        fish: CaughtFish,
        score: u32,
        /// Time from bite to reel-in
        reaction_ms: u64,
    },
    Stopped,
}

pub type Events = SmallVec<[FishingEvent; 2]>;

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Caught(CaughtFish),
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("no active fishing session")]
    NoActiveSession,
    #[error("already fishing")]
    AlreadyFishing,
}

/// Per-player fishing state machine
pub struct Angler<C: Clock, R: RandomSource> {
    rules: Arc<FishingRules>,
    clock: C,
    rng: R,
    player: PlayerState,
    state: SessionState,
    cast: Option<Cast>,
}

impl<C: Clock, R: RandomSource> Angler<C, R> {
    pub fn new(player: PlayerState, rules: Arc<FishingRules>, clock: C, rng: R) -> Self {
        Self {
            rules,
            clock,
            rng,
            player,
            state: SessionState::Idle,
            cast: None,
        }
    }

    pub fn player(&self) -> &PlayerState {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut PlayerState {
        &mut self.player
    }

    pub fn rules(&self) -> &FishingRules {
        &self.rules
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn cast(&self) -> Option<Cast> {
        self.cast
    }

    pub fn is_fishing(&self) -> bool {
        self.state != SessionState::Idle
    }

    /// Species currently on the line, if any
    pub fn current_species(&self) -> Option<&FishSpecies> {
        match self.state {
            SessionState::Idle => None,
            SessionState::AwaitingBite { species, .. }
            | SessionState::BiteWindowOpen { species, .. } => Some(self.rules.species.at(species)),
        }
    }

    /// The one pending deadline, in clock milliseconds
    pub fn next_deadline(&self) -> Option<u64> {
        match self.state {
            SessionState::Idle => None,
            SessionState::AwaitingBite { bites_at, .. } => Some(bites_at),
            SessionState::BiteWindowOpen { closes_at, .. } => Some(closes_at),
        }
    }

    /// Fraction of the catch window left, 1.0 at the bite and 0.0 at expiry
    pub fn bite_window_remaining(&self) -> Option<f64> {
        match self.state {
            SessionState::BiteWindowOpen {
                opened_at,
                closes_at,
                ..
            } => {
                let total = closes_at.saturating_sub(opened_at);
                if total == 0 {
                    return Some(0.0);
                }
                let left = closes_at.saturating_sub(self.clock.now_ms());
                Some(left as f64 / total as f64)
            }
            _ => None,
        }
    }

    pub fn start_fishing(&mut self, cast: Cast) -> Result<Events, SessionError> {
        if self.is_fishing() {
            return Err(SessionError::AlreadyFishing);
        }

        let now = self.clock.now_ms();
        self.cast = Some(cast);
        self.player.position = cast.position;
        self.player.action = PlayerAction::Fishing;
        self.begin_attempt(now);

        let mut events = Events::new();
        events.push(FishingEvent::CastStarted {
            bobber: cast.bobber(),
        });
        Ok(events)
    }

    /// Reels in. Converts an open bite into a catch, otherwise just ends the session.
    pub fn stop_fishing(&mut self) -> Result<(Outcome, Events), SessionError> {
        let now = self.clock.now_ms();
        let mut events = Events::new();

        let outcome = match self.state {
            SessionState::Idle => return Err(SessionError::NoActiveSession),
            SessionState::AwaitingBite { .. } => {
                events.push(FishingEvent::Stopped);
                Outcome::Stopped
            }
            SessionState::BiteWindowOpen {
                species,
                opened_at,
                closes_at,
            } => {
                if now < closes_at {
                    let fish = CaughtFish::roll(
                        self.rules.species.at(species),
                        &mut self.rng,
                        self.clock.unix_ms(),
                    );
                    let score = self.player.record_catch(fish.clone());
                    events.push(FishingEvent::BiteEnded {
                        reason: BiteEndReason::Caught,
                    });
                    events.push(FishingEvent::FishCaught {
                        fish: fish.clone(),
                        score,
                        reaction_ms: now.saturating_sub(opened_at),
                    });
                    Outcome::Caught(fish)
                } else {
                    events.push(FishingEvent::BiteEnded {
                        reason: BiteEndReason::Cancelled,
                    });
                    events.push(FishingEvent::Stopped);
                    Outcome::Stopped
                }
            }
        };

        self.state = SessionState::Idle;
        self.cast = None;
        self.player.action = PlayerAction::Idle;
        Ok((outcome, events))
    }

    /// Processes every deadline that has passed. Each transition happens at
    /// its own deadline, so a late wake-up replays exactly what an on-time
    /// driver would have seen.
    pub fn poll(&mut self) -> Events {
        let now = self.clock.now_ms();
        let mut events = Events::new();

        for _ in 0..fishing::MAX_TRANSITIONS_PER_POLL {
            match self.next_deadline() {
                Some(deadline) if deadline <= now => self.fire(deadline, &mut events),
                _ => break,
            }
        }

        events
    }

    fn fire(&mut self, at: u64, events: &mut Events) {
        match self.state {
            SessionState::Idle => {}
            SessionState::AwaitingBite { species, .. } => {
                let candidate = self.rules.species.at(species);
                if candidate.roll_bite(&mut self.rng) {
                    self.state = SessionState::BiteWindowOpen {
                        species,
                        opened_at: at,
                        closes_at: at + self.rules.catch_window_ms,
                    };
                    events.push(FishingEvent::BiteStarted {
                        species_id: candidate.id.clone(),
                        window_ms: self.rules.catch_window_ms,
                        bobber: self.cast.map(|c| c.bobber()).unwrap_or_default(),
                    });
                } else {
                    events.push(FishingEvent::BiteMissed {
                        species_id: candidate.id.clone(),
                    });
                    self.begin_attempt(at);
                }
            }
            SessionState::BiteWindowOpen { .. } => {
                events.push(FishingEvent::BiteEnded {
                    reason: BiteEndReason::Escaped,
                });
                self.begin_attempt(at);
            }
        }
    }

    /// Fresh species and delay, replacing whatever deadline was pending
    fn begin_attempt(&mut self, now: u64) {
        let rules = &self.rules;
        let species = rules.species.pick_index(rules.selection, &mut self.rng);
        let delay = rules.species.at(species).roll_delay(&mut self.rng);
        self.state = SessionState::AwaitingBite {
            species,
            bites_at: now + delay,
        };
    }

    /// Appends a catch that was resolved outside this engine
    pub fn record_reported_catch(&mut self, fish: CaughtFish) -> u32 {
        self.player.record_catch(fish)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::clock::ManualClock;
    use crate::game::random::{RandSource, ScriptedRandom};
    use uuid::Uuid;

    fn angler(draws: impl IntoIterator<Item = f64>) -> (Angler<ManualClock, ScriptedRandom>, ManualClock) {
        let clock = ManualClock::new(0);
        let player = PlayerState::new(Uuid::new_v4(), "Tester".to_string(), Vec3::ZERO);
        let angler = Angler::new(
            player,
            Arc::new(FishingRules::default()),
            clock.clone(),
            ScriptedRandom::new(draws).with_fallback(0.5),
        );
        (angler, clock)
    }

    fn species_id<C: Clock, R: RandomSource>(a: &Angler<C, R>) -> Option<String> {
        a.current_species().map(|s| s.id.clone())
    }

    #[test]
    fn test_common_1_scenario() {
        // species draw 0.1 -> common_1, delay draw 1/3 -> 3000ms, bite draw 0.5 <= 0.7
        let (mut a, clock) = angler([0.1, 1.0 / 3.0, 0.5, 0.5, 0.5]);

        let events = a.start_fishing(Cast::at(Vec3::ZERO)).unwrap();
        assert!(matches!(events[0], FishingEvent::CastStarted { .. }));
        assert_eq!(species_id(&a).as_deref(), Some("common_1"));
        assert_eq!(a.next_deadline(), Some(3000));

        clock.set(2999);
        assert!(a.poll().is_empty());

        clock.set(3000);
        let events = a.poll();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            FishingEvent::BiteStarted { species_id, window_ms: 3000, .. } if species_id == "common_1"
        ));
        assert_eq!(
            a.state(),
            SessionState::BiteWindowOpen {
                species: 0,
                opened_at: 3000,
                closes_at: 6000
            }
        );

        clock.set(3500);
        let (outcome, events) = a.stop_fishing().unwrap();
        let Outcome::Caught(fish) = outcome else {
            panic!("expected a catch");
        };
        assert_eq!(fish.id, "common_1");
        assert_eq!(fish.points, 10);
        assert_eq!(a.player().inventory().len(), 1);
        assert_eq!(a.player().score(), 10);
        assert!(matches!(
            events[1],
            FishingEvent::FishCaught { score: 10, reaction_ms: 500, .. }
        ));
        assert_eq!(a.state(), SessionState::Idle);
        assert_eq!(a.next_deadline(), None);
    }

    #[test]
    fn test_escape_resamples_and_keeps_fishing() {
        // bite at 3000, then the window lapses; next attempt draws common_2 / 3000ms
        let (mut a, clock) = angler([0.1, 1.0 / 3.0, 0.5, 0.8, 0.0]);
        a.start_fishing(Cast::at(Vec3::ZERO)).unwrap();

        clock.set(3000);
        a.poll();
        clock.set(6000);
        let events = a.poll();

        assert_eq!(
            events.as_slice(),
            &[FishingEvent::BiteEnded {
                reason: BiteEndReason::Escaped
            }]
        );
        assert_eq!(species_id(&a).as_deref(), Some("common_2"));
        assert_eq!(
            a.state(),
            SessionState::AwaitingBite {
                species: 1,
                bites_at: 9000
            }
        );
        assert!(a.player().inventory().is_empty());
        assert_eq!(a.player().score(), 0);
        assert_eq!(a.player().action, PlayerAction::Fishing);
    }

    #[test]
    fn test_failed_bite_loops_with_fresh_species() {
        // common_1 at 2000ms, bite roll 0.9 fails, then common_2 at +3000ms
        let (mut a, clock) = angler([0.1, 0.0, 0.9, 0.8, 0.0]);
        a.start_fishing(Cast::at(Vec3::ZERO)).unwrap();
        assert_eq!(a.next_deadline(), Some(2000));

        clock.set(2000);
        let events = a.poll();
        assert!(matches!(
            &events[0],
            FishingEvent::BiteMissed { species_id } if species_id == "common_1"
        ));
        assert_eq!(species_id(&a).as_deref(), Some("common_2"));
        assert_eq!(a.next_deadline(), Some(5000));
        assert!(a.is_fishing());
    }

    #[test]
    fn test_late_poll_replays_each_deadline() {
        // Bite at 3000 opens a window until 6000. Polling at 10000 also
        // processes the escape, schedules the next attempt from 6000 (bites
        // at 9000) and opens that window too.
        let (mut a, clock) = angler([0.1, 1.0 / 3.0, 0.5, 0.1, 1.0 / 3.0, 0.5]);
        a.start_fishing(Cast::at(Vec3::ZERO)).unwrap();

        clock.set(10_000);
        let events = a.poll();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], FishingEvent::BiteStarted { .. }));
        assert!(matches!(
            events[1],
            FishingEvent::BiteEnded {
                reason: BiteEndReason::Escaped
            }
        ));
        assert!(matches!(events[2], FishingEvent::BiteStarted { .. }));
        assert_eq!(
            a.state(),
            SessionState::BiteWindowOpen {
                species: 0,
                opened_at: 9000,
                closes_at: 12_000
            }
        );
        assert!(a.poll().is_empty());
    }

    #[test]
    fn test_short_delays_end_poll_at_now() {
        // 1ms delays that never bite: one attempt per millisecond, then the
        // deadline sits in the future again
        let table = SpeciesTable::from_json(
            r#"[{"id":"minnow","name":"Minnow","rarity":"common","points":1,"minTime":1,"maxTime":1,"probability":0.0}]"#,
        )
        .unwrap();
        let rules = FishingRules {
            species: table,
            ..FishingRules::default()
        };
        let clock = ManualClock::new(0);
        let player = PlayerState::new(Uuid::new_v4(), "Tester".to_string(), Vec3::ZERO);
        let mut a = Angler::new(
            player,
            Arc::new(rules),
            clock.clone(),
            ScriptedRandom::new([]).with_fallback(0.5),
        );

        a.start_fishing(Cast::at(Vec3::ZERO)).unwrap();
        clock.set(100);
        let events = a.poll();
        assert_eq!(events.len(), 100);
        assert!(events
            .iter()
            .all(|e| matches!(e, FishingEvent::BiteMissed { .. })));
        assert_eq!(a.next_deadline(), Some(101));
        assert!(a.poll().is_empty());
    }

    #[test]
    fn test_stop_while_awaiting_records_nothing() {
        let (mut a, clock) = angler([0.1, 0.5]);
        a.start_fishing(Cast::at(Vec3::ZERO)).unwrap();
        clock.set(1000);

        let (outcome, events) = a.stop_fishing().unwrap();
        assert_eq!(outcome, Outcome::Stopped);
        assert_eq!(events.as_slice(), &[FishingEvent::Stopped]);
        assert_eq!(a.state(), SessionState::Idle);
        assert!(a.player().inventory().is_empty());
        assert_eq!(a.player().action, PlayerAction::Idle);
    }

    #[test]
    fn test_stop_after_window_elapsed_but_unpolled() {
        let (mut a, clock) = angler([0.1, 1.0 / 3.0, 0.5]);
        a.start_fishing(Cast::at(Vec3::ZERO)).unwrap();
        clock.set(3000);
        a.poll();

        clock.set(6000);
        let (outcome, events) = a.stop_fishing().unwrap();
        assert_eq!(outcome, Outcome::Stopped);
        assert_eq!(
            events[0],
            FishingEvent::BiteEnded {
                reason: BiteEndReason::Cancelled
            }
        );
        assert!(a.player().inventory().is_empty());
    }

    #[test]
    fn test_stop_twice_is_noop() {
        let (mut a, clock) = angler([0.1, 1.0 / 3.0, 0.5]);
        a.start_fishing(Cast::at(Vec3::ZERO)).unwrap();
        clock.set(3000);
        a.poll();
        clock.set(3100);

        assert!(matches!(a.stop_fishing(), Ok((Outcome::Caught(_), _))));
        assert_eq!(a.stop_fishing().unwrap_err(), SessionError::NoActiveSession);
        assert_eq!(a.player().inventory().len(), 1);
        assert_eq!(a.player().score(), 10);
    }

    #[test]
    fn test_stop_without_start() {
        let (mut a, _clock) = angler([]);
        assert_eq!(a.stop_fishing().unwrap_err(), SessionError::NoActiveSession);
        assert_eq!(a.state(), SessionState::Idle);
        assert!(a.poll().is_empty());
    }

    #[test]
    fn test_start_twice_rejected() {
        let (mut a, _clock) = angler([0.1, 0.0]);
        a.start_fishing(Cast::at(Vec3::ZERO)).unwrap();
        let before = a.state();
        assert_eq!(
            a.start_fishing(Cast::at(Vec3::new(1.0, 0.0, 1.0))).unwrap_err(),
            SessionError::AlreadyFishing
        );
        assert_eq!(a.state(), before);
    }

    #[test]
    fn test_bite_window_remaining() {
        let (mut a, clock) = angler([0.1, 1.0 / 3.0, 0.5]);
        assert_eq!(a.bite_window_remaining(), None);
        a.start_fishing(Cast::at(Vec3::ZERO)).unwrap();
        clock.set(3000);
        a.poll();
        assert_eq!(a.bite_window_remaining(), Some(1.0));
        clock.set(4500);
        assert_eq!(a.bite_window_remaining(), Some(0.5));
        clock.set(7000);
        assert_eq!(a.bite_window_remaining(), Some(0.0));
    }

    #[test]
    fn test_bobber_follows_direction() {
        let cast = Cast {
            position: Vec3::new(1.0, 2.0, 1.0),
            direction: Some(Vec3::new(0.0, -0.5, 2.0)),
        };
        let bobber = cast.bobber();
        assert!((bobber.x - 1.0).abs() < 1e-5);
        assert_eq!(bobber.y, 0.0);
        assert!((bobber.z - 6.0).abs() < 1e-5);
        assert_eq!(Cast::at(Vec3::new(3.0, 1.0, 4.0)).bobber(), Vec3::new(3.0, 0.0, 4.0));
    }

    #[test]
    fn test_catches_always_add_points_exactly() {
        let clock = ManualClock::new(0);
        let player = PlayerState::new(Uuid::new_v4(), "Sim".to_string(), Vec3::ZERO);
        let mut a = Angler::new(
            player,
            Arc::new(FishingRules::default()),
            clock.clone(),
            RandSource::seeded(2024),
        );

        let mut catches = 0;
        for _ in 0..200 {
            a.start_fishing(Cast::at(Vec3::ZERO)).unwrap();
            // Step to each deadline until a window opens
            while !matches!(a.state(), SessionState::BiteWindowOpen { .. }) {
                let deadline = a.next_deadline().unwrap();
                clock.set(deadline);
                a.poll();
            }
            let before = a.player().score();
            clock.advance(1);
            match a.stop_fishing().unwrap() {
                (Outcome::Caught(fish), _) => {
                    catches += 1;
                    assert_eq!(a.player().score(), before + fish.points);
                }
                (Outcome::Stopped, _) => panic!("window was open"),
            }
        }
        assert_eq!(catches, 200);
        assert_eq!(a.player().inventory().len(), 200);
    }

    #[test]
    fn test_weighted_mode_reaches_rare_species() {
        let clock = ManualClock::new(0);
        let player = PlayerState::new(Uuid::new_v4(), "Sim".to_string(), Vec3::ZERO);
        let rules = FishingRules {
            selection: SelectionMode::Weighted,
            ..FishingRules::default()
        };
        let mut a = Angler::new(player, Arc::new(rules), clock.clone(), RandSource::seeded(8));

        let mut seen_rare = false;
        for _ in 0..500 {
            a.start_fishing(Cast::at(Vec3::ZERO)).unwrap();
            if a.current_species().map(|s| s.rarity >= crate::game::species::Rarity::Rare) == Some(true) {
                seen_rare = true;
            }
            a.stop_fishing().unwrap();
        }
        assert!(seen_rare);
    }
}
