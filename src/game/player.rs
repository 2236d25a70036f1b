use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::constants::spawn;
use crate::game::fish::{self, CaughtFish};
use crate::util::vec3::Vec3;

/// Unique player identifier
pub type PlayerId = Uuid;

/// What the avatar is doing, mirrored to other clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerAction {
    #[default]
    Idle,
    Fishing,
    Pulling,
}

/// Player identity, avatar state and inventory
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub id: PlayerId,
    pub name: String,
    pub position: Vec3,
    pub rotation: f32,
    pub action: PlayerAction,
    inventory: Vec<CaughtFish>,
}

impl PlayerState {
    pub fn new(id: PlayerId, name: String, position: Vec3) -> Self {
        Self {
            id,
            name,
            position,
            rotation: 0.0,
            action: PlayerAction::Idle,
            inventory: Vec::new(),
        }
    }

    /// Appends a catch and returns the recomputed score
    pub fn record_catch(&mut self, fish: CaughtFish) -> u32 {
        self.inventory.push(fish);
        self.score()
    }

    pub fn inventory(&self) -> &[CaughtFish] {
        &self.inventory
    }

    pub fn score(&self) -> u32 {
        fish::score(&self.inventory)
    }
}

/// Random spawn point on the island, `[-5, 5]` on both horizontal axes
pub fn random_spawn_position() -> Vec3 {
    let mut rng = rand::thread_rng();
    Vec3::new(
        rng.gen_range(-spawn::HALF_EXTENT..spawn::HALF_EXTENT),
        spawn::GROUND_Y,
        rng.gen_range(-spawn::HALF_EXTENT..spawn::HALF_EXTENT),
    )
}
