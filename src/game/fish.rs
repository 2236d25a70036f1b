//! Caught fish and the size/weight randomizer

use serde::{Deserialize, Serialize};

use crate::game::constants::catch;
use crate::game::random::RandomSource;
use crate::game::species::{FishSpecies, Rarity};

/// A fish in a player's inventory. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaughtFish {
    pub id: String,
    pub name: String,
    pub rarity: Rarity,
    pub points: u32,
    pub size_cm: u32,
    pub weight_kg: f64,
    /// Unix milliseconds
    pub caught_at_ms: u64,
}

impl CaughtFish {
    /// Rolls size and weight for `species`. Draw order: size, then weight.
    pub fn roll(species: &FishSpecies, rng: &mut impl RandomSource, caught_at_ms: u64) -> Self {
        let size_cm = random_size(species.rarity, rng);
        let weight_kg = random_weight(species.rarity, rng);
        Self::with_measurements(species, size_cm, weight_kg, caught_at_ms)
    }

    pub fn with_measurements(
        species: &FishSpecies,
        size_cm: u32,
        weight_kg: f64,
        caught_at_ms: u64,
    ) -> Self {
        Self {
            id: species.id.clone(),
            name: species.name.clone(),
            rarity: species.rarity,
            points: species.points,
            size_cm,
            weight_kg,
            caught_at_ms,
        }
    }
}

fn variation(rng: &mut impl RandomSource) -> f64 {
    catch::VARIATION_MIN + rng.unit() * catch::VARIATION_SPAN
}

pub fn base_size(rarity: Rarity) -> f64 {
    catch::BASE_SIZE_CM[rarity.tier()]
}

pub fn base_weight(rarity: Rarity) -> f64 {
    catch::BASE_WEIGHT_KG[rarity.tier()]
}

/// Size in whole centimetres, base ±30%
pub fn random_size(rarity: Rarity, rng: &mut impl RandomSource) -> u32 {
    (base_size(rarity) * variation(rng)).round() as u32
}

/// Weight in kilograms to one decimal, base ±30%
pub fn random_weight(rarity: Rarity, rng: &mut impl RandomSource) -> f64 {
    round_to_tenth(base_weight(rarity) * variation(rng))
}

fn round_to_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Whether a size/weight pair could have come out of the randomizer.
/// Rounding can move a value at most half a unit past the raw bounds.
pub fn measurements_plausible(rarity: Rarity, size_cm: u32, weight_kg: f64) -> bool {
    let lo = catch::VARIATION_MIN;
    let hi = catch::VARIATION_MIN + catch::VARIATION_SPAN;

    let size = size_cm as f64;
    let size_ok = size >= (base_size(rarity) * lo).round() && size <= (base_size(rarity) * hi).round();

    let weight_ok = weight_kg.is_finite()
        && weight_kg >= round_to_tenth(base_weight(rarity) * lo) - 1e-9
        && weight_kg <= round_to_tenth(base_weight(rarity) * hi) + 1e-9;

    size_ok && weight_ok
}

/// Full reduction over the inventory
pub fn score(inventory: &[CaughtFish]) -> u32 {
    inventory.iter().map(|fish| fish.points).sum()
}
