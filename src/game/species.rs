//! Fish species table and species sampling
//!
//! Each species carries a single `probability` that the rules use
//! twice: as a cumulative selection weight when picking which species is on
//! the line, and as the bite success chance once its delay expires. The
//! table's probabilities sum to 2.15, so in `Compatible` mode only the first
//! two species can ever be selected. `Weighted` mode uses the separate
//! `selection_weight` field as a proper normalized distribution.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::game::random::RandomSource;

/// Rarity tier, ordered from most to least common
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Legendary,
}

impl Rarity {
    pub const ALL: [Rarity; 4] = [
        Rarity::Common,
        Rarity::Uncommon,
        Rarity::Rare,
        Rarity::Legendary,
    ];

    /// Index into per-tier constant tables
    pub fn tier(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Rarity::Common => "common",
            Rarity::Uncommon => "uncommon",
            Rarity::Rare => "rare",
            Rarity::Legendary => "legendary",
        }
    }
}

/// Static description of a catchable species
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FishSpecies {
    pub id: String,
    pub name: String,
    pub rarity: Rarity,
    pub points: u32,
    /// Shortest bite delay in milliseconds
    #[serde(rename = "minTime")]
    pub min_time_ms: u64,
    /// Longest bite delay in milliseconds
    #[serde(rename = "maxTime")]
    pub max_time_ms: u64,
    /// Chance that a bite succeeds once the delay expires
    pub probability: f64,
    /// Weight used by `SelectionMode::Weighted`; defaults to `probability`
    #[serde(default, rename = "selectionWeight", skip_serializing_if = "Option::is_none")]
    pub selection_weight: Option<f64>,
}

impl FishSpecies {
    fn new(
        id: &str,
        name: &str,
        rarity: Rarity,
        points: u32,
        min_time_ms: u64,
        max_time_ms: u64,
        probability: f64,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            rarity,
            points,
            min_time_ms,
            max_time_ms,
            probability,
            selection_weight: None,
        }
    }

    pub fn weight(&self) -> f64 {
        self.selection_weight.unwrap_or(self.probability)
    }

    /// Draw a bite delay uniformly in `[min_time_ms, max_time_ms]`
    pub fn roll_delay(&self, rng: &mut impl RandomSource) -> u64 {
        rng.between(self.min_time_ms, self.max_time_ms)
    }

    /// Roll whether a bite actually happens once the delay expires
    pub fn roll_bite(&self, rng: &mut impl RandomSource) -> bool {
        rng.unit() <= self.probability
    }
}

/// How the next species on the line is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    /// Cumulative `probability` against one unit draw, first entry as fallback
    #[default]
    Compatible,
    /// Proportional to `selection_weight` over the whole table
    Weighted,
}

impl FromStr for SelectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compatible" | "compat" => Ok(SelectionMode::Compatible),
            "weighted" => Ok(SelectionMode::Weighted),
            other => Err(format!("unknown selection mode '{}'", other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpeciesTableError {
    #[error("species table is empty")]
    Empty,
    #[error("species '{id}' has a zero minimum bite delay")]
    ZeroDelay { id: String },
    #[error("species '{id}' has min time {min}ms greater than max time {max}ms")]
    InvalidDelay { id: String, min: u64, max: u64 },
    #[error("species '{id}' has probability {value} outside 0..=1")]
    InvalidProbability { id: String, value: f64 },
    #[error("species '{id}' has negative or non-finite selection weight {value}")]
    InvalidWeight { id: String, value: f64 },
    #[error("duplicate species id '{0}'")]
    DuplicateId(String),
    #[error("failed to read species table: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse species table: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Ordered, validated species table. Declaration order matters for sampling.
/// Deserializing goes through `SpeciesTable::new`, so it validates too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<FishSpecies>", into = "Vec<FishSpecies>")]
pub struct SpeciesTable {
    species: Vec<FishSpecies>,
}

impl SpeciesTable {
    pub fn new(species: Vec<FishSpecies>) -> Result<Self, SpeciesTableError> {
        let table = Self { species };
        table.validate()?;
        Ok(table)
    }

    /// The seven species shipped with the game
    pub fn builtin() -> Self {
        Self {
            species: vec![
                FishSpecies::new("common_1", "Lambari", Rarity::Common, 10, 2000, 5000, 0.7),
                FishSpecies::new("common_2", "Tilápia", Rarity::Common, 15, 3000, 6000, 0.6),
                FishSpecies::new("uncommon_1", "Tucunaré", Rarity::Uncommon, 30, 5000, 8000, 0.3),
                FishSpecies::new("uncommon_2", "Traíra", Rarity::Uncommon, 35, 5000, 9000, 0.25),
                FishSpecies::new("rare_1", "Dourado", Rarity::Rare, 60, 7000, 12000, 0.15),
                FishSpecies::new("rare_2", "Pirarucu", Rarity::Rare, 80, 8000, 15000, 0.1),
                FishSpecies::new("legendary_1", "Jaú Gigante", Rarity::Legendary, 150, 10000, 20000, 0.05),
            ],
        }
    }

    pub fn from_json(json: &str) -> Result<Self, SpeciesTableError> {
        let species: Vec<FishSpecies> = serde_json::from_str(json)?;
        Self::new(species)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SpeciesTableError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), SpeciesTableError> {
        if self.species.is_empty() {
            return Err(SpeciesTableError::Empty);
        }

        let mut seen = hashbrown::HashSet::with_capacity(self.species.len());
        for s in &self.species {
            if !seen.insert(s.id.as_str()) {
                return Err(SpeciesTableError::DuplicateId(s.id.clone()));
            }
            // A zero delay lets one poll chain attempts without time passing
            if s.min_time_ms == 0 {
                return Err(SpeciesTableError::ZeroDelay { id: s.id.clone() });
            }
            if s.min_time_ms > s.max_time_ms {
                return Err(SpeciesTableError::InvalidDelay {
                    id: s.id.clone(),
                    min: s.min_time_ms,
                    max: s.max_time_ms,
                });
            }
            if !(0.0..=1.0).contains(&s.probability) {
                return Err(SpeciesTableError::InvalidProbability {
                    id: s.id.clone(),
                    value: s.probability,
                });
            }
            let weight = s.weight();
            if !weight.is_finite() || weight < 0.0 {
                return Err(SpeciesTableError::InvalidWeight {
                    id: s.id.clone(),
                    value: weight,
                });
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&FishSpecies> {
        self.species.iter().find(|s| s.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FishSpecies> {
        self.species.iter()
    }

    pub fn len(&self) -> usize {
        self.species.len()
    }

    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }

    /// Sum of `probability` across the table (2.15 for the builtin table)
    pub fn probability_sum(&self) -> f64 {
        self.species.iter().map(|s| s.probability).sum()
    }

    /// Species at a position previously returned by `pick_index`
    pub fn at(&self, index: usize) -> &FishSpecies {
        &self.species[index]
    }

    pub fn pick(&self, mode: SelectionMode, rng: &mut impl RandomSource) -> &FishSpecies {
        &self.species[self.pick_index(mode, rng)]
    }

    pub fn pick_index(&self, mode: SelectionMode, rng: &mut impl RandomSource) -> usize {
        match mode {
            SelectionMode::Compatible => self.compatible_index(rng),
            SelectionMode::Weighted => self.weighted_index(rng),
        }
    }

    /// Returns the first species whose running `probability` sum reaches the
    /// draw. Falls back to the first entry when the sum stays below it.
    pub fn pick_compatible(&self, rng: &mut impl RandomSource) -> &FishSpecies {
        &self.species[self.compatible_index(rng)]
    }

    /// Proportional draw over `selection_weight`
    pub fn pick_weighted(&self, rng: &mut impl RandomSource) -> &FishSpecies {
        &self.species[self.weighted_index(rng)]
    }

    fn compatible_index(&self, rng: &mut impl RandomSource) -> usize {
        let r = rng.unit();
        let mut cumulative = 0.0;
        for (i, species) in self.species.iter().enumerate() {
            cumulative += species.probability;
            if r <= cumulative {
                return i;
            }
        }
        0
    }

    fn weighted_index(&self, rng: &mut impl RandomSource) -> usize {
        let total: f64 = self.species.iter().map(FishSpecies::weight).sum();
        if total <= 0.0 {
            return 0;
        }

        let r = rng.unit() * total;
        let mut cumulative = 0.0;
        for (i, species) in self.species.iter().enumerate() {
            cumulative += species.weight();
            if r < cumulative {
                return i;
            }
        }
        // Float drift at the top end of the range
        self.species
            .iter()
            .rposition(|s| s.weight() > 0.0)
            .unwrap_or(0)
    }
}

impl TryFrom<Vec<FishSpecies>> for SpeciesTable {
    type Error = SpeciesTableError;

    fn try_from(species: Vec<FishSpecies>) -> Result<Self, Self::Error> {
        Self::new(species)
    }
}

impl From<SpeciesTable> for Vec<FishSpecies> {
    fn from(table: SpeciesTable) -> Self {
        table.species
    }
}

impl Default for SpeciesTable {
    fn default() -> Self {
        Self::builtin()
    }
}
