/// Fishing session timing
pub mod fishing {
    /// How long a bite stays open for the player to reel in (milliseconds)
    pub const CATCH_WINDOW_MS: u64 = 3000;
    /// Distance from the caster to where the bobber lands, in world units
    pub const CAST_DISTANCE: f32 = 5.0;
    /// Upper bound on deadlines processed by one poll. Species tables reject
    /// a zero minimum delay, so every transition moves the deadline forward
    /// and a poll stops once it passes `now`.
    pub const MAX_TRANSITIONS_PER_POLL: usize = 1024;
}

/// Size/weight randomization per rarity tier
pub mod catch {
    /// Base sizes in centimetres: common, uncommon, rare, legendary
    pub const BASE_SIZE_CM: [f64; 4] = [10.0, 25.0, 50.0, 100.0];
    /// Base weights in kilograms: common, uncommon, rare, legendary
    pub const BASE_WEIGHT_KG: [f64; 4] = [0.2, 1.0, 5.0, 15.0];
    /// Lower multiplier applied to the base (70%)
    pub const VARIATION_MIN: f64 = 0.7;
    /// Width of the multiplier range, so the upper bound is 130%
    pub const VARIATION_SPAN: f64 = 0.6;
}

/// Player spawning
pub mod spawn {
    /// Players spawn uniformly in a square of this half-extent around the origin
    pub const HALF_EXTENT: f32 = 5.0;
    /// Ground height
    pub const GROUND_Y: f32 = 0.0;
}

/// Player naming rules
pub mod names {
    /// Maximum display name length in characters
    pub const MAX_LEN: usize = 16;
}
