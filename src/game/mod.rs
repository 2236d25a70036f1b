pub mod constants;
pub mod species;
pub mod random;
pub mod clock;
pub mod fish;
pub mod player;
pub mod engine;
pub mod actor;
