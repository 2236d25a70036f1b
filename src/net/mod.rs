pub mod dos_protection;
pub mod game_session;
pub mod protocol;
pub mod transport;
