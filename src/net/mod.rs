pub mod game_session;
pub mod protocol;
pub mod replication;
pub mod transport;
