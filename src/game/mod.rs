pub mod authority;
pub mod coins;
pub mod constants;
pub mod events;
pub mod flag;
pub mod match_result;
pub mod score;
pub mod spawner;
pub mod state;
pub mod team;
pub mod territory;
pub mod timer;
