use serde::{Deserialize, Serialize};

use crate::command::PeerCommand;
use crate::game::authority::EntityRef;
use crate::game::events::{FlagStatus, Notification};
use crate::game::state::{CoinId, PlayerId};
use crate::game::team::Team;
use crate::util::vec3::Vec3;

/// Messages from a peer to the authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Fire-and-forget gameplay command
    Command(PeerCommand),
    /// Ping for latency measurement
    Ping { timestamp: u64 },
}

/// Messages from the authority to peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// One sequenced state change
    Update(ReplicatedUpdate),
    /// Full state for a late joiner
    Snapshot(WorldSnapshot),
    /// Pong response with server timestamp
    Pong {
        client_timestamp: u64,
        server_timestamp: u64,
    },
}

/// A notification stamped for replication.
///
/// `seq` increases by one per change of the same entity; a mirror ignores any
/// update whose `seq` is not newer than the last one it applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedUpdate {
    pub entity: EntityRef,
    pub seq: u64,
    pub tick: u64,
    pub notification: Notification,
}

/// Flag state in a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlagSnapshot {
    pub team: Team,
    pub state: FlagStatus,
    pub carrier: Option<PlayerId>,
    pub position: Vec3,
}

/// Score and buffs in a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TeamSnapshot {
    pub team: Team,
    pub score: i64,
    pub damage_buff: bool,
    pub defense_buff: bool,
}

/// Held coins of one player in a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CustodySnapshot {
    pub player: PlayerId,
    pub count: usize,
    pub value: i64,
}

/// A world coin in a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoinSnapshot {
    pub id: CoinId,
    pub faction: Team,
    pub position: Vec3,
    pub collected: bool,
}

/// A player in a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub team: Team,
    pub position: Vec3,
    pub alive: bool,
}

/// Complete replicated state with the sequence number of every entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub tick: u64,
    pub flags: Vec<FlagSnapshot>,
    pub teams: Vec<TeamSnapshot>,
    pub custody: Vec<CustodySnapshot>,
    pub coins: Vec<CoinSnapshot>,
    pub players: Vec<PlayerSnapshot>,
    pub winner: Option<Team>,
    /// Last sequence number issued per entity
    pub sequences: Vec<(EntityRef, u64)>,
}

/// Encode a message using bincode
/// Uses legacy config for fixed-size integers
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);
