//! In-process loopback transport
//!
//! Connects one authority with any number of peers through crossbeam channels,
//! carrying bincode-encoded frames. Deliveries can be duplicated to exercise the
//! at-least-once contract of every consumer.

use crossbeam_channel::{unbounded, Receiver, Sender};
use hashbrown::HashMap;
use tracing::{debug, warn};

use crate::command::PeerId;
use crate::net::protocol::{decode, encode, ClientMessage, EncodeError, ServerMessage};

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("Peer {0} is not connected")]
    UnknownPeer(PeerId),
    #[error("Link closed")]
    Disconnected,
}

/// Authority end of the loopback
pub struct LoopbackTransport {
    inbound_tx: Sender<(PeerId, Vec<u8>)>,
    inbound_rx: Receiver<(PeerId, Vec<u8>)>,
    peers: HashMap<PeerId, Sender<Vec<u8>>>,
    /// Copies of every frame delivered (1 = no duplication)
    copies: usize,
    bytes_sent: u64,
    bytes_received: u64,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::with_duplication(1)
    }

    /// Every frame, in both directions, is delivered `copies` times
    pub fn with_duplication(copies: usize) -> Self {
        let (inbound_tx, inbound_rx) = unbounded();
        Self {
            inbound_tx,
            inbound_rx,
            peers: HashMap::new(),
            copies: copies.max(1),
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    /// Open a link for a peer
    pub fn connect(&mut self, peer: PeerId) -> PeerLink {
        let (tx, rx) = unbounded();
        self.peers.insert(peer, tx);
        debug!("Peer {} connected to loopback", peer);
        PeerLink {
            peer,
            outbound: self.inbound_tx.clone(),
            inbound: rx,
            copies: self.copies,
        }
    }

    pub fn disconnect(&mut self, peer: PeerId) -> bool {
        self.peers.remove(&peer).is_some()
    }

    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.peers.contains_key(&peer)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Send to one peer
    pub fn send_to(&mut self, peer: PeerId, message: &ServerMessage) -> Result<(), TransportError> {
        let frame = encode(message)?;
        let tx = self.peers.get(&peer).ok_or(TransportError::UnknownPeer(peer))?;
        for _ in 0..self.copies {
            tx.send(frame.clone()).map_err(|_| TransportError::Disconnected)?;
        }
        self.bytes_sent += (frame.len() * self.copies) as u64;
        Ok(())
    }

    /// Send to every connected peer. Peers whose link is gone are dropped.
    /// Returns the number of peers reached.
    pub fn broadcast(&mut self, message: &ServerMessage) -> Result<usize, TransportError> {
        let frame = encode(message)?;
        let copies = self.copies;
        self.peers.retain(|peer, tx| {
            let alive = (0..copies).all(|_| tx.send(frame.clone()).is_ok());
            if !alive {
                debug!("Dropping closed link to {}", peer);
            }
            alive
        });
        self.bytes_sent += (frame.len() * copies * self.peers.len()) as u64;
        Ok(self.peers.len())
    }

    /// Drain and decode every frame received from peers. Malformed frames are
    /// logged and skipped.
    pub fn receive(&mut self) -> Vec<(PeerId, ClientMessage)> {
        let mut messages = Vec::new();
        for (peer, frame) in self.inbound_rx.try_iter() {
            self.bytes_received += frame.len() as u64;
            if !self.peers.contains_key(&peer) {
                continue;
            }
            match decode::<ClientMessage>(&frame) {
                Ok(message) => messages.push((peer, message)),
                Err(e) => warn!("Malformed frame from {}: {}", peer, e),
            }
        }
        messages
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Peer end of the loopback
pub struct PeerLink {
    peer: PeerId,
    outbound: Sender<(PeerId, Vec<u8>)>,
    inbound: Receiver<Vec<u8>>,
    copies: usize,
}

impl PeerLink {
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn send(&self, message: &ClientMessage) -> Result<(), TransportError> {
        let frame = encode(message)?;
        for _ in 0..self.copies {
            self.outbound
                .send((self.peer, frame.clone()))
                .map_err(|_| TransportError::Disconnected)?;
        }
        Ok(())
    }

    /// Drain and decode everything received
    pub fn receive(&self) -> Vec<ServerMessage> {
        self.inbound
            .try_iter()
            .filter_map(|frame| match decode::<ServerMessage>(&frame) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!("Malformed frame for {}: {}", self.peer, e);
                    None
                }
            })
            .collect()
    }
}
