//! # Alohanet medium
//! The medium arbitrates a shared broadcast channel in discrete time slots.
//! Peers connect over TCP and transmit at will; each slot the medium waits
//! for activity, reads at most one frame per peer, and broadcasts either the
//! unique transmission or a noise frame announcing a collision. Peer records
//! are append-only; a peer that disconnects is marked dead and skipped, but
//! stays in the final report.

use crate::wire::{
    builtin::{HEADER_SIZE, MAX_FRAME_SIZE},
    FrameHeader, NoiseFrame,
};
use anyhow::Result;
use futures::{stream::FuturesUnordered, FutureExt, StreamExt};
use std::{io, net::SocketAddr, time::Duration};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time,
};
use zerocopy::FromBytes;

#[derive(Debug, Clone)]
pub struct MediumConfig {
    pub port: u16,
    pub slot_time: Duration,
}

impl MediumConfig {
    pub fn new(port: u16, slot_time: Duration) -> Self {
        Self { port, slot_time }
    }
}

struct PeerRecord {
    addr: SocketAddr,
    stream: TcpStream,
    frames: u64,
    collisions: u64,
    dead: bool,
}

/// Per-peer accounting handed out when the slot loop exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerReport {
    pub addr: SocketAddr,
    pub frames: u64,
    pub collisions: u64,
}

/// Everything a single slot observed: which peers transmitted, and the bytes
/// of the last frame read (the broadcast candidate when the slot was solo).
struct SlotActivity {
    transmitters: Vec<usize>,
    frame: Vec<u8>,
}

enum Wake {
    Shutdown,
    Accept(io::Result<(TcpStream, SocketAddr)>),
    Transmission,
    Idle,
}

pub struct MediumArbiter {
    listener: TcpListener,
    slot_time: Duration,
    peers: Vec<PeerRecord>,
}

impl MediumArbiter {
    pub async fn bind(config: MediumConfig) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
        Ok(Self {
            listener,
            slot_time: config.slot_time,
            peers: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs the slot loop until the shutdown channel fires or its sender is
    /// dropped, then reports every peer ever seen.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> Vec<PeerReport> {
        loop {
            let wake = tokio::select! {
                biased;
                _ = &mut shutdown => Wake::Shutdown,
                accepted = self.listener.accept() => Wake::Accept(accepted),
                _ = readable_any(&self.peers) => Wake::Transmission,
                _ = time::sleep(self.slot_time) => Wake::Idle,
            };

            // Peers admitted below were not part of this slot's wait, so the
            // read sweep must not see them until the next slot.
            let known = self.peers.len();
            match wake {
                Wake::Shutdown => break,
                Wake::Idle => continue,
                Wake::Accept(accepted) => self.admit(accepted),
                Wake::Transmission => {
                    if let Some(accepted) = self.listener.accept().now_or_never() {
                        self.admit(accepted);
                    }
                }
            }

            let activity = self.sweep(known);
            self.resolve(activity);
        }

        self.reports()
    }

    fn admit(&mut self, accepted: io::Result<(TcpStream, SocketAddr)>) {
        match accepted {
            Ok((stream, addr)) => {
                log::debug!("Peer {} joined the medium", addr);
                self.peers.push(PeerRecord {
                    addr,
                    stream,
                    frames: 0,
                    collisions: 0,
                    dead: false,
                });
            }
            Err(err) => log::warn!("Failed to accept a peer: {}", err),
        }
    }

    /// Reads at most one frame from every live peer admitted before this
    /// slot. A zero-length read marks the peer dead.
    fn sweep(&mut self, known: usize) -> SlotActivity {
        let mut transmitters = Vec::new();
        let mut frame = Vec::new();
        let mut buf = [0u8; MAX_FRAME_SIZE];
        for index in 0..known {
            let peer = &mut self.peers[index];
            if peer.dead {
                continue;
            }
            match peer.stream.try_read(&mut buf) {
                Ok(0) => {
                    log::debug!("Peer {} left the medium", peer.addr);
                    peer.dead = true;
                }
                Ok(received) => {
                    transmitters.push(index);
                    frame = buf[..received].to_vec();
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => {
                    log::debug!("Peer {} dropped ({})", peer.addr, err);
                    peer.dead = true;
                }
            }
        }
        SlotActivity {
            transmitters,
            frame,
        }
    }

    /// Applies the broadcast rule for a gathered slot: a lone transmitter is
    /// echoed to everyone, two or more are jammed with noise.
    fn resolve(&mut self, activity: SlotActivity) {
        match activity.transmitters.as_slice() {
            [] => {}
            [index] => {
                let length = broadcast_len(&activity.frame);
                self.broadcast(&activity.frame[..length]);
                self.peers[*index].frames += 1;
            }
            colliders => {
                log::debug!("Collision between {} peers", colliders.len());
                for &index in colliders {
                    self.peers[index].collisions += 1;
                }
                let noise: Vec<u8> = NoiseFrame::new().into();
                self.broadcast(&noise);
            }
        }
    }

    fn broadcast(&self, bytes: &[u8]) {
        for peer in self.peers.iter().filter(|peer| !peer.dead) {
            if let Err(err) = peer.stream.try_write(bytes) {
                log::debug!("Dropping broadcast to {}: {}", peer.addr, err);
            }
        }
    }

    fn reports(&self) -> Vec<PeerReport> {
        self.peers
            .iter()
            .map(|peer| PeerReport {
                addr: peer.addr,
                frames: peer.frames,
                collisions: peer.collisions,
            })
            .collect()
    }
}

/// Resolves when any live peer becomes readable; pends forever when there is
/// no live peer, leaving the slot timer to bound the wait.
async fn readable_any(peers: &[PeerRecord]) {
    let mut readable: FuturesUnordered<_> = peers
        .iter()
        .filter(|peer| !peer.dead)
        .map(|peer| peer.stream.readable())
        .collect();
    match readable.next().await {
        Some(_) => {}
        None => futures::future::pending::<()>().await,
    }
}

/// A solo broadcast carries exactly the declared frame length, bounded by
/// what was actually read in the slot.
fn broadcast_len(frame: &[u8]) -> usize {
    match FrameHeader::read_from_prefix(frame) {
        Some(header) => frame.len().min(HEADER_SIZE + header.payload_length as usize),
        None => frame.len(),
    }
}
