//! # Alohanet sender socket
//! Stop-and-wait delivery over the shared medium. Each frame is transmitted
//! and held until the medium echoes it back; the echo counts as the
//! acknowledgement. A timeout, a noise frame, or an echo that carries a
//! foreign sequence number or source tag re-enters binary exponential
//! backoff, measured in slot times. A frame is abandoned, and the transfer
//! with it, after `SOCKET_MAX_ATTEMPTS` transmissions.

use super::builtin::{SOCKET_MAX_ATTEMPTS, SOCKET_MAX_BACKOFF};
use crate::wire::{builtin::MAX_FRAME_SIZE, AlohaFrame, DataFrame, Frame};
use anyhow::Result;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::{net::SocketAddr, time::Duration};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::{self, Instant},
};

#[derive(Debug, Clone)]
pub struct AlohaSocketConfig {
    pub address: SocketAddr,
    pub source_id: [u8; 6],
    pub slot_time: Duration,
    pub ack_timeout: Duration,
    pub seed: u64,
}

impl AlohaSocketConfig {
    pub fn new(
        address: SocketAddr,
        source_id: [u8; 6],
        slot_time: Duration,
        ack_timeout: Duration,
        seed: u64,
    ) -> Self {
        Self {
            address,
            source_id,
            slot_time,
            ack_timeout,
            seed,
        }
    }
}

#[derive(Debug, Error)]
pub enum AlohaIoError {
    #[error("Channel closed the connection")]
    ChannelClosed,
}

/// What a transfer did, whether or not it ran to completion.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub delivered: bool,
    pub frames_total: usize,
    pub frames_delivered: usize,
    pub bytes_delivered: u64,
    pub total_transmissions: usize,
    pub max_transmissions: usize,
    pub first_payload_length: usize,
    pub elapsed: Duration,
}

impl TransferReport {
    pub fn mean_transmissions(&self) -> f64 {
        if self.frames_total == 0 {
            return 0.0;
        }
        self.total_transmissions as f64 / self.frames_total as f64
    }

    /// Megabits per second over the whole run, sized by the first frame's
    /// payload as every frame but the last shares its length.
    pub fn bandwidth_mbps(&self) -> f64 {
        let millis = self.elapsed.as_millis() as f64;
        if self.frames_total == 0 || millis == 0.0 {
            return 0.0;
        }
        (self.frames_total as f64 * self.first_payload_length as f64 * 8.0) / (millis * 1000.0)
    }
}

pub struct AlohaSocket {
    config: AlohaSocketConfig,
    stream: TcpStream,
    rng: SmallRng,
}

impl AlohaSocket {
    /// Connects to the channel, retrying without delay until it is
    /// listening.
    pub async fn connect(config: AlohaSocketConfig) -> Self {
        let stream = loop {
            match TcpStream::connect(config.address).await {
                Ok(stream) => break stream,
                Err(err) => log::debug!("Channel not ready ({}), retrying", err),
            }
        };
        let rng = SmallRng::seed_from_u64(config.seed);
        Self {
            config,
            stream,
            rng,
        }
    }

    /// Drives the whole frame sequence through the medium. Exhausting the
    /// attempt cap on a frame ends the transfer early with
    /// `delivered = false`; only a dead transport is an error.
    pub async fn transfer(&mut self, frames: &[DataFrame]) -> Result<TransferReport> {
        let start = Instant::now();
        let mut report = TransferReport {
            delivered: true,
            frames_total: frames.len(),
            frames_delivered: 0,
            bytes_delivered: 0,
            total_transmissions: 0,
            max_transmissions: 0,
            first_payload_length: frames
                .first()
                .map_or(0, |frame| frame.payload().map_or(0, <[u8]>::len)),
            elapsed: Duration::ZERO,
        };

        for frame in frames {
            let seq = frame.header().seq_number;
            let bytes: Vec<u8> = frame.clone().into();
            let mut acked = false;
            let mut attempts = 0;

            for attempt in 1..=SOCKET_MAX_ATTEMPTS {
                attempts = attempt;
                self.stream.write_all(&bytes).await?;
                log::debug!("Transmitted frame {} (attempt {})", seq, attempt);

                if self.await_ack(seq).await? {
                    log::debug!("Frame {} acknowledged", seq);
                    self.drain_for(self.config.slot_time).await?;
                    acked = true;
                    break;
                }

                let slots = backoff_slots(&mut self.rng, attempt);
                log::debug!("No ack for frame {}, backing off {} slots", seq, slots);
                self.drain_for(self.config.slot_time * slots).await?;
            }

            report.total_transmissions += attempts;
            report.max_transmissions = report.max_transmissions.max(attempts);
            if !acked {
                report.delivered = false;
                break;
            }
            report.frames_delivered += 1;
            report.bytes_delivered += frame.payload().map_or(0, <[u8]>::len) as u64;
        }

        report.elapsed = start.elapsed();
        Ok(report)
    }

    /// Waits up to the ack timeout for a single inbound frame. The frame
    /// acknowledges `seq` iff it is not noise and carries this sender's tag
    /// with the outstanding sequence number.
    async fn await_ack(&mut self, seq: u32) -> Result<bool> {
        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        let received = match time::timeout(self.config.ack_timeout, self.stream.read(&mut buf)).await
        {
            Err(_) => return Ok(false),
            Ok(Ok(0)) => return Err(AlohaIoError::ChannelClosed.into()),
            Ok(Ok(received)) => received,
            Ok(Err(err)) => return Err(err.into()),
        };

        match AlohaFrame::try_from(&buf[..received]) {
            Ok(AlohaFrame::Data(echo)) => {
                let echo_seq = echo.header().seq_number;
                let echo_source = echo.header().source_id;
                Ok(echo_seq == seq && echo_source == self.config.source_id)
            }
            Ok(AlohaFrame::Noise(_)) => Ok(false),
            Err(err) => {
                log::debug!("Discarding an undecodable frame: {}", err);
                Ok(false)
            }
        }
    }

    /// Consumes and discards everything the medium broadcasts for `window`,
    /// then sweeps whatever is still queued, so the next read only sees
    /// responses to this sender's next transmission.
    async fn drain_for(&mut self, window: Duration) -> Result<()> {
        let mut sink = vec![0u8; MAX_FRAME_SIZE];
        let deadline = Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match time::timeout(remaining, self.stream.read(&mut sink)).await {
                Err(_) => break,
                // The channel went away; the next transmission will notice.
                Ok(Ok(0)) => return Ok(()),
                Ok(Ok(_)) => continue,
                Ok(Err(err)) => return Err(err.into()),
            }
        }
        loop {
            match self.stream.try_read(&mut sink) {
                Ok(received) if received > 0 => continue,
                _ => break,
            }
        }
        Ok(())
    }
}

/// Draws the backoff for the given attempt: uniform on
/// `[0, 2^min(attempt, SOCKET_MAX_BACKOFF) - 1]` slots.
fn backoff_slots(rng: &mut SmallRng, attempt: usize) -> u32 {
    let exponent = attempt.min(SOCKET_MAX_BACKOFF);
    rng.gen_range(0..(1u32 << exponent))
}
