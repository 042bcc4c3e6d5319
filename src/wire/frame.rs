use super::builtin::{DATA_FLAG, ETHER_IPV4, HEADER_SIZE, NOISE_FLAG};
use static_assertions::assert_eq_size;
use thiserror::Error;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// The fixed frame header, laid out exactly as it travels on the wire.
/// Integers are host-endian and the struct is packed, so `as_bytes` is the
/// encoding.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FrameHeader {
    pub dest_id: [u8; 6],
    pub source_id: [u8; 6],
    pub ether_type: u16,
    pub payload_type: u8,
    pub seq_number: u32,
    pub payload_length: u32,
}

assert_eq_size!(FrameHeader, [u8; 23]);

pub trait Frame {
    fn header(&self) -> &FrameHeader;
    fn payload(&self) -> Option<&[u8]>;
}

#[derive(Debug, Clone)]
pub struct DataFrame {
    header: FrameHeader,
    payload: Vec<u8>,
}

impl DataFrame {
    pub fn new(dest_id: [u8; 6], source_id: [u8; 6], seq_number: u32, payload: Vec<u8>) -> Self {
        Self {
            header: FrameHeader {
                dest_id,
                source_id,
                ether_type: ETHER_IPV4,
                payload_type: DATA_FLAG,
                seq_number,
                payload_length: payload.len() as u32,
            },
            payload,
        }
    }
}

impl Frame for DataFrame {
    fn header(&self) -> &FrameHeader {
        &self.header
    }

    fn payload(&self) -> Option<&[u8]> {
        Some(&self.payload)
    }
}

impl From<DataFrame> for Vec<u8> {
    fn from(value: DataFrame) -> Self {
        let mut frame = value.header.as_bytes().to_vec();
        frame.extend_from_slice(&value.payload);
        frame
    }
}

/// The jam signal the channel broadcasts when a slot is collisional. Only
/// `payload_type` is meaningful; the other header fields are unconstrained.
#[derive(Debug, Clone)]
pub struct NoiseFrame {
    header: FrameHeader,
}

impl NoiseFrame {
    pub fn new() -> Self {
        Self {
            header: FrameHeader {
                dest_id: [0u8; 6],
                source_id: [0u8; 6],
                ether_type: ETHER_IPV4,
                payload_type: NOISE_FLAG,
                seq_number: 0,
                payload_length: 0,
            },
        }
    }
}

impl Default for NoiseFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl Frame for NoiseFrame {
    fn header(&self) -> &FrameHeader {
        &self.header
    }

    fn payload(&self) -> Option<&[u8]> {
        None
    }
}

impl From<NoiseFrame> for Vec<u8> {
    fn from(value: NoiseFrame) -> Self {
        value.header.as_bytes().to_vec()
    }
}

#[derive(Debug, Clone)]
pub enum AlohaFrame {
    Data(DataFrame),
    Noise(NoiseFrame),
}

impl Frame for AlohaFrame {
    fn header(&self) -> &FrameHeader {
        match self {
            AlohaFrame::Data(data) => data.header(),
            AlohaFrame::Noise(noise) => noise.header(),
        }
    }

    fn payload(&self) -> Option<&[u8]> {
        match self {
            AlohaFrame::Data(data) => data.payload(),
            AlohaFrame::Noise(noise) => noise.payload(),
        }
    }
}

impl From<AlohaFrame> for Vec<u8> {
    fn from(value: AlohaFrame) -> Self {
        match value {
            AlohaFrame::Data(data) => data.into(),
            AlohaFrame::Noise(noise) => noise.into(),
        }
    }
}

impl TryFrom<&[u8]> for AlohaFrame {
    type Error = FrameDecodeError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let header = FrameHeader::read_from_prefix(value)
            .ok_or(FrameDecodeError::FrameIsTooShort(value.len(), HEADER_SIZE))?;
        if header.payload_type == NOISE_FLAG {
            return Ok(AlohaFrame::Noise(NoiseFrame { header }));
        }

        // Anything that is not noise acknowledges like data, whatever its
        // payload type claims to be.
        let declared = header.payload_length as usize;
        let available = value.len() - HEADER_SIZE;
        if available < declared {
            return Err(FrameDecodeError::TruncatedPayload {
                declared,
                available,
            });
        }
        let payload = value[HEADER_SIZE..HEADER_SIZE + declared].to_vec();
        Ok(AlohaFrame::Data(DataFrame { header, payload }))
    }
}

#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("Frame is too short (got {0}, expected at least {1})")]
    FrameIsTooShort(usize, usize),
    #[error("Payload is truncated (declared {declared}, available {available})")]
    TruncatedPayload { declared: usize, available: usize },
}
