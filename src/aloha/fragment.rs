use crate::wire::DataFrame;
use rand::{rngs::SmallRng, Rng};

/// A 6-byte tag that identifies this sender on the medium for the duration
/// of the run: the low 32 bits of the process id, then two zero bytes.
pub fn source_tag() -> [u8; 6] {
    let pid = std::process::id();
    let mut tag = [0u8; 6];
    tag[..4].copy_from_slice(&pid.to_le_bytes());
    tag
}

/// Splits `data` into frames of at most `payload_size` bytes with ascending
/// sequence numbers. The destination tag is advisory and randomized from the
/// caller's generator. `payload_size` must be at least 1.
pub fn split(
    data: &[u8],
    payload_size: usize,
    source_id: [u8; 6],
    rng: &mut SmallRng,
) -> Vec<DataFrame> {
    data.chunks(payload_size)
        .enumerate()
        .map(|(seq, chunk)| {
            let mut dest_id = [0u8; 6];
            rng.fill(&mut dest_id[..4]);
            DataFrame::new(dest_id, source_id, seq as u32, chunk.to_vec())
        })
        .collect()
}
