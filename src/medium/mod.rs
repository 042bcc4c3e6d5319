mod arbiter;

pub use arbiter::{MediumArbiter, MediumConfig, PeerReport};
