mod socket;

pub mod builtin;
pub mod fragment;

pub use socket::{AlohaIoError, AlohaSocket, AlohaSocketConfig, TransferReport};
