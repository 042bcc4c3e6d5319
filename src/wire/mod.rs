mod frame;

pub mod builtin;

pub use frame::{AlohaFrame, DataFrame, Frame, FrameDecodeError, FrameHeader, NoiseFrame};
