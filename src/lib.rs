pub mod aloha;
pub mod medium;
pub mod wire;
