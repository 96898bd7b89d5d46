//! Stdio cache protocol spoken with the Go toolchain

mod engine;
mod framing;
pub mod wire;

pub use engine::Engine;
pub use framing::FrameReader;
pub use wire::{Command, Request, Response};
