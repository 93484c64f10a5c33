#![cfg_attr(not(test), no_std)]
//! Turns the information a bootloader hands over into one [`HandoverRecord`].

#[macro_use]
extern crate log;

pub mod protocol;
pub mod range;
pub mod record;
pub mod text;

pub use self::protocol::{is_multiboot2, is_stivale2, parse, BootProtocol};
pub use self::range::MemoryRange;
pub use self::record::*;

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum HandoverError {
    #[error("unsupported bootloader magic {0:#010x}")]
    UnsupportedMagic(u32),
    #[error(transparent)]
    Multiboot2(#[from] multiboot2::Error),
    #[error(transparent)]
    Stivale2(#[from] stivale2::Error),
}
