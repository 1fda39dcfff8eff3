//! Error types for longtail

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid bits per value: {0} (expected 1..=64)")]
    InvalidBitsPerValue(u32),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Ordinal source error: {0}")]
    Source(String),
}

pub type Result<T> = std::result::Result<T, Error>;
