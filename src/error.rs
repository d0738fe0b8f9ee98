//! Error types for the mixer

use thiserror::Error;

use crate::audio::session::SessionPhase;

/// Shape problems with a block handed to the mixing engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MixError {
    #[error("input block has zero channels")]
    NoChannels,

    #[error("input block of {samples} samples is not a whole number of {channels}-channel frames")]
    RaggedBlock { samples: usize, channels: usize },
}

/// Errors surfaced by configuration, device setup and the session lifecycle
#[derive(Error, Debug)]
pub enum MixerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("No {0} device available")]
    NoDevice(&'static str),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to enumerate audio devices: {0}")]
    Devices(String),

    #[error("Failed to build {direction} stream: {message}")]
    StreamBuild {
        direction: &'static str,
        message: String,
    },

    #[error("Failed to start {direction} stream: {message}")]
    StreamPlay {
        direction: &'static str,
        message: String,
    },

    #[error("Failed to spawn control thread: {0}")]
    ControlThread(String),

    #[error("Invalid session transition: {from:?} -> {to:?}")]
    InvalidTransition { from: SessionPhase, to: SessionPhase },
}

/// Result type alias for mixer operations
pub type MixerResult<T> = Result<T, MixerError>;
