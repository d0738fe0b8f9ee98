pub mod device;
pub mod mixer;
pub mod params;
pub mod session;
pub mod stages;
pub mod stream;
pub mod transfer;

use std::path::Path;
use std::time::Duration;

use crossbeam::channel::Sender;
use serde::{Deserialize, Serialize};

use crate::error::{MixError, MixerError, MixerResult};

pub use device::DeviceInfo;
pub use mixer::{AudioBlock, mix_block};
pub use params::{MixParameter, MixParameters, ParameterStore};
pub use session::{Session, SessionFlag, SessionPhase, StopReason};
pub use stages::{CaptureStage, PipelineStats, PlaybackStage, StatsSnapshot};
pub use stream::{AudioBackend, CpalBackend, StreamSpec};
pub use transfer::{BlockConsumer, BlockProducer, transfer_buffer};

/// Smallest transfer buffer that still absorbs callback jitter
pub const MIN_BUFFER_BLOCKS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Stream sample rate; `None` uses the output device's default rate
    pub sample_rate: Option<u32>,
    /// Frames per callback block
    pub block_size: u32,
    /// Transfer buffer capacity in blocks
    pub buffer_blocks: usize,
    /// Silence blocks queued before the streams start
    pub prefill_blocks: usize,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    /// Upper bound on each key poll of the control thread
    pub key_poll_ms: u64,
    /// Upper bound on each wait of the session thread
    pub idle_poll_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: None,
            block_size: 2048,
            buffer_blocks: 20,
            prefill_blocks: 10,
            input_device: None,
            output_device: None,
            key_poll_ms: 20,
            idle_poll_ms: 100,
        }
    }
}

impl AudioConfig {
    /// Load and validate a TOML config file. Missing keys keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> MixerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: AudioConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MixerResult<()> {
        if let Some(rate) = self.sample_rate
            && !(8000..=192_000).contains(&rate)
        {
            return Err(MixerError::Config(format!("Invalid sample rate: {}", rate)));
        }
        if !(32..=16_384).contains(&self.block_size) {
            return Err(MixerError::Config(format!(
                "Invalid block size: {}",
                self.block_size
            )));
        }
        if self.buffer_blocks < MIN_BUFFER_BLOCKS {
            return Err(MixerError::Config(format!(
                "Transfer buffer must hold at least {} blocks, got {}",
                MIN_BUFFER_BLOCKS, self.buffer_blocks
            )));
        }
        if self.prefill_blocks > self.buffer_blocks {
            return Err(MixerError::Config(format!(
                "Cannot prefill {} blocks into a {}-block buffer",
                self.prefill_blocks, self.buffer_blocks
            )));
        }
        if self.key_poll_ms == 0 || self.idle_poll_ms == 0 {
            return Err(MixerError::Config(String::from(
                "Poll intervals must be non-zero",
            )));
        }
        Ok(())
    }

    pub fn key_poll_interval(&self) -> Duration {
        Duration::from_millis(self.key_poll_ms)
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    /// Added latency of the prefilled buffer at the given sample rate
    pub fn prefill_latency_ms(&self, sample_rate: u32) -> f32 {
        (self.prefill_blocks as f32 * self.block_size as f32 / sample_rate as f32) * 1000.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    Input,
    Output,
}

impl StreamDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamDirection::Input => "input",
            StreamDirection::Output => "output",
        }
    }
}

/// Messages delivered to the session thread from callbacks and the control thread
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Non-fatal runtime status (xrun, backend hiccup)
    StreamGlitch(StreamDirection, String),
    /// The runtime reported an unrecoverable stream error
    StreamFault(StreamDirection, String),
    /// The capture stage skipped a block it could not mix
    BlockRejected(MixError),
    QuitRequested,
    Interrupted,
    ControlLost(String),
}

impl SessionEvent {
    /// Stop reason carried by events that end the session
    pub fn stop_reason(&self) -> Option<StopReason> {
        match self {
            SessionEvent::StreamFault(_, message) => Some(StopReason::StreamFault(message.clone())),
            SessionEvent::QuitRequested => Some(StopReason::QuitKey),
            SessionEvent::Interrupted => Some(StopReason::Interrupted),
            SessionEvent::ControlLost(message) => Some(StopReason::ControlLost(message.clone())),
            SessionEvent::StreamGlitch(..) | SessionEvent::BlockRejected(_) => None,
        }
    }
}

/// Reporting handle held by the stream callbacks and the control thread.
///
/// Events are queued without blocking and may be lost when the queue is full.
/// Stopping events also latch their reason on the running flag first, so the
/// session always stops for the right reason.
#[derive(Debug, Clone)]
pub struct EventSink {
    events: Sender<SessionEvent>,
    running: SessionFlag,
}

impl EventSink {
    pub fn new(events: Sender<SessionEvent>, running: SessionFlag) -> Self {
        Self { events, running }
    }

    pub fn running(&self) -> &SessionFlag {
        &self.running
    }

    /// Returns true when this event is the one that stopped the session.
    /// Stopping events that arrive after the session already stopped are
    /// dropped.
    pub fn report(&self, event: SessionEvent) -> bool {
        let stopped = match event.stop_reason() {
            Some(reason) => {
                if !self.running.request_stop(reason) {
                    return false;
                }
                true
            }
            None => false,
        };
        let _ = self.events.try_send(event);
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AudioConfig::default();
        assert_eq!(config.block_size, 2048);
        assert_eq!(config.buffer_blocks, 20);
        assert_eq!(config.prefill_blocks, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let small_buffer = AudioConfig {
            buffer_blocks: 4,
            prefill_blocks: 2,
            ..Default::default()
        };
        assert!(small_buffer.validate().is_err());

        let overfilled = AudioConfig {
            prefill_blocks: 21,
            ..Default::default()
        };
        assert!(overfilled.validate().is_err());

        let bad_rate = AudioConfig {
            sample_rate: Some(100),
            ..Default::default()
        };
        assert!(bad_rate.validate().is_err());

        let bad_block = AudioConfig {
            block_size: 8,
            ..Default::default()
        };
        assert!(bad_block.validate().is_err());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "block_size = 1024").unwrap();
        writeln!(file, "output_device = \"Speakers\"").unwrap();

        let config = AudioConfig::load(file.path()).unwrap();
        assert_eq!(config.block_size, 1024);
        assert_eq!(config.output_device.as_deref(), Some("Speakers"));
        assert_eq!(config.buffer_blocks, 20);
        assert_eq!(config.sample_rate, None);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "buffer_blocks = 3").unwrap();
        assert!(matches!(
            AudioConfig::load(file.path()),
            Err(MixerError::Config(_))
        ));
    }

    #[test]
    fn test_stop_survives_full_event_queue() {
        let (tx, rx) = crossbeam::channel::bounded(2);
        let running = SessionFlag::new();
        running.start();
        let sink = EventSink::new(tx, running.clone());

        let glitch = SessionEvent::StreamGlitch(StreamDirection::Input, "xrun".to_string());
        assert!(!sink.report(glitch.clone()));
        assert!(!sink.report(glitch));
        assert!(running.is_running());

        let fault = SessionEvent::StreamFault(StreamDirection::Output, "gone".to_string());
        assert!(sink.report(fault));
        assert!(!running.is_running());
        assert_eq!(
            running.stop_reason(),
            Some(StopReason::StreamFault("gone".to_string()))
        );
        // Only the two glitches made it onto the queue
        assert_eq!(rx.try_iter().count(), 2);

        // Later reasons do not overwrite the first
        assert!(!sink.report(SessionEvent::Interrupted));
        assert_eq!(
            running.stop_reason(),
            Some(StopReason::StreamFault("gone".to_string()))
        );
    }

    #[test]
    fn test_prefill_latency() {
        let config = AudioConfig {
            block_size: 480,
            prefill_blocks: 10,
            ..Default::default()
        };
        assert!((config.prefill_latency_ms(48000) - 100.0).abs() < 0.01);
    }
}
