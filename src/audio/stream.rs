use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, Device, Stream, StreamConfig, StreamError, SupportedBufferSize};
use tracing::{info, warn};

use super::stages::{CaptureStage, PlaybackStage};
use super::{EventSink, SessionEvent, StreamDirection};
use crate::error::{MixerError, MixerResult};

/// Shape requested from the audio runtime for one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub sample_rate: u32,
    pub block_size: u32,
    pub channels: u16,
}

/// Audio runtime the session opens its two streams on.
///
/// Implementations must invoke each stream's stage from at most one thread at a
/// time, may run the input and output stages concurrently with each other, and
/// report runtime errors through `events` without blocking. The returned
/// handle keeps the stream running until it is dropped.
pub trait AudioBackend {
    type Stream;

    /// Channel count the input stream will be opened with (at most 2)
    fn input_channels(&self) -> MixerResult<u16>;

    /// Channel count of the output device; the mix goes to the first two
    fn output_channels(&self) -> MixerResult<u16>;

    /// Sample rate to use when the configuration does not pin one
    fn preferred_sample_rate(&self) -> MixerResult<u32>;

    fn open_input(
        &mut self,
        spec: StreamSpec,
        stage: CaptureStage,
        events: EventSink,
    ) -> MixerResult<Self::Stream>;

    fn open_output(
        &mut self,
        spec: StreamSpec,
        stage: PlaybackStage,
        events: EventSink,
    ) -> MixerResult<Self::Stream>;
}

/// `cpal` implementation over a chosen input/output device pair
pub struct CpalBackend {
    input_device: Device,
    output_device: Device,
    input_device_name: String,
    output_device_name: String,
}

impl CpalBackend {
    pub fn new(input_device: Device, output_device: Device) -> Self {
        let input_device_name = input_device
            .name()
            .unwrap_or_else(|_| "Unknown".to_string());
        let output_device_name = output_device
            .name()
            .unwrap_or_else(|_| "Unknown".to_string());
        Self {
            input_device,
            output_device,
            input_device_name,
            output_device_name,
        }
    }

    pub fn input_device_name(&self) -> &str {
        &self.input_device_name
    }

    pub fn output_device_name(&self) -> &str {
        &self.output_device_name
    }

    // Fixed block size when the device advertises support for it, otherwise
    // let the host pick and rely on the playback stage's carry-over
    fn buffer_size(supported: &SupportedBufferSize, spec: StreamSpec, device: &str) -> BufferSize {
        match supported {
            SupportedBufferSize::Range { min, max }
                if (*min..=*max).contains(&spec.block_size) =>
            {
                BufferSize::Fixed(spec.block_size)
            }
            _ => {
                warn!(
                    "{} does not support a fixed {}-frame buffer, using the host default",
                    device, spec.block_size
                );
                BufferSize::Default
            }
        }
    }

    fn error_callback(
        direction: StreamDirection,
        events: EventSink,
    ) -> impl FnMut(StreamError) + Send + 'static {
        move |err| {
            let event = if matches!(err, StreamError::DeviceNotAvailable) {
                SessionEvent::StreamFault(direction, err.to_string())
            } else {
                SessionEvent::StreamGlitch(direction, err.to_string())
            };
            events.report(event);
        }
    }
}

impl AudioBackend for CpalBackend {
    type Stream = Stream;

    fn input_channels(&self) -> MixerResult<u16> {
        let config = self
            .input_device
            .default_input_config()
            .map_err(|e| MixerError::StreamBuild {
                direction: "input",
                message: e.to_string(),
            })?;
        match config.channels() {
            0 => Err(MixerError::NoDevice("input")),
            channels => Ok(channels.min(2)),
        }
    }

    fn output_channels(&self) -> MixerResult<u16> {
        let config = self
            .output_device
            .default_output_config()
            .map_err(|e| MixerError::StreamBuild {
                direction: "output",
                message: e.to_string(),
            })?;
        match config.channels() {
            0 => Err(MixerError::NoDevice("output")),
            channels => Ok(channels),
        }
    }

    fn preferred_sample_rate(&self) -> MixerResult<u32> {
        let config = self
            .output_device
            .default_output_config()
            .map_err(|e| MixerError::StreamBuild {
                direction: "output",
                message: e.to_string(),
            })?;
        Ok(config.sample_rate().0)
    }

    fn open_input(
        &mut self,
        spec: StreamSpec,
        mut stage: CaptureStage,
        events: EventSink,
    ) -> MixerResult<Stream> {
        let build_err = |message: String| MixerError::StreamBuild {
            direction: "input",
            message,
        };
        let supported = self
            .input_device
            .default_input_config()
            .map_err(|e| build_err(e.to_string()))?;

        let config = StreamConfig {
            channels: spec.channels,
            sample_rate: cpal::SampleRate(spec.sample_rate),
            buffer_size: Self::buffer_size(supported.buffer_size(), spec, &self.input_device_name),
        };

        let stream = self
            .input_device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    stage.process(data);
                },
                Self::error_callback(StreamDirection::Input, events),
                None,
            )
            .map_err(|e| build_err(e.to_string()))?;

        stream.play().map_err(|e| MixerError::StreamPlay {
            direction: "input",
            message: e.to_string(),
        })?;

        info!(
            "Input stream started on {}: {}Hz, {}ch, {:?}",
            self.input_device_name, spec.sample_rate, spec.channels, config.buffer_size
        );
        Ok(stream)
    }

    fn open_output(
        &mut self,
        spec: StreamSpec,
        mut stage: PlaybackStage,
        events: EventSink,
    ) -> MixerResult<Stream> {
        let build_err = |message: String| MixerError::StreamBuild {
            direction: "output",
            message,
        };
        let supported = self
            .output_device
            .default_output_config()
            .map_err(|e| build_err(e.to_string()))?;

        let config = StreamConfig {
            channels: spec.channels,
            sample_rate: cpal::SampleRate(spec.sample_rate),
            buffer_size: Self::buffer_size(
                supported.buffer_size(),
                spec,
                &self.output_device_name,
            ),
        };

        let stream = self
            .output_device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    stage.render(data);
                },
                Self::error_callback(StreamDirection::Output, events),
                None,
            )
            .map_err(|e| build_err(e.to_string()))?;

        stream.play().map_err(|e| MixerError::StreamPlay {
            direction: "output",
            message: e.to_string(),
        })?;

        info!(
            "Output stream started on {}: {}Hz, {}ch, {:?}",
            self.output_device_name, spec.sample_rate, spec.channels, config.buffer_size
        );
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{SessionFlag, StopReason};
    use crossbeam::channel;

    fn spec() -> StreamSpec {
        StreamSpec {
            sample_rate: 44100,
            block_size: 2048,
            channels: 2,
        }
    }

    #[test]
    fn test_buffer_size_uses_fixed_when_supported() {
        let supported = SupportedBufferSize::Range { min: 64, max: 4096 };
        assert_eq!(
            CpalBackend::buffer_size(&supported, spec(), "test"),
            BufferSize::Fixed(2048)
        );
    }

    #[test]
    fn test_buffer_size_falls_back_to_default() {
        let narrow = SupportedBufferSize::Range { min: 64, max: 1024 };
        assert_eq!(
            CpalBackend::buffer_size(&narrow, spec(), "test"),
            BufferSize::Default
        );
        assert_eq!(
            CpalBackend::buffer_size(&SupportedBufferSize::Unknown, spec(), "test"),
            BufferSize::Default
        );
    }

    #[test]
    fn test_error_classification() {
        let (tx, rx) = channel::bounded(4);
        let running = SessionFlag::new();
        running.start();
        let mut callback = CpalBackend::error_callback(
            StreamDirection::Output,
            EventSink::new(tx, running.clone()),
        );

        callback(StreamError::BackendSpecific {
            err: cpal::BackendSpecificError {
                description: String::from("xrun"),
            },
        });
        assert!(matches!(
            rx.try_recv(),
            Ok(SessionEvent::StreamGlitch(StreamDirection::Output, _))
        ));
        assert!(running.is_running());

        callback(StreamError::DeviceNotAvailable);
        assert!(matches!(
            rx.try_recv(),
            Ok(SessionEvent::StreamFault(StreamDirection::Output, _))
        ));
        assert!(!running.is_running());
        assert!(matches!(
            running.stop_reason(),
            Some(StopReason::StreamFault(_))
        ));
    }
}
