// src/audio/stages.rs
// Capture (producer) and playback (consumer) callback bodies.
// REAL-TIME SAFE: no locks are waited on, no logging, no I/O. Anything worth
// reporting is counted in PipelineStats or sent with try_send.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{EventSink, SessionEvent};
use super::mixer::{AudioBlock, mix_block, validate_shape};
use super::params::{MixParameters, ParameterStore};
use super::transfer::{BlockConsumer, BlockProducer};

/// Counters updated from the audio callbacks, read by the session thread
#[derive(Debug, Default)]
pub struct PipelineStats {
    blocks_captured: AtomicU64,
    blocks_dropped: AtomicU64,
    blocks_rejected: AtomicU64,
    blocks_played: AtomicU64,
    underruns: AtomicU64,
    glitches: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_glitch(&self) {
        self.glitches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            blocks_captured: self.blocks_captured.load(Ordering::Relaxed),
            blocks_dropped: self.blocks_dropped.load(Ordering::Relaxed),
            blocks_rejected: self.blocks_rejected.load(Ordering::Relaxed),
            blocks_played: self.blocks_played.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            glitches: self.glitches.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Blocks mixed and queued for playback
    pub blocks_captured: u64,
    /// Blocks discarded because the transfer buffer was full
    pub blocks_dropped: u64,
    /// Blocks skipped because of a malformed shape
    pub blocks_rejected: u64,
    /// Blocks fully written to the output device
    pub blocks_played: u64,
    /// Output callbacks that had to pad with silence
    pub underruns: u64,
    /// Non-fatal stream errors reported by the runtime
    pub glitches: u64,
}

/// Input callback body: mix each incoming block and hand it to playback
pub struct CaptureStage {
    producer: BlockProducer,
    params: ParameterStore,
    last_params: MixParameters,
    channels: usize,
    stats: Arc<PipelineStats>,
    events: EventSink,
}

impl CaptureStage {
    pub fn new(
        producer: BlockProducer,
        params: ParameterStore,
        channels: usize,
        stats: Arc<PipelineStats>,
        events: EventSink,
    ) -> Self {
        let last_params = params.snapshot();
        Self {
            producer,
            params,
            last_params,
            channels,
            stats,
            events,
        }
    }

    /// Handle one runtime-owned input buffer of interleaved samples
    pub fn process(&mut self, data: &[f32]) {
        if data.is_empty() {
            return;
        }

        if let Err(err) = validate_shape(data, self.channels) {
            self.stats.blocks_rejected.fetch_add(1, Ordering::Relaxed);
            self.events.report(SessionEvent::BlockRejected(err));
            return;
        }

        // Consumer is behind; skip the work, the block would be discarded anyway
        if self.producer.is_full() {
            self.stats.blocks_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        // The control thread only holds the lock for a copy; if we race it,
        // last cycle's values are good enough
        if let Some(params) = self.params.try_snapshot() {
            self.last_params = params;
        }

        match mix_block(data, self.channels, &self.last_params) {
            Ok(block) => {
                if self.producer.try_push(block) {
                    self.stats.blocks_captured.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.stats.blocks_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(err) => {
                self.stats.blocks_rejected.fetch_add(1, Ordering::Relaxed);
                self.events.report(SessionEvent::BlockRejected(err));
            }
        }
    }
}

/// Output callback body: drain mixed blocks, pad with silence on underrun
pub struct PlaybackStage {
    consumer: BlockConsumer,
    channels: usize,
    stats: Arc<PipelineStats>,
    // Block partially written by the previous callback, and the next frame to write
    pending: Option<(AudioBlock, usize)>,
}

impl PlaybackStage {
    pub fn new(consumer: BlockConsumer, channels: usize, stats: Arc<PipelineStats>) -> Self {
        Self {
            consumer,
            channels: channels.max(1),
            stats,
            pending: None,
        }
    }

    /// Fill one runtime-owned output buffer of interleaved samples
    pub fn render(&mut self, data: &mut [f32]) {
        let channels = self.channels;
        let total_frames = data.len() / channels;
        let mut written = 0;

        while written < total_frames {
            let (block, offset) = match self.pending.take() {
                Some(pending) => pending,
                None => match self.consumer.try_pop() {
                    Some(block) => (block, 0),
                    None => break,
                },
            };

            let count = (block.frames() - offset).min(total_frames - written);
            let out = &mut data[written * channels..(written + count) * channels];
            for (i, frame) in out.chunks_exact_mut(channels).enumerate() {
                let (left, right) = block.frame(offset + i);
                write_frame(frame, left, right);
            }
            written += count;

            if offset + count < block.frames() {
                self.pending = Some((block, offset + count));
            } else {
                self.stats.blocks_played.fetch_add(1, Ordering::Relaxed);
            }
        }

        if written < total_frames {
            data[written * channels..].fill(0.0);
            self.stats.underruns.fetch_add(1, Ordering::Relaxed);
        } else {
            // Trailing samples of a ragged device buffer
            data[total_frames * channels..].fill(0.0);
        }
    }
}

#[inline]
fn write_frame(frame: &mut [f32], left: f32, right: f32) {
    match frame {
        [mono] => *mono = left,
        [l, r, rest @ ..] => {
            *l = left;
            *r = right;
            rest.fill(0.0);
        }
        [] => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SessionFlag;
    use crate::audio::params::MixParameter;
    use crate::audio::transfer::transfer_buffer;
    use crate::error::MixError;
    use crossbeam::channel;

    struct Rig {
        capture: CaptureStage,
        playback: PlaybackStage,
        params: ParameterStore,
        stats: Arc<PipelineStats>,
        events: channel::Receiver<SessionEvent>,
    }

    fn rig(capacity: usize, input_channels: usize, output_channels: usize) -> Rig {
        let (producer, consumer) = transfer_buffer(capacity);
        let params = ParameterStore::new(MixParameters::new(0.0, 1.0, 1.0));
        let stats = Arc::new(PipelineStats::new());
        let (tx, rx) = channel::bounded(16);
        Rig {
            capture: CaptureStage::new(
                producer,
                params.clone(),
                input_channels,
                Arc::clone(&stats),
                EventSink::new(tx, SessionFlag::new()),
            ),
            playback: PlaybackStage::new(consumer, output_channels, Arc::clone(&stats)),
            params,
            stats,
            events: rx,
        }
    }

    fn stereo(frames: usize, left: f32, right: f32) -> Vec<f32> {
        (0..frames).flat_map(|_| [left, right]).collect()
    }

    #[test]
    fn test_capture_to_playback() {
        let mut rig = rig(10, 2, 2);
        rig.capture.process(&stereo(32, 0.8, 0.3));

        let mut out = vec![9.0; 64];
        rig.playback.render(&mut out);
        assert!(out.iter().all(|&s| (s - 0.5).abs() < 1e-6));

        let stats = rig.stats.snapshot();
        assert_eq!(stats.blocks_captured, 1);
        assert_eq!(stats.blocks_played, 1);
        assert_eq!(stats.underruns, 0);
    }

    #[test]
    fn test_underrun_outputs_silence() {
        let mut rig = rig(10, 2, 2);
        let mut out = vec![0.7; 128];
        rig.playback.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(rig.stats.snapshot().underruns, 1);
    }

    #[test]
    fn test_partial_block_pads_with_silence() {
        let mut rig = rig(10, 2, 2);
        rig.capture.process(&stereo(4, 0.8, 0.3));

        let mut out = vec![0.7; 16];
        rig.playback.render(&mut out);
        assert!(out[..8].iter().all(|&s| (s - 0.5).abs() < 1e-6));
        assert!(out[8..].iter().all(|&s| s == 0.0));
        assert_eq!(rig.stats.snapshot().underruns, 1);
    }

    #[test]
    fn test_block_carried_across_callbacks() {
        let mut rig = rig(10, 2, 2);
        rig.capture.process(&stereo(8, 0.8, 0.3));

        let mut out = vec![0.0; 6];
        rig.playback.render(&mut out);
        assert_eq!(rig.stats.snapshot().blocks_played, 0);
        rig.playback.render(&mut out);
        rig.playback.render(&mut out);
        // 9 frames requested, 8 available
        assert_eq!(rig.stats.snapshot().blocks_played, 1);
        assert_eq!(&out[4..], &[0.0, 0.0]);
        assert_eq!(rig.stats.snapshot().underruns, 1);
    }

    #[test]
    fn test_full_buffer_drops_newest() {
        let mut rig = rig(10, 2, 2);
        for i in 0..11 {
            let level = i as f32 / 20.0;
            rig.capture.process(&stereo(2, level, 0.0));
        }
        let stats = rig.stats.snapshot();
        assert_eq!(stats.blocks_captured, 10);
        assert_eq!(stats.blocks_dropped, 1);

        // First queued block is still the first captured one
        let mut out = vec![0.0; 4];
        rig.playback.render(&mut out);
        assert_eq!(out, vec![0.0; 4]);
        rig.playback.render(&mut out);
        assert!((out[0] - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_malformed_block_is_skipped() {
        let mut rig = rig(10, 2, 2);
        rig.capture.process(&[0.1, 0.2, 0.3]);

        assert_eq!(rig.stats.snapshot().blocks_rejected, 1);
        assert_eq!(rig.stats.snapshot().blocks_captured, 0);
        assert_eq!(
            rig.events.try_recv(),
            Ok(SessionEvent::BlockRejected(MixError::RaggedBlock {
                samples: 3,
                channels: 2
            }))
        );

        let mut out = vec![0.4; 4];
        rig.playback.render(&mut out);
        assert_eq!(out, vec![0.0; 4]);
    }

    #[test]
    fn test_capture_reads_latest_parameters() {
        let mut rig = rig(10, 2, 2);
        rig.params.update(|p| p.set(MixParameter::MasterVolume, 0.5));
        rig.capture.process(&stereo(2, 0.8, 0.3));

        let mut out = vec![0.0; 4];
        rig.playback.render(&mut out);
        assert!((out[0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_contended_lock_reuses_last_parameters() {
        let mut rig = rig(10, 2, 2);
        let Rig { capture, params, .. } = &mut rig;

        // The control thread is mid-update while the callback runs
        params.update(|p| {
            p.set(MixParameter::MasterVolume, 0.5);
            capture.process(&stereo(2, 0.8, 0.3));
        });
        capture.process(&stereo(2, 0.8, 0.3));

        let mut out = vec![0.0; 4];
        rig.playback.render(&mut out);
        assert!(out.iter().all(|&s| (s - 0.5).abs() < 1e-6));
        rig.playback.render(&mut out);
        assert!(out.iter().all(|&s| (s - 0.25).abs() < 1e-6));
        assert_eq!(rig.stats.snapshot().blocks_captured, 2);
    }

    #[test]
    fn test_mono_input_and_surround_output() {
        let mut rig = rig(10, 1, 4);
        rig.capture.process(&[0.3, -0.2]);

        let mut out = vec![1.0; 8];
        rig.playback.render(&mut out);
        assert_eq!(out, vec![0.3, 0.3, 0.0, 0.0, -0.2, -0.2, 0.0, 0.0]);
    }
}
