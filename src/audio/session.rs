//! Session lifecycle
//!
//! ```text
//! Idle ──prefill + open streams──▶ StreamsOpen ──control thread──▶ Running
//!                                                                    │
//!   quit key / Ctrl+C / fatal stream error / lost key input          ▼
//! Closed ◀──close streams, join control thread── Stopping ◀──────────┘
//! ```
//!
//! The session thread never touches audio. While running it waits on the
//! event channel with a bounded timeout and logs whatever the callbacks and
//! the control thread report.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use super::params::ParameterStore;
use super::stages::{CaptureStage, PipelineStats, PlaybackStage, StatsSnapshot};
use super::stream::{AudioBackend, StreamSpec};
use super::transfer::transfer_buffer;
use super::{AudioConfig, EventSink, SessionEvent};
use crate::error::{MixerError, MixerResult};
use crate::ui::control::{ControlInputHandler, KeySource, StatusSink};

/// Events the callbacks may queue before the session thread catches up
const EVENT_QUEUE_DEPTH: usize = 64;

/// Process-wide running flag shared by the session, the control thread and
/// the stream error callbacks, with the reason the session stopped
#[derive(Debug, Clone, Default)]
pub struct SessionFlag {
    running: Arc<AtomicBool>,
    reason: Arc<Mutex<Option<StopReason>>>,
}

impl SessionFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    /// Clear the flag. Returns true only for the call that actually stopped
    /// a running session.
    pub fn stop(&self) -> bool {
        self.running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Record `reason` if it is the first one for a running session, then
    /// stop it
    pub fn request_stop(&self, reason: StopReason) -> bool {
        {
            let mut slot = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() && self.is_running() {
                *slot = Some(reason);
            }
        }
        self.stop()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    StreamsOpen,
    Running,
    Stopping,
    Closed,
}

impl SessionPhase {
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, next),
            (Idle, StreamsOpen)
                | (StreamsOpen, Running)
                | (Idle | StreamsOpen | Running, Stopping)
                | (Stopping, Closed)
        )
    }
}

/// Why a running session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    QuitKey,
    Interrupted,
    StreamFault(String),
    ControlLost(String),
}

/// Owns the streams, the control thread and the lifecycle of one run
pub struct Session<B: AudioBackend> {
    backend: B,
    config: AudioConfig,
    phase: SessionPhase,
    params: ParameterStore,
    running: SessionFlag,
    stats: Arc<PipelineStats>,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    streams: Option<(B::Stream, B::Stream)>,
    control: Option<JoinHandle<()>>,
}

impl<B: AudioBackend> Session<B> {
    pub fn new(backend: B, config: AudioConfig, params: ParameterStore) -> Self {
        let (events_tx, events_rx) = channel::bounded(EVENT_QUEUE_DEPTH);
        Self {
            backend,
            config,
            phase: SessionPhase::Idle,
            params,
            running: SessionFlag::new(),
            stats: Arc::new(PipelineStats::new()),
            events_tx,
            events_rx,
            streams: None,
            control: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn params(&self) -> &ParameterStore {
        &self.params
    }

    pub fn running_flag(&self) -> SessionFlag {
        self.running.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn event_sink(&self) -> EventSink {
        EventSink::new(self.events_tx.clone(), self.running.clone())
    }

    fn transition(&mut self, next: SessionPhase) -> MixerResult<()> {
        if !self.phase.can_transition_to(next) {
            return Err(MixerError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        debug!("Session {:?} -> {:?}", self.phase, next);
        self.phase = next;
        Ok(())
    }

    /// Idle → StreamsOpen: prefill the transfer buffer with silence, then open
    /// the input and output streams
    pub fn open_streams(&mut self) -> MixerResult<()> {
        if !self.phase.can_transition_to(SessionPhase::StreamsOpen) {
            return Err(MixerError::InvalidTransition {
                from: self.phase,
                to: SessionPhase::StreamsOpen,
            });
        }

        let sample_rate = match self.config.sample_rate {
            Some(rate) => rate,
            None => self.backend.preferred_sample_rate()?,
        };
        let input_channels = self.backend.input_channels()?;
        let output_channels = self.backend.output_channels()?;
        let block_frames = self.config.block_size as usize;

        let (mut producer, consumer) = transfer_buffer(self.config.buffer_blocks);
        let primed = producer.prefill_silence(self.config.prefill_blocks, block_frames);
        info!(
            "Transfer buffer: {} blocks of {} frames, {} primed with silence (~{:.0}ms)",
            self.config.buffer_blocks,
            block_frames,
            primed,
            self.config.prefill_latency_ms(sample_rate)
        );

        let capture = CaptureStage::new(
            producer,
            self.params.clone(),
            input_channels as usize,
            Arc::clone(&self.stats),
            self.event_sink(),
        );
        let playback = PlaybackStage::new(
            consumer,
            output_channels as usize,
            Arc::clone(&self.stats),
        );

        let input_spec = StreamSpec {
            sample_rate,
            block_size: self.config.block_size,
            channels: input_channels,
        };
        let output_spec = StreamSpec {
            channels: output_channels,
            ..input_spec
        };

        let input = self
            .backend
            .open_input(input_spec, capture, self.event_sink())?;
        let output = self
            .backend
            .open_output(output_spec, playback, self.event_sink())?;

        self.streams = Some((input, output));
        self.transition(SessionPhase::StreamsOpen)
    }

    /// StreamsOpen → Running: raise the running flag and start the control thread
    pub fn start<K: KeySource + 'static>(&mut self, keys: K, status: StatusSink) -> MixerResult<()> {
        if !self.phase.can_transition_to(SessionPhase::Running) {
            return Err(MixerError::InvalidTransition {
                from: self.phase,
                to: SessionPhase::Running,
            });
        }

        self.running.start();
        let handler = ControlInputHandler::new(
            keys,
            self.params.clone(),
            self.event_sink(),
            status,
            self.config.key_poll_interval(),
        );
        match handler.spawn() {
            Ok(handle) => self.control = Some(handle),
            Err(e) => {
                self.running.stop();
                return Err(MixerError::ControlThread(e.to_string()));
            }
        }

        self.transition(SessionPhase::Running)
    }

    /// Block until the session is asked to stop, logging callback reports
    /// along the way. Leaves the session in Stopping.
    pub fn wait(&mut self) -> MixerResult<StopReason> {
        if self.phase != SessionPhase::Running {
            return Err(MixerError::InvalidTransition {
                from: self.phase,
                to: SessionPhase::Stopping,
            });
        }

        let interval = self.config.idle_poll_interval();
        while self.running.is_running() {
            match self.events_rx.recv_timeout(interval) {
                Ok(event) => self.handle_event(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        // Log whatever was reported on the way down
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }

        let reason = self.running.stop_reason().unwrap_or(StopReason::QuitKey);
        info!("Session stopping: {:?}", reason);
        self.transition(SessionPhase::Stopping)?;
        Ok(reason)
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::StreamGlitch(direction, message) => {
                self.stats.record_glitch();
                warn!("{} status: {}", direction.as_str(), message);
            }
            SessionEvent::StreamFault(direction, message) => {
                error!("Fatal {} stream error: {}", direction.as_str(), message);
            }
            SessionEvent::BlockRejected(err) => {
                warn!("Processing error, block skipped: {}", err);
            }
            SessionEvent::QuitRequested | SessionEvent::Interrupted => {
                debug!("Control thread requested stop: {:?}", event);
            }
            SessionEvent::ControlLost(message) => {
                error!("Lost keyboard input: {}", message);
            }
        }
    }

    /// → Stopping → Closed: close both streams, join the control thread and
    /// release the transfer buffer. Safe to call from any phase; a second call
    /// is a no-op.
    pub fn shutdown(&mut self) -> MixerResult<StatsSnapshot> {
        if self.phase == SessionPhase::Closed {
            return Ok(self.stats.snapshot());
        }
        if self.phase != SessionPhase::Stopping {
            self.transition(SessionPhase::Stopping)?;
        }
        self.running.stop();

        // Dropping the handles stops callback invocation; the stages own the
        // transfer buffer halves, so this releases it too
        if let Some((input, output)) = self.streams.take() {
            drop(input);
            drop(output);
            debug!("Streams closed");
        }

        if let Some(handle) = self.control.take()
            && handle.join().is_err()
        {
            error!("Control thread panicked");
        }

        self.transition(SessionPhase::Closed)?;

        let stats = self.stats.snapshot();
        info!(
            "Session closed: {} captured, {} played, {} dropped, {} rejected, {} underruns, {} glitches",
            stats.blocks_captured,
            stats.blocks_played,
            stats.blocks_dropped,
            stats.blocks_rejected,
            stats.underruns,
            stats.glitches
        );
        Ok(stats)
    }

    /// Run a full session: open, start, wait for a stop, shut down
    pub fn run<K: KeySource + 'static>(
        &mut self,
        keys: K,
        status: StatusSink,
    ) -> MixerResult<(StopReason, StatsSnapshot)> {
        let outcome = self
            .open_streams()
            .and_then(|()| self.start(keys, status))
            .and_then(|()| self.wait());

        match outcome {
            Ok(reason) => {
                let stats = self.shutdown()?;
                Ok((reason, stats))
            }
            Err(err) => {
                error!("Session failed: {}", err);
                if let Err(shutdown_err) = self.shutdown() {
                    warn!("Cleanup after failure also failed: {}", shutdown_err);
                }
                Err(err)
            }
        }
    }
}

impl<B: AudioBackend> Drop for Session<B> {
    fn drop(&mut self) {
        if self.phase != SessionPhase::Closed {
            let _ = self.shutdown();
        }
    }
}
