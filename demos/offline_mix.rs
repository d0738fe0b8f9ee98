//! Drives a full session without audio hardware.
//!
//! A simulated backend feeds a synthetic song (a centered "vocal" tone plus a
//! hard-panned "instrument" tone) through the capture stage on one thread and
//! pulls the mix from the playback stage on another. Keys are scripted over a
//! channel, so the run ends by itself.
//!
//!     cargo run --example offline_mix

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use crossbeam::channel::{self, Sender};
use vocalmix::audio::{
    AudioBackend, AudioConfig, CaptureStage, EventSink, ParameterStore, PlaybackStage, Session,
    StreamSpec,
};
use vocalmix::error::MixerResult;
use vocalmix::ui::ControlKey;

const SAMPLE_RATE: u32 = 48_000;
const VOCAL_HZ: f32 = 220.0;
const INSTRUMENT_HZ: f32 = 330.0;

/// Thread-backed stream; stops and joins its worker when dropped
struct SimStream {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SimStream {
    fn spawn<F>(name: &str, mut tick: F, period: Duration) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    tick();
                    thread::sleep(period);
                }
            })
            .ok();
        Self { stop, worker }
    }
}

impl Drop for SimStream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Output level per rendered buffer
type LevelLog = Arc<Mutex<Vec<f32>>>;

struct SimBackend {
    levels: LevelLog,
}

fn block_period(spec: &StreamSpec) -> Duration {
    Duration::from_secs_f64(spec.block_size as f64 / spec.sample_rate as f64)
}

impl AudioBackend for SimBackend {
    type Stream = SimStream;

    fn input_channels(&self) -> MixerResult<u16> {
        Ok(2)
    }

    fn output_channels(&self) -> MixerResult<u16> {
        Ok(2)
    }

    fn preferred_sample_rate(&self) -> MixerResult<u32> {
        Ok(SAMPLE_RATE)
    }

    fn open_input(
        &mut self,
        spec: StreamSpec,
        mut stage: CaptureStage,
        _events: EventSink,
    ) -> MixerResult<SimStream> {
        let frames = spec.block_size as usize;
        let rate = spec.sample_rate as f32;
        let mut buffer = vec![0.0f32; frames * 2];
        let mut position = 0usize;

        let tick = move || {
            for frame in buffer.chunks_exact_mut(2) {
                let t = position as f32 / rate;
                let vocal = 0.4 * (TAU * VOCAL_HZ * t).sin();
                let instrument = 0.4 * (TAU * INSTRUMENT_HZ * t).sin();
                frame[0] = vocal + instrument;
                frame[1] = vocal;
                position += 1;
            }
            stage.process(&buffer);
        };
        Ok(SimStream::spawn("sim-input", tick, block_period(&spec)))
    }

    fn open_output(
        &mut self,
        spec: StreamSpec,
        mut stage: PlaybackStage,
        _events: EventSink,
    ) -> MixerResult<SimStream> {
        let mut buffer = vec![0.0f32; spec.block_size as usize * spec.channels as usize];
        let levels = Arc::clone(&self.levels);

        let tick = move || {
            stage.render(&mut buffer);
            let rms = (buffer.iter().map(|s| s * s).sum::<f32>() / buffer.len() as f32).sqrt();
            if let Ok(mut log) = levels.lock() {
                log.push(rms);
            }
        };
        Ok(SimStream::spawn("sim-output", tick, block_period(&spec)))
    }
}

fn press(keys: &Sender<ControlKey>, key: char, times: usize) -> Result<()> {
    if let Some(key) = ControlKey::from_char(key) {
        for _ in 0..times {
            keys.send(key)?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("vocalmix=info")
        .init();

    let config = AudioConfig {
        block_size: 480,
        prefill_blocks: 5,
        ..Default::default()
    };
    let levels = LevelLog::default();
    let backend = SimBackend {
        levels: Arc::clone(&levels),
    };

    let (keys, key_rx) = channel::unbounded();
    let script = thread::spawn(move || -> Result<()> {
        thread::sleep(Duration::from_millis(400));
        // Full center, no vocal removal: only the summed signal remains
        press(&keys, '2', 8)?;
        press(&keys, '3', 10)?;
        thread::sleep(Duration::from_millis(400));
        // Pure vocal removal: the centered tone cancels out
        press(&keys, '1', 20)?;
        press(&keys, '4', 10)?;
        thread::sleep(Duration::from_millis(400));
        press(&keys, 'q', 1)?;
        Ok(())
    });

    let mut session = Session::new(backend, config, ParameterStore::default());
    let (reason, stats) = session.run(key_rx, Box::new(|line| println!("{}", line)))?;
    if let Ok(result) = script.join() {
        result?;
    }

    println!("\nStopped: {:?}", reason);
    println!("{:#?}", stats);

    if let Ok(log) = levels.lock() {
        println!("\nOutput RMS, every 10th buffer:");
        for (i, rms) in log.iter().enumerate().step_by(10) {
            let bar = "#".repeat((rms * 100.0) as usize);
            println!("{:4} {:.3} {}", i, rms, bar);
        }
    }
    Ok(())
}
