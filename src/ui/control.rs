// src/ui/control.rs
// Keyboard-driven parameter control, run on its own thread

use std::io;
use std::ops::ControlFlow;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};
use tracing::{debug, error, info};

use crate::audio::params::{MixParameter, MixParameters, ParameterStore};
use crate::audio::{EventSink, SessionEvent};

/// Commands recognized by the control thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKey {
    Adjust(MixParameter, i32),
    Reset,
    Quit,
    /// Ctrl+C while the terminal is in raw mode
    Interrupt,
}

impl ControlKey {
    /// Map a typed character to a command. Letters are case-insensitive.
    pub fn from_char(c: char) -> Option<Self> {
        let key = match c.to_ascii_lowercase() {
            '1' => ControlKey::Adjust(MixParameter::CenterAttenuation, -1),
            '2' => ControlKey::Adjust(MixParameter::CenterAttenuation, 1),
            '3' => ControlKey::Adjust(MixParameter::VocalRemovalMix, -1),
            '4' => ControlKey::Adjust(MixParameter::VocalRemovalMix, 1),
            '5' => ControlKey::Adjust(MixParameter::MasterVolume, -1),
            '6' => ControlKey::Adjust(MixParameter::MasterVolume, 1),
            'r' => ControlKey::Reset,
            'q' => ControlKey::Quit,
            _ => return None,
        };
        Some(key)
    }
}

/// Where the control thread gets its keys from
pub trait KeySource: Send {
    /// Wait at most `timeout` for the next recognized key
    fn poll_key(&mut self, timeout: Duration) -> io::Result<Option<ControlKey>>;
}

/// Keys pushed from another thread (scripted input, tests, demos)
impl KeySource for Receiver<ControlKey> {
    fn poll_key(&mut self, timeout: Duration) -> io::Result<Option<ControlKey>> {
        match self.recv_timeout(timeout) {
            Ok(key) => Ok(Some(key)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "key channel closed",
            )),
        }
    }
}

/// Width of the rules framing the banner and menus
pub const RULE_WIDTH: usize = 60;

/// Status line output (console, log, test capture)
pub type StatusSink = Box<dyn FnMut(&str) + Send>;

/// Sole writer of the mix parameters. Never touches audio data.
pub struct ControlInputHandler<K: KeySource> {
    keys: K,
    params: ParameterStore,
    events: EventSink,
    status: StatusSink,
    poll_interval: Duration,
}

impl<K: KeySource + 'static> ControlInputHandler<K> {
    pub fn new(
        keys: K,
        params: ParameterStore,
        events: EventSink,
        status: StatusSink,
        poll_interval: Duration,
    ) -> Self {
        Self {
            keys,
            params,
            events,
            status,
            poll_interval,
        }
    }

    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("control-input".to_string())
            .spawn(move || self.run())
    }

    /// Poll keys until the session stops or a quit key arrives
    pub fn run(mut self) {
        debug!("Control thread started");
        while self.events.running().is_running() {
            match self.keys.poll_key(self.poll_interval) {
                Ok(Some(key)) => {
                    if self.handle_key(key).is_break() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    error!("Key input failed: {}", err);
                    self.events.report(SessionEvent::ControlLost(err.to_string()));
                    break;
                }
            }
        }
        debug!("Control thread exiting");
    }

    /// Apply one key. Breaks when the key ends the session.
    pub fn handle_key(&mut self, key: ControlKey) -> ControlFlow<()> {
        match key {
            ControlKey::Adjust(param, steps) => {
                let params = self.params.update(|p| p.nudge(param, steps));
                debug!("{} -> {:.2}", param.label(), params.get(param));
                self.emit(&format!("{}: {}%", param.label(), params.percent(param)));
                ControlFlow::Continue(())
            }
            ControlKey::Reset => {
                let params = self.params.reset();
                info!("Mix parameters reset to defaults");
                self.emit("Settings reset to defaults");
                for line in banner_lines(&params) {
                    self.emit(&line);
                }
                ControlFlow::Continue(())
            }
            ControlKey::Quit => self.request_stop(SessionEvent::QuitRequested, "Stopping..."),
            ControlKey::Interrupt => {
                self.request_stop(SessionEvent::Interrupted, "Interrupted, stopping...")
            }
        }
    }

    fn request_stop(&mut self, event: SessionEvent, message: &str) -> ControlFlow<()> {
        info!("Stop requested: {:?}", event);
        if self.events.report(event) {
            self.emit(message);
        }
        ControlFlow::Break(())
    }

    fn emit(&mut self, line: &str) {
        (self.status)(line);
    }
}

/// Current settings as shown in the banner and after a reset
pub fn settings_lines(params: &MixParameters) -> Vec<String> {
    [
        MixParameter::CenterAttenuation,
        MixParameter::VocalRemovalMix,
        MixParameter::MasterVolume,
    ]
    .iter()
    .map(|&param| {
        format!(
            "  {:<20} {}%",
            format!("{}:", param.label()),
            params.percent(param)
        )
    })
    .collect()
}

/// Title, current settings and the key map
pub fn banner_lines(params: &MixParameters) -> Vec<String> {
    let rule = "=".repeat(RULE_WIDTH);
    let mut lines = vec![
        String::new(),
        rule.clone(),
        "  VOCALMIX - LIVE VOCAL/CENTER MIXER".to_string(),
        rule.clone(),
        String::new(),
        "Current Settings:".to_string(),
    ];
    lines.extend(settings_lines(params));
    lines.extend(
        [
            "",
            "Controls:",
            "  [1/2] - Decrease/Increase Center Attenuation (±5%)",
            "  [3/4] - Decrease/Increase Vocal Removal Mix (±10%)",
            "  [5/6] - Decrease/Increase Master Volume (±5%)",
            "  [R]   - Reset to defaults",
            "  [Q]   - Quit",
        ]
        .map(String::from),
    );
    lines.push(rule);
    lines.push(String::new());
    lines
}
