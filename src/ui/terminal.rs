use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::io::{self, BufRead, Write};
use std::time::Duration;

use super::control::{ControlKey, KeySource, RULE_WIDTH, StatusSink, banner_lines};
use crate::audio::device::DeviceInfo;
use crate::audio::params::MixParameters;

/// Raw-mode keyboard reader. Raw mode is left again when this is dropped.
pub struct TerminalKeys;

impl TerminalKeys {
    pub fn new() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl KeySource for TerminalKeys {
    fn poll_key(&mut self, timeout: Duration) -> io::Result<Option<ControlKey>> {
        if event::poll(timeout)?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            return Ok(map_key(key));
        }
        Ok(None)
    }
}

impl Drop for TerminalKeys {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

/// Translate a terminal key event into a control command
pub fn map_key(key: KeyEvent) -> Option<ControlKey> {
    match key.code {
        KeyCode::Char('c') | KeyCode::Char('C') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(ControlKey::Interrupt)
        }
        KeyCode::Char(c) => ControlKey::from_char(c),
        _ => None,
    }
}

/// Print one line; safe whether or not raw mode is active
pub fn print_status(line: &str) {
    let mut stdout = io::stdout().lock();
    let _ = write!(stdout, "{}\r\n", line);
    let _ = stdout.flush();
}

/// Status sink for the control thread that writes to the terminal
pub fn console_sink() -> StatusSink {
    Box::new(print_status)
}

pub fn print_banner(params: &MixParameters) {
    for line in banner_lines(params) {
        print_status(&line);
    }
}

pub fn print_device_list(devices: &[DeviceInfo]) {
    println!("\n=== Available Audio Devices ===");
    for device in devices {
        println!("{}: {}{}", device.index, device.name, device.marker());
    }
    println!("================================\n");
}

/// Show the numbered output menu and read the answer from `input`
pub fn prompt_output_choice<R: BufRead>(
    candidates: &[&DeviceInfo],
    mut input: R,
) -> io::Result<String> {
    let rule = "=".repeat(RULE_WIDTH);
    println!("\n{}", rule);
    println!("  Available OUTPUT Devices:");
    println!("{}", rule);
    for (choice, device) in candidates.iter().enumerate() {
        println!("  [{}] {}", choice, device.name);
    }
    println!("{}", rule);
    println!("\nSelect your OUTPUT device (speakers/headphones):");
    print!("Enter number: ");
    io::stdout().flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer)
}
