pub mod control;
pub mod terminal;

pub use control::{ControlInputHandler, ControlKey, KeySource, StatusSink};
pub use terminal::TerminalKeys;
