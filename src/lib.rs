pub mod audio;
pub mod error;
pub mod ui;

pub use audio::{AudioConfig, MixParameters, ParameterStore, Session};
pub use error::{MixError, MixerError};
pub use ui::TerminalKeys;
