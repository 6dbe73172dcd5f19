//! Operating mode shared between the runloop and the command dispatcher.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use thiserror::Error;

/// Operating mode. Away enables security polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Home,
    Away,
}

impl Mode {
    /// Parse user input: surrounding whitespace is trimmed and each word
    /// title-cased before matching.
    pub fn parse(raw: &str) -> Result<Self, ModeError> {
        match title_case(raw.trim()).as_str() {
            "Home" => Ok(Mode::Home),
            "Away" => Ok(Mode::Away),
            _ => Err(ModeError::Invalid(raw.to_string())),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Mode::Home => 0,
            Mode::Away => 1,
        }
    }

    fn from_u8(v: u8) -> Self {
        if v == 1 {
            Mode::Away
        } else {
            Mode::Home
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Home => f.write_str("Home"),
            Mode::Away => f.write_str("Away"),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ModeError {
    #[error("invalid mode {0:?}")]
    Invalid(String),
}

/// Single-writer, multi-reader mode cell.
#[derive(Debug)]
pub struct ModeState {
    mode: AtomicU8,
}

impl ModeState {
    pub fn new(initial: Mode) -> Self {
        Self {
            mode: AtomicU8::new(initial.to_u8()),
        }
    }

    pub fn get(&self) -> Mode {
        Mode::from_u8(self.mode.load(Ordering::Acquire))
    }

    pub fn is_away(&self) -> bool {
        self.get() == Mode::Away
    }

    /// Replace the current mode.
    pub fn set(&self, mode: Mode) {
        self.mode.store(mode.to_u8(), Ordering::Release);
        tracing::warn!("SYSTEM MODE UPDATED TO: {}", mode);
    }

    /// Apply a mode string. Anything other than Home/Away leaves the
    /// current mode in place.
    pub fn set_from_str(&self, raw: &str) -> Result<Mode, ModeError> {
        match Mode::parse(raw) {
            Ok(mode) => {
                self.set(mode);
                Ok(mode)
            }
            Err(e) => {
                tracing::warn!("Invalid mode received: {:?}. Mode remains {}", raw, self.get());
                Err(e)
            }
        }
    }
}

impl Default for ModeState {
    fn default() -> Self {
        Self::new(Mode::Home)
    }
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut start_of_word = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if start_of_word {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            start_of_word = false;
        } else {
            out.push(c);
            start_of_word = true;
        }
    }
    out
}
