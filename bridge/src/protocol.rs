//! The few protocol keywords the bridge needs to open and close a session.
//!
//! This is not a UCI or XBoard parser; the grammar belongs to the
//! engines and their callers.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    #[default]
    Uci,
    XBoard,
}

impl Protocol {
    /// Command(s) that start a session.
    pub fn handshake_command(self) -> &'static str {
        match self {
            Self::Uci => "uci\n",
            Self::XBoard => "xboard\nprotover 2\n",
        }
    }

    /// Whether `line` is the engine's last handshake line.
    pub fn is_handshake_complete(self, line: &str) -> bool {
        let line = line.trim();
        match self {
            Self::Uci => line == "uciok",
            Self::XBoard => {
                line.starts_with("feature")
                    && line.split_whitespace().any(|token| token == "done=1")
            }
        }
    }

    /// Command that makes the engine's blocking loop return.
    pub fn quit_command(self) -> &'static str {
        "quit\n"
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uci => write!(f, "uci"),
            Self::XBoard => write!(f, "xboard"),
        }
    }
}
