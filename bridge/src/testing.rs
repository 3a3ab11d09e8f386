//! In-process engines for exercising the bridge.
//!
//! Only compiled in test mode or with the `testing` feature.

use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Duration;

use crate::protocol::Protocol;
use crate::redirect::{EngineIo, StdioMode};
use crate::runner::Engine;

/// Exit code of a scripted engine whose input closed before `quit`.
pub const EOF_EXIT_CODE: i32 = 1;

/// Answers the handshake, `isready` and `go` like a minimal engine.
#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    name: String,
    protocol: Protocol,
    mode: StdioMode,
    banner: Option<String>,
    init_delay: Duration,
    search_lines: usize,
}

impl ScriptedEngine {
    pub fn uci(name: &str) -> Self {
        Self {
            name: name.to_string(),
            protocol: Protocol::Uci,
            mode: StdioMode::Private,
            banner: None,
            init_delay: Duration::ZERO,
            search_lines: 1,
        }
    }

    pub fn xboard(name: &str) -> Self {
        Self {
            protocol: Protocol::XBoard,
            ..Self::uci(name)
        }
    }

    /// Print `banner` before reading any command, as real engines do.
    pub fn with_banner(mut self, banner: &str) -> Self {
        self.banner = Some(banner.to_string());
        self
    }

    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    pub fn with_stdio_mode(mut self, mode: StdioMode) -> Self {
        self.mode = mode;
        self
    }

    /// Number of `info` lines printed before each `bestmove`.
    pub fn with_search_lines(mut self, lines: usize) -> Self {
        self.search_lines = lines;
        self
    }

    fn serve(&self, io: &mut EngineIo) -> io::Result<i32> {
        if let Some(banner) = &self.banner {
            writeln!(io.output, "{banner}")?;
            io.output.flush()?;
        }

        let mut line = String::new();
        loop {
            line.clear();
            if io.input.read_line(&mut line)? == 0 {
                return Ok(EOF_EXIT_CODE);
            }
            let command = line.trim();
            match command.split_whitespace().next().unwrap_or("") {
                "uci" => {
                    writeln!(io.output, "id name {}", self.name)?;
                    writeln!(io.output, "id author multiengine")?;
                    writeln!(io.output, "uciok")?;
                }
                "xboard" => {}
                "protover" => {
                    writeln!(io.output, "feature myname=\"{}\" setboard=1 done=1", self.name)?;
                }
                "isready" => writeln!(io.output, "readyok")?,
                "go" => {
                    for depth in 1..=self.search_lines {
                        writeln!(io.output, "info depth {depth} score cp 20 nodes {}", depth * 100)?;
                    }
                    writeln!(io.output, "bestmove e2e4")?;
                }
                "quit" => return Ok(0),
                "" => {}
                _ => writeln!(io.output, "info string unknown command {command}")?,
            }
            io.output.flush()?;
        }
    }
}

impl Engine for ScriptedEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn stdio_mode(&self) -> StdioMode {
        self.mode
    }

    fn initialize(&mut self) -> Result<(), String> {
        if !self.init_delay.is_zero() {
            thread::sleep(self.init_delay);
        }
        Ok(())
    }

    fn run(self: Box<Self>, mut io: EngineIo) -> i32 {
        self.serve(&mut io).unwrap_or_else(|e| {
            tracing::error!("Scripted engine {} I/O error: {}", self.name, e);
            2
        })
    }
}

/// Writes every input line back unchanged until a line that is exactly `quit`.
#[derive(Debug, Clone)]
pub struct EchoEngine {
    name: String,
}

impl EchoEngine {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Engine for EchoEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(self: Box<Self>, mut io: EngineIo) -> i32 {
        let mut line = Vec::new();
        loop {
            line.clear();
            match io.input.read_until(b'\n', &mut line) {
                Ok(0) | Err(_) => return EOF_EXIT_CODE,
                Ok(_) => {}
            }
            if line == b"quit\n" {
                return 0;
            }
            if io.output.write_all(&line).and_then(|()| io.output.flush()).is_err() {
                return 2;
            }
        }
    }
}

/// Fails its static initialization.
#[derive(Debug, Clone)]
pub struct FailingInitEngine {
    name: String,
    reason: String,
}

impl FailingInitEngine {
    pub fn new(name: &str, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl Engine for FailingInitEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self) -> Result<(), String> {
        Err(self.reason.clone())
    }

    fn run(self: Box<Self>, _io: EngineIo) -> i32 {
        unreachable!("run is never called after a failed initialize")
    }
}

/// Prints one line, then panics on the first command it reads.
#[derive(Debug, Clone)]
pub struct PanickingEngine {
    name: String,
}

impl PanickingEngine {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Engine for PanickingEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(self: Box<Self>, mut io: EngineIo) -> i32 {
        let _ = writeln!(io.output, "info string about to fail");
        let _ = io.output.flush();
        let mut line = String::new();
        let _ = io.input.read_line(&mut line);
        panic!("engine {} cannot handle {:?}", self.name, line.trim());
    }
}
