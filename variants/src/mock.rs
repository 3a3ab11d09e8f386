//! Mock engines for every variant - only compiled in test mode or with the mock feature

use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};

use engine_bridge::{Engine, EngineIo, Protocol};

use crate::variant::EngineVariant;

/// Commands a [`MockEngine`] has read, shared with the test that created it.
#[derive(Debug, Clone, Default)]
pub struct MockLog(Arc<Mutex<Vec<String>>>);

impl MockLog {
    pub fn commands(&self) -> Vec<String> {
        self.0.lock().map(|log| log.clone()).unwrap_or_default()
    }

    fn record(&self, command: &str) {
        if let Ok(mut log) = self.0.lock() {
            log.push(command.to_string());
        }
    }
}

/// A pure-Rust stand-in for one variant.
///
/// Prints a banner at startup like the real engines, completes the UCI and
/// XBoard handshakes, answers `isready` and `go`, and exits with 0 on `quit`.
#[derive(Debug, Clone)]
pub struct MockEngine {
    variant: EngineVariant,
    bestmove: String,
    log: MockLog,
}

impl MockEngine {
    pub fn new(variant: EngineVariant) -> Self {
        Self {
            variant,
            bestmove: "e2e4".to_string(),
            log: MockLog::default(),
        }
    }

    /// Move reported by every `go`.
    pub fn with_bestmove(mut self, mv: &str) -> Self {
        self.bestmove = mv.to_string();
        self
    }

    pub fn log(&self) -> MockLog {
        self.log.clone()
    }

    pub fn banner(&self) -> String {
        format!("Mock {} by multiengine", self.variant.description())
    }

    fn serve(&self, io: &mut EngineIo) -> io::Result<i32> {
        writeln!(io.output, "{}", self.banner())?;
        io.output.flush()?;

        let mut line = String::new();
        loop {
            line.clear();
            if io.input.read_line(&mut line)? == 0 {
                tracing::warn!("Mock {} input closed before quit", self.variant);
                return Ok(1);
            }
            let command = line.trim();
            if command.is_empty() {
                continue;
            }
            self.log.record(command);

            match command.split_whitespace().next().unwrap_or_default() {
                "uci" => {
                    writeln!(io.output, "id name Mock {}", self.variant)?;
                    writeln!(io.output, "id author multiengine")?;
                    writeln!(io.output, "option name Threads type spin default 1 min 1 max 512")?;
                    writeln!(io.output, "uciok")?;
                }
                "protover" => writeln!(
                    io.output,
                    "feature myname=\"Mock {}\" setboard=1 usermove=1 done=1",
                    self.variant
                )?,
                "isready" => writeln!(io.output, "readyok")?,
                "go" => {
                    writeln!(io.output, "info depth 1 score cp 0 nodes 1 pv {}", self.bestmove)?;
                    writeln!(io.output, "bestmove {}", self.bestmove)?;
                }
                "quit" => return Ok(0),
                _ => {}
            }
            io.output.flush()?;
        }
    }
}

impl Engine for MockEngine {
    fn name(&self) -> &str {
        self.variant.name()
    }

    fn protocol(&self) -> Protocol {
        self.variant.protocol()
    }

    fn run(self: Box<Self>, mut io: EngineIo) -> i32 {
        self.serve(&mut io).unwrap_or_else(|e| {
            tracing::error!("Mock {} I/O error: {}", self.variant, e);
            2
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::rc::Rc;

    /// Output sink the test can read after the engine consumed its `EngineIo`.
    #[derive(Clone, Default)]
    struct Shared(Rc<RefCell<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn run_script(engine: MockEngine, script: &str) -> (i32, String) {
        let out = Shared::default();
        let io = EngineIo::new(Cursor::new(script.as_bytes().to_vec()), out.clone());
        let code = Box::new(engine).run(io);
        let text = String::from_utf8(out.0.borrow().clone()).unwrap();
        (code, text)
    }

    #[test]
    fn test_uci_session() {
        let engine = MockEngine::new(EngineVariant::Classical).with_bestmove("d2d4");
        let log = engine.log();
        let (code, out) = run_script(engine, "uci\nisready\ngo depth 1\nquit\n");

        assert_eq!(code, 0);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Mock Stockfish, hand-crafted evaluation by multiengine");
        assert!(lines.contains(&"uciok"));
        assert!(lines.contains(&"readyok"));
        assert_eq!(lines.last(), Some(&"bestmove d2d4"));
        assert_eq!(log.commands(), vec!["uci", "isready", "go depth 1", "quit"]);
    }

    #[test]
    fn test_xboard_handshake() {
        let engine = MockEngine::new(EngineVariant::Fairy);
        let (code, out) = run_script(engine, "xboard\nprotover 2\nquit\n");
        assert_eq!(code, 0);
        assert!(out.lines().any(|l| Protocol::XBoard.is_handshake_complete(l)));
    }

    #[test]
    fn test_eof_without_quit() {
        let (code, _) = run_script(MockEngine::new(EngineVariant::Nnue), "uci\n");
        assert_eq!(code, 1);
    }
}
