//! The per-instance facade: `init`, `start`, `send`, `recv`.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::time::{Duration, Instant};

use crate::async_bridge::AsyncBridge;
use crate::channel::{Channel, InsideEnds, OsPipes, PipeSource};
use crate::config::{BridgeConfig, MIN_SCRATCH_BYTES};
use crate::error::{BridgeError, BridgeResult};
use crate::lines::LineAssembler;
use crate::protocol::Protocol;
use crate::redirect::StdioMode;
use crate::runner::{Engine, EngineRunner, RunnerState};
use crate::termination::{Absorbed, TerminationTracker};

/// One hosted engine instance and the caller's ends of its channel.
///
/// A bridge is single-use: once `recv` has returned `None` the engine has
/// exited and the bridge can only be joined or dropped.
///
/// # Example
///
/// ```no_run
/// use engine_bridge::Bridge;
/// # fn demo(engine: Box<dyn engine_bridge::Engine>) -> engine_bridge::BridgeResult<()> {
/// let mut bridge = Bridge::init(engine)?;
/// bridge.start()?;
/// bridge.send(b"uci\n")?;
/// while let Some(fragment) = bridge.recv()? {
///     if String::from_utf8_lossy(&fragment).contains("uciok") {
///         break;
///     }
/// }
/// bridge.send(b"quit\n")?;
/// while bridge.recv()?.is_some() {}
/// let exit_code = bridge.join()?;
/// # Ok(())
/// # }
/// ```
pub struct Bridge {
    runner: EngineRunner,
    inside: Option<InsideEnds>,
    reader: File,
    writer: File,
    scratch: Box<[u8]>,
    tracker: TerminationTracker,
    lines: LineAssembler,
    config: BridgeConfig,
}

impl Bridge {
    /// Create the channel and runner for `engine` with configuration from the environment.
    ///
    /// # Errors
    /// [`BridgeError::ResourceExhausted`] if the channel cannot be created.
    pub fn init(engine: Box<dyn Engine>) -> BridgeResult<Self> {
        Self::init_with(engine, BridgeConfig::from_env(), &OsPipes)
    }

    /// Same as [`init`](Self::init) with explicit configuration and pipe source.
    ///
    /// # Errors
    /// [`BridgeError::ResourceExhausted`] if the channel cannot be created; no
    /// descriptors are left open in that case.
    pub fn init_with(
        engine: Box<dyn Engine>,
        config: BridgeConfig,
        pipes: &dyn PipeSource,
    ) -> BridgeResult<Self> {
        let (inside, outside) = Channel::create_with(pipes)?.split();
        let (reader, writer) = outside.into_files();
        let runner = EngineRunner::new(engine);
        tracing::debug!(
            "Bridge initialized for engine {} ({} protocol, {:?} stdio)",
            runner.name(),
            runner.protocol(),
            runner.stdio_mode()
        );
        Ok(Self {
            runner,
            inside: Some(inside),
            reader,
            writer,
            scratch: vec![0u8; config.scratch_capacity.max(MIN_SCRATCH_BYTES)].into_boxed_slice(),
            tracker: TerminationTracker::new(),
            lines: LineAssembler::new(),
            config,
        })
    }

    pub fn name(&self) -> &str {
        self.runner.name()
    }

    pub fn protocol(&self) -> Protocol {
        self.runner.protocol()
    }

    pub fn stdio_mode(&self) -> StdioMode {
        self.runner.stdio_mode()
    }

    pub fn state(&self) -> RunnerState {
        self.runner.state()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Whether `recv` has observed the sentinel.
    pub fn is_terminated(&self) -> bool {
        self.tracker.sentinel_observed()
    }

    /// Launch the engine thread. Returns once the engine loop is running,
    /// not when it finishes.
    ///
    /// # Errors
    /// See [`EngineRunner::start`]. After an initialization failure the inside
    /// ends are closed, so `send` reports [`BridgeError::BrokenPipe`].
    pub fn start(&mut self) -> BridgeResult<()> {
        let inside = self.inside.take().ok_or(BridgeError::AlreadyStarted)?;
        self.runner.start(inside, self.config.start_timeout)
    }

    /// Write `bytes` to the engine's stdin. Does not wait for a response.
    ///
    /// # Errors
    /// [`BridgeError::BrokenPipe`] once the engine has exited.
    pub fn send(&mut self, bytes: &[u8]) -> BridgeResult<usize> {
        if !self.tracker.is_open() {
            return Err(BridgeError::BrokenPipe);
        }
        tracing::trace!("UCI >> {}", String::from_utf8_lossy(bytes).trim_end());
        self.writer
            .write_all(bytes)
            .map_err(BridgeError::from_pipe_io)?;
        Ok(bytes.len())
    }

    /// Send one protocol command, appending the newline if it is missing.
    pub fn send_command(&mut self, command: &str) -> BridgeResult<usize> {
        if command.ends_with('\n') {
            self.send(command.as_bytes())
        } else {
            self.send(format!("{command}\n").as_bytes())
        }
    }

    /// Read the next fragment of engine output.
    ///
    /// Returns `Some(bytes)` for output (fragments carry no line framing),
    /// and `None` exactly once, when the engine has exited. Waits at most
    /// [`BridgeConfig::recv_timeout`] if one is configured.
    ///
    /// # Errors
    /// - [`BridgeError::NotStarted`] before `start`.
    /// - [`BridgeError::BrokenPipe`] after `None`, or if the engine's output
    ///   closed without the sentinel.
    /// - [`BridgeError::Timeout`] if the configured deadline passes.
    pub fn recv(&mut self) -> BridgeResult<Option<Vec<u8>>> {
        self.recv_within(self.config.recv_timeout)
    }

    /// [`recv`](Self::recv) with an explicit deadline.
    pub fn recv_timeout(&mut self, timeout: Duration) -> BridgeResult<Option<Vec<u8>>> {
        self.recv_within(Some(timeout))
    }

    fn recv_within(&mut self, timeout: Option<Duration>) -> BridgeResult<Option<Vec<u8>>> {
        if let Some(result) = self.tracker.begin() {
            if matches!(result, Ok(None)) {
                self.runner.mark_quit();
            }
            return result;
        }
        if self.inside.is_some() {
            return Err(BridgeError::NotStarted);
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut output = Vec::new();
        loop {
            if !wait_readable(self.reader.as_fd(), deadline).map_err(BridgeError::Io)? {
                return Err(BridgeError::Timeout(timeout.unwrap_or_default()));
            }
            let n = match self.reader.read(&mut self.scratch) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(BridgeError::from_pipe_io(e)),
            };

            match self.tracker.absorb(&mut output, &self.scratch[..n]) {
                Absorbed::Done(result) => return self.finish_recv(result),
                Absorbed::AwaitingEof => {}
                Absorbed::Holding => {
                    // Only wait for the rest of a possible sentinel if it is already here.
                    if !wait_readable(self.reader.as_fd(), Some(Instant::now()))
                        .map_err(BridgeError::Io)?
                    {
                        let result = self.tracker.release_into(&mut output);
                        return self.finish_recv(result);
                    }
                }
            }
        }
    }

    fn finish_recv(
        &mut self,
        result: BridgeResult<Option<Vec<u8>>>,
    ) -> BridgeResult<Option<Vec<u8>>> {
        if let Ok(Some(bytes)) = &result {
            tracing::trace!("UCI << {}", String::from_utf8_lossy(bytes).trim_end());
        }
        if self.tracker.sentinel_observed() {
            self.runner.mark_quit();
        }
        result
    }

    /// Next complete output line, without its terminator.
    ///
    /// Returns `None` once the engine has exited and every line has been
    /// returned. Do not mix with [`recv`](Self::recv) on the same bridge;
    /// bytes buffered here are invisible to `recv`.
    pub fn recv_line(&mut self) -> BridgeResult<Option<String>> {
        self.recv_line_within(self.config.recv_timeout)
    }

    /// [`recv_line`](Self::recv_line) with an explicit deadline.
    pub fn recv_line_timeout(&mut self, timeout: Duration) -> BridgeResult<Option<String>> {
        self.recv_line_within(Some(timeout))
    }

    fn recv_line_within(&mut self, timeout: Option<Duration>) -> BridgeResult<Option<String>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(line) = self.lines.next_line() {
                return Ok(Some(line));
            }
            if self.tracker.is_finished() {
                return Ok(self.lines.take_partial());
            }
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            if let Some(bytes) = self.recv_within(remaining)? {
                self.lines.push(&bytes);
            }
        }
    }

    /// Run the protocol handshake and return every line up to and including
    /// the one that completes it (e.g. `uciok`).
    ///
    /// # Errors
    /// [`BridgeError::Timeout`] if the handshake does not complete in time,
    /// [`BridgeError::BrokenPipe`] if the engine exits first.
    #[tracing::instrument(level = "debug", skip(self), fields(engine = %self.name()))]
    pub fn handshake(&mut self, timeout: Duration) -> BridgeResult<Vec<String>> {
        let protocol = self.protocol();
        self.send_command(protocol.handshake_command())?;

        let deadline = Instant::now() + timeout;
        let mut lines = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let line = match self.recv_line_within(Some(remaining)) {
                Ok(Some(line)) => line,
                Ok(None) => return Err(BridgeError::BrokenPipe),
                Err(BridgeError::Timeout(_)) => return Err(BridgeError::Timeout(timeout)),
                Err(e) => return Err(e),
            };
            let done = protocol.is_handshake_complete(&line);
            lines.push(line);
            if done {
                tracing::debug!("Handshake complete after {} lines", lines.len());
                return Ok(lines);
            }
        }
    }

    /// Wait for the engine thread and return its exit code.
    ///
    /// Blocks while the engine loop runs; send the quit command first.
    pub fn join(mut self) -> BridgeResult<i32> {
        self.runner.join()
    }

    /// Wait up to `timeout` for the engine thread to finish.
    ///
    /// # Errors
    /// [`BridgeError::Timeout`] if the thread is still running at the deadline.
    pub fn wait_exit(&mut self, timeout: Duration) -> BridgeResult<i32> {
        let deadline = Instant::now() + timeout;
        while !self.runner.is_finished() {
            if Instant::now() >= deadline {
                return Err(BridgeError::Timeout(timeout));
            }
            std::thread::sleep(self.config.poll_interval);
        }
        self.runner.join()
    }

    /// Send the protocol's quit command, drain output until the sentinel, and
    /// join the engine thread, all within `timeout`.
    #[tracing::instrument(level = "info", skip(self), fields(engine = %self.name()))]
    pub fn shutdown(mut self, timeout: Duration) -> BridgeResult<i32> {
        if self.inside.is_some() {
            return Err(BridgeError::NotStarted);
        }
        let deadline = Instant::now() + timeout;

        if self.tracker.is_open() {
            tracing::info!("Sending quit command to engine");
            match self.send_command(self.protocol().quit_command()) {
                Ok(_) | Err(BridgeError::BrokenPipe) => {}
                Err(e) => return Err(e),
            }
        }

        while !self.tracker.is_finished() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.recv_within(Some(remaining)) {
                Ok(Some(_)) => {}
                Ok(None) | Err(BridgeError::BrokenPipe) => break,
                Err(BridgeError::Timeout(_)) => return Err(BridgeError::Timeout(timeout)),
                Err(e) => return Err(e),
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        self.wait_exit(remaining)
    }

    /// Move a started bridge onto the tokio reactor. Must be called from
    /// within a tokio runtime.
    ///
    /// # Errors
    /// [`BridgeError::NotStarted`] before `start`; [`BridgeError::Io`] if the
    /// pipe ends cannot be registered.
    pub fn into_async(self) -> BridgeResult<AsyncBridge> {
        if self.inside.is_some() {
            return Err(BridgeError::NotStarted);
        }
        AsyncBridge::from_parts(
            self.runner,
            self.reader,
            self.writer,
            self.scratch,
            self.tracker,
        )
    }
}

/// Wait until `fd` is readable (data or end-of-file).
///
/// `None` waits forever. Returns `false` if `deadline` passes first; a
/// deadline of "now" just checks whether input is already pending.
fn wait_readable(fd: BorrowedFd<'_>, deadline: Option<Instant>) -> io::Result<bool> {
    loop {
        let timeout_ms: libc::c_int = match deadline {
            None => -1,
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let ms = remaining.as_nanos().div_ceil(1_000_000);
                ms.min(libc::c_int::MAX as u128) as libc::c_int
            }
        };

        let mut pollfd = libc::pollfd {
            fd: fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: `pollfd` is a single valid pollfd and the count passed is 1.
        let ready = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if ready > 0 {
            return Ok(true);
        }
        if ready == 0 {
            if timeout_ms == 0 {
                return Ok(false);
            }
            continue;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redirect::EngineIo;
    use crate::testing::{EchoEngine, FailingInitEngine, PanickingEngine, ScriptedEngine};
    use std::io::BufRead;
    use std::os::fd::OwnedFd;

    const WAIT: Duration = Duration::from_secs(10);

    fn bridge_for(engine: impl Engine) -> Bridge {
        Bridge::init_with(Box::new(engine), BridgeConfig::default(), &OsPipes).unwrap()
    }

    fn drain(bridge: &mut Bridge) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(bytes) = bridge.recv_timeout(WAIT).unwrap() {
            out.extend(bytes);
        }
        out
    }

    #[test]
    fn test_uci_handshake_scenario() {
        let mut bridge = bridge_for(ScriptedEngine::uci("classical").with_banner("Classical 1.0"));
        assert_eq!(bridge.state(), RunnerState::Created);
        bridge.start().unwrap();
        assert_eq!(bridge.state(), RunnerState::Running);

        assert_eq!(bridge.send(b"uci\n").unwrap(), 4);
        let mut seen = Vec::new();
        while !String::from_utf8_lossy(&seen).contains("uciok") {
            let fragment = bridge.recv_timeout(WAIT).unwrap().expect("engine still running");
            assert!(!fragment.is_empty());
            seen.extend(fragment);
        }

        bridge.send(b"quit\n").unwrap();
        drain(&mut bridge);
        assert!(bridge.is_terminated());
        assert_eq!(bridge.state(), RunnerState::Quit);
        assert!(matches!(bridge.recv(), Err(BridgeError::BrokenPipe)));
        assert_eq!(bridge.join().unwrap(), 0);
    }

    #[test]
    fn test_exactly_one_none_then_errors() {
        let mut bridge = bridge_for(ScriptedEngine::uci("classical"));
        bridge.start().unwrap();
        bridge.send(b"isready\nquit\n").unwrap();

        let mut nones = 0;
        loop {
            match bridge.recv_timeout(WAIT) {
                Ok(Some(_)) => assert_eq!(nones, 0, "output after terminal None"),
                Ok(None) => nones += 1,
                Err(BridgeError::BrokenPipe) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(nones, 1);
        assert!(matches!(bridge.send(b"isready\n"), Err(BridgeError::BrokenPipe)));
    }

    #[test]
    fn test_small_scratch_buffer_fragments_output() {
        let mut bridge = bridge_for(ScriptedEngine::uci("chatty").with_search_lines(40));
        bridge.start().unwrap();
        bridge.send_command("go depth 40").unwrap();
        bridge.send_command("quit").unwrap();

        let mut fragments = 0;
        let mut out = Vec::new();
        while let Some(bytes) = bridge.recv_timeout(WAIT).unwrap() {
            fragments += 1;
            out.extend(bytes);
        }
        let text = String::from_utf8(out).unwrap();
        assert!(fragments > 1);
        assert!(text.starts_with("info depth 1 "));
        assert!(text.ends_with("bestmove e2e4\n"));
        assert!(!text.contains("quitok"));
    }

    #[test]
    fn test_recv_before_start_is_not_started() {
        let mut bridge = bridge_for(ScriptedEngine::uci("idle"));
        assert!(matches!(bridge.recv(), Err(BridgeError::NotStarted)));
    }

    #[test]
    fn test_recv_timeout_when_engine_is_silent() {
        let mut bridge = bridge_for(ScriptedEngine::uci("quiet"));
        bridge.start().unwrap();
        let err = bridge.recv_timeout(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, BridgeError::Timeout(_)));
        assert_eq!(bridge.shutdown(WAIT).unwrap(), 0);
    }

    #[test]
    fn test_recv_returns_promptly_after_engine_writes() {
        let mut bridge = bridge_for(EchoEngine::new("echo"));
        bridge.start().unwrap();
        bridge.send(b"x\n").unwrap();
        let started = Instant::now();
        assert_eq!(bridge.recv_timeout(WAIT).unwrap(), Some(b"x\n".to_vec()));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(bridge.shutdown(WAIT).unwrap(), 0);
    }

    /// Prints a bare `quit` (a sentinel prefix) and waits for one line.
    struct PromptEngine;

    impl Engine for PromptEngine {
        fn name(&self) -> &str {
            "prompt"
        }

        fn run(self: Box<Self>, mut io: EngineIo) -> i32 {
            let _ = io.output.write_all(b"quit");
            let _ = io.output.flush();
            let mut line = String::new();
            let _ = io.input.read_line(&mut line);
            0
        }
    }

    #[test]
    fn test_output_ending_in_sentinel_prefix_is_not_withheld() {
        let mut bridge = bridge_for(PromptEngine);
        bridge.start().unwrap();
        assert_eq!(bridge.recv_timeout(WAIT).unwrap(), Some(b"quit".to_vec()));
        assert!(!bridge.is_terminated());
        bridge.send(b"\n").unwrap();
        assert_eq!(bridge.recv_timeout(WAIT).unwrap(), None);
        assert_eq!(bridge.join().unwrap(), 0);
    }

    #[test]
    fn test_recv_line_reassembles() {
        let mut bridge = bridge_for(ScriptedEngine::uci("lines"));
        bridge.start().unwrap();
        bridge.send_command("uci").unwrap();
        assert_eq!(bridge.recv_line_timeout(WAIT).unwrap().as_deref(), Some("id name lines"));
        assert_eq!(
            bridge.recv_line_timeout(WAIT).unwrap().as_deref(),
            Some("id author multiengine")
        );
        assert_eq!(bridge.recv_line_timeout(WAIT).unwrap().as_deref(), Some("uciok"));
        bridge.send_command("quit").unwrap();
        assert_eq!(bridge.recv_line_timeout(WAIT).unwrap(), None);
    }

    #[test]
    fn test_handshake_uci_and_xboard() {
        let mut uci = bridge_for(ScriptedEngine::uci("uci-engine").with_banner("banner"));
        uci.start().unwrap();
        let lines = uci.handshake(WAIT).unwrap();
        assert_eq!(lines.first().map(String::as_str), Some("banner"));
        assert_eq!(lines.last().map(String::as_str), Some("uciok"));
        assert_eq!(uci.shutdown(WAIT).unwrap(), 0);

        let mut xboard = bridge_for(ScriptedEngine::xboard("fairy"));
        assert_eq!(xboard.protocol(), Protocol::XBoard);
        xboard.start().unwrap();
        let lines = xboard.handshake(WAIT).unwrap();
        assert!(lines.last().unwrap().contains("done=1"));
        assert_eq!(xboard.shutdown(WAIT).unwrap(), 0);
    }

    #[test]
    fn test_initialization_failure_surfaces_and_breaks_pipe() {
        let mut bridge = bridge_for(FailingInitEngine::new("nnue", "network file missing"));
        let err = bridge.start().unwrap_err();
        assert!(matches!(err, BridgeError::Initialization { .. }));
        assert_eq!(bridge.state(), RunnerState::Failed);
        assert!(matches!(bridge.send(b"uci\n"), Err(BridgeError::BrokenPipe)));
        assert!(matches!(bridge.recv_timeout(WAIT), Err(BridgeError::BrokenPipe)));
    }

    #[test]
    fn test_second_start_is_rejected() {
        let mut bridge = bridge_for(ScriptedEngine::uci("once"));
        bridge.start().unwrap();
        assert!(matches!(bridge.start(), Err(BridgeError::AlreadyStarted)));
        assert_eq!(bridge.shutdown(WAIT).unwrap(), 0);
    }

    #[test]
    fn test_panicking_engine_still_terminates() {
        let mut bridge = bridge_for(PanickingEngine::new("crashy"));
        bridge.start().unwrap();
        bridge.send_command("go").unwrap();
        let out = drain(&mut bridge);
        assert_eq!(out, b"info string about to fail\n");
        assert_eq!(bridge.join().unwrap(), crate::runner::PANIC_EXIT_CODE);
    }

    #[test]
    fn test_wait_exit_times_out_while_running() {
        let mut bridge = bridge_for(ScriptedEngine::uci("busy"));
        bridge.start().unwrap();
        let err = bridge.wait_exit(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, BridgeError::Timeout(_)));
        assert_eq!(bridge.shutdown(WAIT).unwrap(), 0);
    }

    #[test]
    fn test_shutdown_before_start() {
        let bridge = bridge_for(ScriptedEngine::uci("idle"));
        assert!(matches!(bridge.shutdown(WAIT), Err(BridgeError::NotStarted)));
    }

    #[test]
    fn test_init_with_exhausted_pipes() {
        struct NoPipes;
        impl PipeSource for NoPipes {
            fn pipe(&self) -> io::Result<(OwnedFd, OwnedFd)> {
                Err(io::Error::from_raw_os_error(libc::EMFILE))
            }
        }
        let result = Bridge::init_with(
            Box::new(ScriptedEngine::uci("classical")),
            BridgeConfig::default(),
            &NoPipes,
        );
        assert!(matches!(result, Err(BridgeError::ResourceExhausted(_))));
    }

    #[test]
    fn test_wait_readable_deadline_now_is_a_check() {
        let (inside, outside) = Channel::create().unwrap().split();
        let (reader, _writer) = outside.into_files();
        assert!(!wait_readable(reader.as_fd(), Some(Instant::now())).unwrap());

        let mut inside_write = File::from(inside.write);
        inside_write.write_all(b"x").unwrap();
        assert!(wait_readable(reader.as_fd(), Some(Instant::now())).unwrap());
    }
}
