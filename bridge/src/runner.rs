//! Runs one engine's blocking loop on a dedicated thread.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::channel::InsideEnds;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::Protocol;
use crate::redirect::{EngineIo, RedirectionScope, StdioMode};

/// Exit code reported when the engine loop panicked.
pub const PANIC_EXIT_CODE: i32 = -1;

/// A blocking, stdio-driven engine.
///
/// The bridge calls [`initialize`](Engine::initialize) and then
/// [`run`](Engine::run) on the engine's own thread. `run` must read commands
/// from `io.input` (or the process stdin in [`StdioMode::Process`]), write
/// responses to `io.output`, and return only after its protocol's quit
/// command.
pub trait Engine: Send + 'static {
    fn name(&self) -> &str;

    fn protocol(&self) -> Protocol {
        Protocol::Uci
    }

    fn stdio_mode(&self) -> StdioMode {
        StdioMode::Private
    }

    /// One-time static setup (tables, thread pools, network weights).
    ///
    /// Runs before any redirection; an `Err` aborts the start without ever
    /// entering the loop.
    fn initialize(&mut self) -> Result<(), String> {
        Ok(())
    }

    /// The blocking command loop. Returns the engine's exit status.
    fn run(self: Box<Self>, io: EngineIo) -> i32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunnerState {
    /// Constructed; no thread yet.
    Created,
    /// Thread spawned; initializing or attaching stdio.
    Redirecting,
    /// The blocking loop is running.
    Running,
    /// The loop returned and the sentinel has been observed.
    Quit,
    /// The engine thread has been joined.
    Exited,
    /// Initialization or redirection failed; the loop never ran.
    Failed,
}

pub struct EngineRunner {
    name: String,
    protocol: Protocol,
    mode: StdioMode,
    engine: Option<Box<dyn Engine>>,
    state: RunnerState,
    handle: Option<JoinHandle<i32>>,
    exit_code: Option<i32>,
}

impl EngineRunner {
    pub fn new(engine: Box<dyn Engine>) -> Self {
        Self {
            name: engine.name().to_string(),
            protocol: engine.protocol(),
            mode: engine.stdio_mode(),
            engine: Some(engine),
            state: RunnerState::Created,
            handle: None,
            exit_code: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn stdio_mode(&self) -> StdioMode {
        self.mode
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Spawn the engine thread and wait until its loop is about to start.
    ///
    /// The engine thread initializes the engine, attaches `inside` to its
    /// streams, acknowledges, and only then enters the blocking loop. The
    /// loop itself never runs on the calling thread.
    ///
    /// # Errors
    /// - [`BridgeError::AlreadyStarted`] on a second call.
    /// - [`BridgeError::Initialization`] if the engine's setup failed.
    /// - [`BridgeError::StdioBusy`] / [`BridgeError::Redirect`] from redirection.
    /// - [`BridgeError::Timeout`] if no acknowledgement arrived in `timeout`;
    ///   the thread is left running and may still start its loop.
    #[tracing::instrument(level = "info", skip(self, inside), fields(engine = %self.name))]
    pub fn start(&mut self, inside: InsideEnds, timeout: Duration) -> BridgeResult<()> {
        let engine = self.engine.take().ok_or(BridgeError::AlreadyStarted)?;
        self.state = RunnerState::Redirecting;

        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        let mode = self.mode;
        let spawned = thread::Builder::new()
            .name(format!("engine-{}", self.name))
            .spawn(move || run_engine(engine, inside, mode, ack_tx));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("Failed to spawn engine thread: {}", e);
                self.state = RunnerState::Failed;
                return Err(BridgeError::EngineThread(e.to_string()));
            }
        };

        match ack_rx.recv_timeout(timeout) {
            Ok(Ok(())) => {
                self.state = RunnerState::Running;
                self.handle = Some(handle);
                tracing::info!("Engine started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.state = RunnerState::Failed;
                self.exit_code = handle.join().ok();
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!("Engine did not finish starting within {:?}", timeout);
                self.handle = Some(handle);
                Err(BridgeError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.state = RunnerState::Failed;
                let reason = match handle.join() {
                    Ok(_) => "engine thread exited before starting".to_string(),
                    Err(_) => "engine panicked during initialization".to_string(),
                };
                tracing::error!("{}", reason);
                Err(BridgeError::EngineThread(reason))
            }
        }
    }

    /// Record that the sentinel has been observed.
    pub(crate) fn mark_quit(&mut self) {
        if matches!(self.state, RunnerState::Redirecting | RunnerState::Running) {
            tracing::debug!("Engine {} state: {:?} -> Quit", self.name, self.state);
            self.state = RunnerState::Quit;
        }
    }

    /// Whether the engine thread has finished (or was never started).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the engine thread and return the engine's exit code.
    ///
    /// Blocks for as long as the engine loop runs; send the quit command first.
    ///
    /// # Errors
    /// [`BridgeError::NotStarted`] if there is no thread to join.
    pub fn join(&mut self) -> BridgeResult<i32> {
        let Some(handle) = self.handle.take() else {
            return self.exit_code.ok_or(BridgeError::NotStarted);
        };
        let code = handle.join().unwrap_or_else(|_| {
            tracing::error!("Engine thread {} panicked outside the engine loop", self.name);
            PANIC_EXIT_CODE
        });
        tracing::info!("Engine {} exited with code {}", self.name, code);
        self.exit_code = Some(code);
        self.state = RunnerState::Exited;
        Ok(code)
    }
}

impl Drop for EngineRunner {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            if !handle.is_finished() {
                tracing::warn!(
                    "Dropping bridge for engine {} while it is still running; its thread is detached",
                    self.name
                );
            }
        }
    }
}

fn run_engine(
    mut engine: Box<dyn Engine>,
    inside: InsideEnds,
    mode: StdioMode,
    ack: SyncSender<BridgeResult<()>>,
) -> i32 {
    let name = engine.name().to_string();

    if let Err(reason) = engine.initialize() {
        tracing::error!("Engine {} failed to initialize: {}", name, reason);
        drop(inside);
        let _ = ack.send(Err(BridgeError::Initialization {
            engine: name,
            reason,
        }));
        return PANIC_EXIT_CODE;
    }

    let (mut scope, io) = match RedirectionScope::enter(inside, mode) {
        Ok(attached) => attached,
        Err(e) => {
            tracing::error!("Engine {} could not attach stdio: {}", name, e);
            let _ = ack.send(Err(e));
            return PANIC_EXIT_CODE;
        }
    };

    let _ = ack.send(Ok(()));
    tracing::debug!("Engine {} loop starting ({:?} stdio)", name, mode);

    let exit_code = match panic::catch_unwind(AssertUnwindSafe(move || engine.run(io))) {
        Ok(code) => code,
        Err(_) => {
            tracing::error!("Engine {} panicked in its command loop", name);
            PANIC_EXIT_CODE
        }
    };
    tracing::debug!("Engine {} loop returned {}", name, exit_code);

    if let Err(e) = scope.write_sentinel() {
        tracing::error!("Engine {} failed to write sentinel: {}", name, e);
    }
    drop(scope);
    exit_code
}
