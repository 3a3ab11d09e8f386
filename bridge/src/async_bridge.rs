//! Tokio facade over a started [`Bridge`](crate::Bridge).
//!
//! The engine thread is the same blocking thread as for the synchronous
//! bridge; only the caller's ends of the channel move onto the reactor.

use std::fs::File;
use std::io;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::pipe;

use crate::error::{BridgeError, BridgeResult};
use crate::protocol::Protocol;
use crate::runner::{EngineRunner, RunnerState};
use crate::termination::{Absorbed, TerminationTracker};

pub struct AsyncBridge {
    runner: EngineRunner,
    reader: pipe::Receiver,
    writer: pipe::Sender,
    scratch: Box<[u8]>,
    tracker: TerminationTracker,
}

impl AsyncBridge {
    /// # Panics
    /// Outside a tokio runtime, like every tokio I/O resource.
    pub(crate) fn from_parts(
        runner: EngineRunner,
        reader: File,
        writer: File,
        scratch: Box<[u8]>,
        tracker: TerminationTracker,
    ) -> BridgeResult<Self> {
        let reader = pipe::Receiver::from_file(reader).map_err(BridgeError::Io)?;
        let writer = pipe::Sender::from_file(writer).map_err(BridgeError::Io)?;
        tracing::debug!("Bridge for engine {} moved onto the tokio reactor", runner.name());
        Ok(Self {
            runner,
            reader,
            writer,
            scratch,
            tracker,
        })
    }

    pub fn name(&self) -> &str {
        self.runner.name()
    }

    pub fn protocol(&self) -> Protocol {
        self.runner.protocol()
    }

    pub fn state(&self) -> RunnerState {
        self.runner.state()
    }

    pub fn is_terminated(&self) -> bool {
        self.tracker.sentinel_observed()
    }

    /// Write `bytes` to the engine's stdin.
    pub async fn send(&mut self, bytes: &[u8]) -> BridgeResult<usize> {
        if !self.tracker.is_open() {
            return Err(BridgeError::BrokenPipe);
        }
        tracing::trace!("UCI >> {}", String::from_utf8_lossy(bytes).trim_end());
        self.writer
            .write_all(bytes)
            .await
            .map_err(BridgeError::from_pipe_io)?;
        Ok(bytes.len())
    }

    pub async fn send_command(&mut self, command: &str) -> BridgeResult<usize> {
        if command.ends_with('\n') {
            self.send(command.as_bytes()).await
        } else {
            self.send(format!("{command}\n").as_bytes()).await
        }
    }

    /// Next fragment of engine output; `None` exactly once at the end.
    ///
    /// Cancel safe: every await point is reached with nothing taken from the
    /// pipe but held in the tracker, so dropping the future loses nothing.
    pub async fn recv(&mut self) -> BridgeResult<Option<Vec<u8>>> {
        if let Some(result) = self.tracker.begin() {
            return self.finish_recv(result);
        }

        let mut n = self.read_some().await?;
        let mut output = Vec::new();
        loop {
            match self.tracker.absorb(&mut output, &self.scratch[..n]) {
                Absorbed::Done(result) => return self.finish_recv(result),
                // `output` is empty here and the held sentinel lives in the tracker.
                Absorbed::AwaitingEof => n = self.read_some().await?,
                Absorbed::Holding => loop {
                    match self.reader.try_read(&mut self.scratch) {
                        Ok(more) => {
                            n = more;
                            break;
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            let result = self.tracker.release_into(&mut output);
                            return self.finish_recv(result);
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(BridgeError::from_pipe_io(e)),
                    }
                },
            }
        }
    }

    /// [`recv`](Self::recv) bounded by `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> BridgeResult<Option<Vec<u8>>> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| BridgeError::Timeout(timeout))?
    }

    async fn read_some(&mut self) -> BridgeResult<usize> {
        loop {
            match self.reader.read(&mut self.scratch).await {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(BridgeError::from_pipe_io(e)),
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

    /// Wait for the engine thread on the blocking pool.
    pub async fn join(self) -> BridgeResult<i32> {
        let mut runner = self.runner;
        tokio::task::spawn_blocking(move || runner.join())
            .await
            .map_err(|e| BridgeError::EngineThread(e.to_string()))?
    }

    /// Send quit, drain until the sentinel, and join, all within `timeout`.
    #[tracing::instrument(level = "info", skip(self), fields(engine = %self.name()))]
    pub async fn shutdown(mut self, timeout: Duration) -> BridgeResult<i32> {
        let deadline = Instant::now() + timeout;
        let quit = self.protocol().quit_command();

        let drained = tokio::time::timeout(timeout, async {
            if self.tracker.is_open() {
                tracing::info!("Sending quit command to engine");
                match self.send_command(quit).await {
                    Ok(_) | Err(BridgeError::BrokenPipe) => {}
                    Err(e) => return Err(e),
                }
            }
            while !self.tracker.is_finished() {
                match self.recv().await {
                    Ok(Some(_)) => {}
                    Ok(None) | Err(BridgeError::BrokenPipe) => break,
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        })
        .await;
        drained.map_err(|_| BridgeError::Timeout(timeout))??;

        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::time::timeout(remaining, self.join())
            .await
            .map_err(|_| BridgeError::Timeout(timeout))?
    }
}
