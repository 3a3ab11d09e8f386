//! Sentinel-based end-of-output detection.
//!
//! The engine's blocking loop returns when it receives its protocol's quit
//! command, and the runner then writes [`SENTINEL`] exactly once to the
//! engine's output and closes its last write end. The caller treats the
//! sentinel as "no further bytes will ever arrive on this channel". Pipes have
//! no message boundaries, so the sentinel may share a read with ordinary
//! output or straddle two reads. An engine may also print the same bytes as
//! the tail of an ordinary line, so a trailing sentinel only ends the stream
//! once end-of-file follows it. [`SentinelScanner`] handles all three.

use crate::error::{BridgeError, BridgeResult};

/// Reserved marker written after the engine loop returns.
pub const SENTINEL: &[u8] = b"quitok\n";

/// Outcome of end-of-file on a [`SentinelScanner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scan {
    /// Held bytes that turned out to be ordinary output.
    pub output: Vec<u8>,
    /// The stream ended with the sentinel.
    pub terminated: bool,
}

#[derive(Debug, Default)]
pub struct SentinelScanner {
    held: Vec<u8>,
    complete: bool,
}

impl SentinelScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the bytes of one read and return those safe to deliver.
    ///
    /// A trailing prefix of the sentinel (e.g. `quit`), or the whole
    /// sentinel, is held back rather than returned. Held bytes are prepended
    /// to the next read, so a sentinel split across reads is still
    /// recognised and one followed by more output is delivered as output.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut data = std::mem::take(&mut self.held);
        data.extend_from_slice(chunk);
        let keep = sentinel_suffix_len(&data);
        self.held = data.split_off(data.len() - keep);
        data
    }

    /// Whether any sentinel bytes are currently held back.
    pub fn is_holding(&self) -> bool {
        !self.held.is_empty()
    }

    /// Whether the whole sentinel is held; it is the real one if end-of-file follows.
    pub fn awaiting_eof(&self) -> bool {
        self.held == SENTINEL
    }

    /// Take a held sentinel prefix; it turned out to be ordinary output.
    ///
    /// A held complete sentinel stays until the next read or end-of-file.
    pub fn release(&mut self) -> Vec<u8> {
        if self.awaiting_eof() {
            return Vec::new();
        }
        std::mem::take(&mut self.held)
    }

    /// End-of-file: decide whether the stream ended with the sentinel.
    pub fn finish(&mut self) -> Scan {
        if self.awaiting_eof() {
            self.held.clear();
            self.complete = true;
            return Scan {
                output: Vec::new(),
                terminated: true,
            };
        }
        Scan {
            output: std::mem::take(&mut self.held),
            terminated: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    /// The sentinel arrived together with output; that output is being returned.
    SentinelSeen,
    /// The terminal `None` (or an end-of-file error) has been returned.
    Finished,
}

/// What a receive loop should do after absorbing one read.
#[derive(Debug)]
pub(crate) enum Absorbed {
    Done(BridgeResult<Option<Vec<u8>>>),
    /// A possible sentinel prefix is held back. Read again if more input is
    /// already pending, otherwise call [`TerminationTracker::release_into`].
    Holding,
    /// Only a complete sentinel is held and nothing else is ready to return.
    /// Block on the next read: end-of-file confirms it, more bytes disprove it.
    AwaitingEof,
}

/// Receive-side bookkeeping shared by the blocking and async bridges.
///
/// Guarantees that exactly one `Ok(None)` is produced per channel, that it is
/// produced only after the sentinel and end-of-file, and that nothing but
/// errors follows it.
#[derive(Debug)]
pub(crate) struct TerminationTracker {
    scanner: SentinelScanner,
    phase: Phase,
}

impl TerminationTracker {
    pub(crate) fn new() -> Self {
        Self {
            scanner: SentinelScanner::new(),
            phase: Phase::Open,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.phase == Phase::Open
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    /// Whether the sentinel has been confirmed (the engine loop has returned).
    pub(crate) fn sentinel_observed(&self) -> bool {
        self.scanner.is_complete()
    }

    /// Answer a receive call without reading, if the stream is already past its end.
    pub(crate) fn begin(&mut self) -> Option<BridgeResult<Option<Vec<u8>>>> {
        match self.phase {
            Phase::Open => None,
            Phase::SentinelSeen => {
                self.phase = Phase::Finished;
                Some(Ok(None))
            }
            Phase::Finished => Some(Err(BridgeError::BrokenPipe)),
        }
    }

    /// Absorb one read into `output`. An empty `chunk` means end-of-file.
    pub(crate) fn absorb(&mut self, output: &mut Vec<u8>, chunk: &[u8]) -> Absorbed {
        if chunk.is_empty() {
            let scan = self.scanner.finish();
            output.extend(scan.output);
            if scan.terminated {
                tracing::debug!("Sentinel received");
                return Absorbed::Done(if output.is_empty() {
                    self.phase = Phase::Finished;
                    Ok(None)
                } else {
                    self.phase = Phase::SentinelSeen;
                    Ok(Some(std::mem::take(output)))
                });
            }

            self.phase = Phase::Finished;
            tracing::warn!("Engine output closed without sentinel");
            return Absorbed::Done(if output.is_empty() {
                Err(BridgeError::BrokenPipe)
            } else {
                Ok(Some(std::mem::take(output)))
            });
        }

        output.extend(self.scanner.feed(chunk));

        if self.scanner.awaiting_eof() {
            if output.is_empty() {
                return Absorbed::AwaitingEof;
            }
            return Absorbed::Done(Ok(Some(std::mem::take(output))));
        }
        if self.scanner.is_holding() {
            return Absorbed::Holding;
        }
        Absorbed::Done(Ok(Some(std::mem::take(output))))
    }

    /// Nothing more is pending: the held prefix was ordinary output.
    pub(crate) fn release_into(&mut self, output: &mut Vec<u8>) -> BridgeResult<Option<Vec<u8>>> {
        output.extend(self.scanner.release());
        Ok(Some(std::mem::take(output)))
    }
}

/// Length of the longest sentinel prefix, up to the whole sentinel, that `data` ends with.
fn sentinel_suffix_len(data: &[u8]) -> usize {
    (1..=SENTINEL.len())
        .rev()
        .find(|&k| data.ends_with(&SENTINEL[..k]))
        .unwrap_or(0)
}
