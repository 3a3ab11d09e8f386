//! Attaching an engine's standard streams to the inside ends of a channel.
//!
//! Two modes exist because two kinds of engine exist:
//!
//! - [`StdioMode::Private`] hands the inside ends straight to the engine as
//!   its [`EngineIo`]. Nothing process-wide changes, so any number of
//!   private-mode engines can run side by side.
//! - [`StdioMode::Process`] is for vendored code that reads descriptor 0 and
//!   writes descriptor 1 directly. The inside ends are duplicated onto those
//!   slots for the duration of the run. Descriptors 0 and 1 belong to the
//!   whole process, so only one process-mode scope can be live at a time;
//!   while it is, anything in the process that writes to stdout (including a
//!   stdout logger) writes into the engine's channel.

use std::fs::File;
use std::io::{self, BufRead, BufReader, LineWriter, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::channel::InsideEnds;
use crate::error::{BridgeError, BridgeResult};
use crate::termination::SENTINEL;

/// Set while a process-mode scope owns descriptors 0 and 1.
static PROCESS_STDIO_TAKEN: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StdioMode {
    /// The engine reads and writes the handles in its [`EngineIo`].
    #[default]
    Private,
    /// The engine reads and writes the process's standard descriptors.
    Process,
}

/// The streams an engine's blocking loop talks through.
///
/// In process mode these are the process's stdin and stdout, so engines that
/// bypass `EngineIo` and use the standard streams directly see the same bytes.
pub struct EngineIo {
    pub input: Box<dyn BufRead>,
    pub output: Box<dyn Write>,
}

impl EngineIo {
    pub fn new(input: impl BufRead + 'static, output: impl Write + 'static) -> Self {
        Self {
            input: Box::new(input),
            output: Box::new(output),
        }
    }
}

/// Holds the engine's streams attached to a channel until dropped.
///
/// The runner writes the sentinel through [`write_sentinel`](Self::write_sentinel)
/// after the engine loop returns, then drops the scope. Dropping closes the
/// last inside write end, and in process mode restores descriptors 0 and 1.
pub struct RedirectionScope {
    target: Target,
}

enum Target {
    Private { sentinel_out: File },
    Process(ProcessRedirect),
}

impl RedirectionScope {
    /// Attach `inside` according to `mode` and return the engine's streams.
    ///
    /// The inside descriptors are closed once they have been
    /// duplicated, in both modes.
    ///
    /// # Errors
    /// Returns [`BridgeError::StdioBusy`] if another process-mode scope is
    /// live, and [`BridgeError::Redirect`] if a descriptor cannot be duplicated.
    pub fn enter(inside: InsideEnds, mode: StdioMode) -> BridgeResult<(Self, EngineIo)> {
        match mode {
            StdioMode::Private => {
                let InsideEnds { read, write } = inside;
                let sentinel_out = File::from(write.try_clone().map_err(BridgeError::Redirect)?);
                let io = EngineIo::new(
                    BufReader::new(File::from(read)),
                    LineWriter::new(File::from(write)),
                );
                tracing::debug!("Engine streams attached to private channel ends");
                Ok((
                    Self {
                        target: Target::Private { sentinel_out },
                    },
                    io,
                ))
            }
            StdioMode::Process => {
                let redirect = ProcessRedirect::enter(inside)?;
                let io = EngineIo::new(BufReader::new(StdinFd), io::stdout());
                tracing::debug!("Process stdin/stdout redirected to channel");
                Ok((
                    Self {
                        target: Target::Process(redirect),
                    },
                    io,
                ))
            }
        }
    }

    pub fn mode(&self) -> StdioMode {
        match self.target {
            Target::Private { .. } => StdioMode::Private,
            Target::Process(_) => StdioMode::Process,
        }
    }

    /// Write the end-of-output sentinel after any output the engine left buffered.
    pub fn write_sentinel(&mut self) -> io::Result<()> {
        match &mut self.target {
            Target::Private { sentinel_out } => {
                sentinel_out.write_all(SENTINEL)?;
                sentinel_out.flush()
            }
            Target::Process(_) => {
                let mut stdout = io::stdout().lock();
                stdout.flush()?;
                stdout.write_all(SENTINEL)?;
                stdout.flush()
            }
        }
    }
}

/// Unbuffered reads from descriptor 0.
///
/// Each process-mode scope wraps this in its own `BufReader`, so input read
/// ahead during one run is dropped with that run instead of sitting in the
/// process-wide `Stdin` buffer.
struct StdinFd;

impl Read for StdinFd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
        let n = unsafe { libc::read(libc::STDIN_FILENO, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

/// Whether a process-mode scope currently owns descriptors 0 and 1.
pub fn process_stdio_in_use() -> bool {
    PROCESS_STDIO_TAKEN.load(Ordering::Acquire)
}

struct StdioClaim;

impl StdioClaim {
    fn acquire() -> BridgeResult<Self> {
        PROCESS_STDIO_TAKEN
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self)
            .map_err(|_| BridgeError::StdioBusy)
    }
}

impl Drop for StdioClaim {
    fn drop(&mut self) {
        PROCESS_STDIO_TAKEN.store(false, Ordering::Release);
    }
}

struct ProcessRedirect {
    saved_stdin: Option<OwnedFd>,
    saved_stdout: Option<OwnedFd>,
    // Declared last so the claim is released after Drop has restored 0 and 1.
    _claim: StdioClaim,
}

impl ProcessRedirect {
    fn enter(inside: InsideEnds) -> BridgeResult<Self> {
        let claim = StdioClaim::acquire()?;

        // Host output still sitting in the stdout buffer belongs on the host's stdout.
        let _ = io::stdout().flush();

        let saved_stdin = save_descriptor(libc::STDIN_FILENO).map_err(BridgeError::Redirect)?;
        let saved_stdout = save_descriptor(libc::STDOUT_FILENO).map_err(BridgeError::Redirect)?;

        // Constructed before the dup2 calls so a failure halfway restores what was changed.
        let redirect = Self {
            saved_stdin,
            saved_stdout,
            _claim: claim,
        };

        duplicate_onto(inside.read.as_raw_fd(), libc::STDIN_FILENO).map_err(BridgeError::Redirect)?;
        duplicate_onto(inside.write.as_raw_fd(), libc::STDOUT_FILENO)
            .map_err(BridgeError::Redirect)?;

        // The inside ends now live on in descriptors 0 and 1.
        drop(inside);
        Ok(redirect)
    }
}

impl Drop for ProcessRedirect {
    fn drop(&mut self) {
        let _ = io::stdout().flush();
        restore(self.saved_stdin.take(), libc::STDIN_FILENO);
        restore(self.saved_stdout.take(), libc::STDOUT_FILENO);
        tracing::debug!("Process stdin/stdout restored");
    }
}

/// Duplicate `fd` to a close-on-exec descriptor. `None` if `fd` was not open.
fn save_descriptor(fd: RawFd) -> io::Result<Option<OwnedFd>> {
    // SAFETY: F_DUPFD_CLOEXEC creates a new descriptor and does not affect `fd`.
    let raw = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, libc::STDERR_FILENO + 1) };
    if raw < 0 {
        let err = io::Error::last_os_error();
        return if err.raw_os_error() == Some(libc::EBADF) {
            Ok(None)
        } else {
            Err(err)
        };
    }
    // SAFETY: fcntl returned a fresh descriptor that nothing else owns.
    Ok(Some(unsafe { OwnedFd::from_raw_fd(raw) }))
}

fn duplicate_onto(fd: RawFd, target: RawFd) -> io::Result<()> {
    loop {
        // SAFETY: dup2 atomically replaces `target`; both are plain descriptor numbers.
        if unsafe { libc::dup2(fd, target) } >= 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

fn restore(saved: Option<OwnedFd>, target: RawFd) {
    let result = match saved {
        Some(saved) => duplicate_onto(saved.as_raw_fd(), target),
        None => {
            // It was closed before the redirect; close it again.
            // SAFETY: `target` is one of the standard slots this scope took over.
            unsafe { libc::close(target) };
            Ok(())
        }
    };
    if let Err(e) = result {
        tracing::error!("Failed to restore descriptor {}: {}", target, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use std::io::Read;

    #[test]
    fn test_private_scope_wires_engine_io_to_channel() {
        let (inside, outside) = Channel::create().unwrap().split();
        let (mut outside_read, mut outside_write) = outside.into_files();

        let (mut scope, mut io) = RedirectionScope::enter(inside, StdioMode::Private).unwrap();
        assert_eq!(scope.mode(), StdioMode::Private);

        outside_write.write_all(b"isready\n").unwrap();
        let mut line = String::new();
        io.input.read_line(&mut line).unwrap();
        assert_eq!(line, "isready\n");

        writeln!(io.output, "readyok").unwrap();
        drop(io);
        scope.write_sentinel().unwrap();
        drop(scope);

        let mut out = Vec::new();
        outside_read.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"readyok\nquitok\n");
    }

    #[test]
    fn test_claim_is_exclusive() {
        // Never touches descriptors 0/1; only the claim bookkeeping.
        let first = StdioClaim::acquire().unwrap();
        assert!(process_stdio_in_use());
        assert!(matches!(StdioClaim::acquire(), Err(BridgeError::StdioBusy)));
        drop(first);
        assert!(!process_stdio_in_use());
        drop(StdioClaim::acquire().unwrap());
    }
}
