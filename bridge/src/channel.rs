//! The private pipe pair connecting one engine to its caller.
//!
//! A [`Channel`] is two unidirectional OS pipes:
//!
//! ```text
//!   caller                                   engine
//!   outside write ──── outside→inside ────▶ inside read  (engine stdin)
//!   outside read  ◀─── inside→outside ───── inside write (engine stdout)
//! ```
//!
//! No buffering or framing happens here. Every end is an [`OwnedFd`], so each
//! descriptor has exactly one owner and is closed when that owner drops it.

use std::fs::File;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use crate::error::{BridgeError, BridgeResult};

/// Creates OS pipes for a [`Channel`].
///
/// The default is [`OsPipes`]; tests substitute a source that fails to
/// exercise the descriptor-exhaustion path.
pub trait PipeSource {
    /// Returns `(read_end, write_end)` of a fresh pipe.
    fn pipe(&self) -> io::Result<(OwnedFd, OwnedFd)>;
}

/// Pipes created with `pipe(2)`, both ends marked close-on-exec.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsPipes;

impl PipeSource for OsPipes {
    fn pipe(&self) -> io::Result<(OwnedFd, OwnedFd)> {
        let mut fds: [libc::c_int; 2] = [-1; 2];
        // SAFETY: `fds` is a writable array of exactly two c_ints, as pipe(2) requires.
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: pipe(2) succeeded, so both descriptors are open and nothing else owns them.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        Ok((above_stdio(read)?, above_stdio(write)?))
    }
}

/// Move `fd` off descriptors 0-2 if needed and mark it close-on-exec.
///
/// A host started with a closed stdin or stdout would otherwise get a channel
/// end in a standard slot, which process-mode redirection then overwrites.
fn above_stdio(fd: OwnedFd) -> io::Result<OwnedFd> {
    if fd.as_raw_fd() > libc::STDERR_FILENO {
        set_cloexec(fd.as_fd())?;
        return Ok(fd);
    }
    // SAFETY: F_DUPFD_CLOEXEC duplicates an open descriptor onto the lowest free slot >= 3.
    let raw = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_DUPFD_CLOEXEC, libc::STDERR_FILENO + 1) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fcntl returned a fresh descriptor that nothing else owns. `fd` closes on return.
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

fn set_cloexec(fd: BorrowedFd<'_>) -> io::Result<()> {
    // SAFETY: F_GETFD/F_SETFD only touch the descriptor flags of an open descriptor.
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Engine-facing ends: what becomes the engine's stdin and stdout.
#[derive(Debug)]
pub struct InsideEnds {
    pub read: OwnedFd,
    pub write: OwnedFd,
}

/// Caller-facing ends, kept by the [`Bridge`](crate::Bridge).
#[derive(Debug)]
pub struct OutsideEnds {
    pub read: OwnedFd,
    pub write: OwnedFd,
}

impl OutsideEnds {
    pub(crate) fn into_files(self) -> (File, File) {
        (File::from(self.read), File::from(self.write))
    }
}

#[derive(Debug)]
pub struct Channel {
    inside: InsideEnds,
    outside: OutsideEnds,
}

impl Channel {
    /// Create a channel from two OS pipes.
    ///
    /// # Errors
    /// Returns [`BridgeError::ResourceExhausted`] if either pipe cannot be created.
    pub fn create() -> BridgeResult<Self> {
        Self::create_with(&OsPipes)
    }

    /// Create a channel from pipes supplied by `source`.
    ///
    /// If the second pipe fails, the first pipe's descriptors are closed before
    /// the error is returned.
    ///
    /// # Errors
    /// Returns [`BridgeError::ResourceExhausted`] if either pipe cannot be created.
    pub fn create_with(source: &dyn PipeSource) -> BridgeResult<Self> {
        let (inside_read, outside_write) = source.pipe().map_err(|e| {
            tracing::error!("Failed to create outside->inside pipe: {}", e);
            BridgeError::ResourceExhausted(e)
        })?;
        let (outside_read, inside_write) = source.pipe().map_err(|e| {
            tracing::error!("Failed to create inside->outside pipe: {}", e);
            BridgeError::ResourceExhausted(e)
        })?;

        tracing::trace!(
            "Channel created: inside r={} w={}, outside r={} w={}",
            inside_read.as_raw_fd(),
            inside_write.as_raw_fd(),
            outside_read.as_raw_fd(),
            outside_write.as_raw_fd()
        );

        Ok(Self {
            inside: InsideEnds {
                read: inside_read,
                write: inside_write,
            },
            outside: OutsideEnds {
                read: outside_read,
                write: outside_write,
            },
        })
    }

    pub fn inside_read_end(&self) -> BorrowedFd<'_> {
        self.inside.read.as_fd()
    }

    pub fn inside_write_end(&self) -> BorrowedFd<'_> {
        self.inside.write.as_fd()
    }

    pub fn outside_read_end(&self) -> BorrowedFd<'_> {
        self.outside.read.as_fd()
    }

    pub fn outside_write_end(&self) -> BorrowedFd<'_> {
        self.outside.write.as_fd()
    }

    /// Hand the inside ends to the engine side and the outside ends to the caller.
    pub fn split(self) -> (InsideEnds, OutsideEnds) {
        (self.inside, self.outside)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::io::{Read, Write};

    /// Hands out one real pipe, then fails like a process at its descriptor limit.
    struct ExhaustedAfterOne {
        calls: Cell<usize>,
        first_write_clone: RefCell<Option<File>>,
    }

    impl PipeSource for ExhaustedAfterOne {
        fn pipe(&self) -> io::Result<(OwnedFd, OwnedFd)> {
            let call = self.calls.get();
            self.calls.set(call + 1);
            if call > 0 {
                return Err(io::Error::from_raw_os_error(libc::EMFILE));
            }
            let (read, write) = OsPipes.pipe()?;
            let clone = File::from(write.try_clone()?);
            *self.first_write_clone.borrow_mut() = Some(clone);
            Ok((read, write))
        }
    }

    #[test]
    fn test_bytes_flow_outside_to_inside() {
        let (inside, outside) = Channel::create().unwrap().split();
        let (_outside_read, mut outside_write) = outside.into_files();
        let mut inside_read = File::from(inside.read);

        outside_write.write_all(b"uci\n").unwrap();
        let mut buf = [0u8; 4];
        inside_read.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"uci\n");
    }

    #[test]
    fn test_bytes_flow_inside_to_outside() {
        let (inside, outside) = Channel::create().unwrap().split();
        let (mut outside_read, _outside_write) = outside.into_files();
        let mut inside_write = File::from(inside.write);

        inside_write.write_all(b"uciok\n").unwrap();
        drop(inside_write);

        let mut out = String::new();
        outside_read.read_to_string(&mut out).unwrap();
        assert_eq!(out, "uciok\n");
    }

    #[test]
    fn test_descriptors_are_distinct_and_above_stdio() {
        let channel = Channel::create().unwrap();
        let fds = [
            channel.inside_read_end().as_raw_fd(),
            channel.inside_write_end().as_raw_fd(),
            channel.outside_read_end().as_raw_fd(),
            channel.outside_write_end().as_raw_fd(),
        ];
        for (i, a) in fds.iter().enumerate() {
            assert!(*a > libc::STDERR_FILENO);
            for b in &fds[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_pipes_are_close_on_exec() {
        let channel = Channel::create().unwrap();
        // SAFETY: F_GETFD on a descriptor owned by `channel`.
        let flags = unsafe { libc::fcntl(channel.outside_write_end().as_raw_fd(), libc::F_GETFD) };
        assert!(flags & libc::FD_CLOEXEC != 0);
    }

    #[test]
    fn test_exhaustion_reports_resource_error_without_leaking() {
        let source = ExhaustedAfterOne {
            calls: Cell::new(0),
            first_write_clone: RefCell::new(None),
        };

        let result = Channel::create_with(&source);
        assert!(matches!(result, Err(BridgeError::ResourceExhausted(_))));

        // The first pipe's read end must already be closed: writing now fails.
        let mut write_clone = source.first_write_clone.borrow_mut().take().unwrap();
        let err = write_clone.write_all(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_first_pipe_failure_is_resource_error() {
        struct AlwaysFails;
        impl PipeSource for AlwaysFails {
            fn pipe(&self) -> io::Result<(OwnedFd, OwnedFd)> {
                Err(io::Error::from_raw_os_error(libc::ENFILE))
            }
        }

        let result = Channel::create_with(&AlwaysFails);
        assert!(matches!(result, Err(BridgeError::ResourceExhausted(_))));
    }
}
