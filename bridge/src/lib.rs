//! In-process hosting for blocking, stdio-driven chess engines.
//!
//! Each engine instance gets its own [`Channel`] (two pipes) and its own
//! thread. The caller talks to the engine through a [`Bridge`]: bytes passed
//! to [`Bridge::send`] arrive on the engine's stdin, and whatever the engine
//! prints comes back from [`Bridge::recv`]. When the engine's loop returns,
//! the runner writes [`SENTINEL`] and `recv` reports the end of the stream as
//! `Ok(None)`, exactly once.

pub mod async_bridge;
pub mod bridge;
pub mod channel;
pub mod config;
pub mod error;
pub mod lines;
pub mod protocol;
pub mod redirect;
pub mod runner;
pub mod termination;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use async_bridge::AsyncBridge;
pub use bridge::Bridge;
pub use channel::{Channel, InsideEnds, OsPipes, OutsideEnds, PipeSource};
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult};
pub use lines::LineAssembler;
pub use protocol::Protocol;
pub use redirect::{process_stdio_in_use, EngineIo, RedirectionScope, StdioMode};
pub use runner::{Engine, EngineRunner, RunnerState, PANIC_EXIT_CODE};
pub use termination::{Scan, SentinelScanner, SENTINEL};
