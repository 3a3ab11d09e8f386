//! Adapter for engines linked in through a C ABI.
//!
//! A vendored engine exports its program entry point as
//! `int multiengine_<variant>_main(int argc, char **argv)`, which prints the
//! engine banner, runs the UCI loop on descriptors 0 and 1, and returns after
//! `quit`. An optional `int multiengine_<variant>_init(void)` performs static
//! setup and returns 0 on success.

use std::ffi::{c_char, c_int, CString};

use engine_bridge::{Engine, EngineIo, Protocol, StdioMode};

use crate::variant::EngineVariant;

/// `int main(int argc, char **argv)`
pub type MainFn = unsafe extern "C" fn(c_int, *mut *mut c_char) -> c_int;
/// `int init(void)`, 0 on success
pub type InitFn = unsafe extern "C" fn() -> c_int;

pub struct ForeignEngine {
    variant: EngineVariant,
    main: MainFn,
    init: Option<InitFn>,
}

impl ForeignEngine {
    /// # Safety
    ///
    /// `main` must behave like a program entry point that reads commands from
    /// descriptor 0, writes responses to descriptor 1, and returns after its
    /// quit command. It may be called from any thread, but never concurrently
    /// with itself. `init`, if given, must be callable from any thread.
    pub unsafe fn new(variant: EngineVariant, main: MainFn, init: Option<InitFn>) -> Self {
        Self {
            variant,
            main,
            init,
        }
    }

    pub fn variant(&self) -> EngineVariant {
        self.variant
    }
}

impl Engine for ForeignEngine {
    fn name(&self) -> &str {
        self.variant.name()
    }

    fn protocol(&self) -> Protocol {
        self.variant.protocol()
    }

    fn stdio_mode(&self) -> StdioMode {
        StdioMode::Process
    }

    fn initialize(&mut self) -> Result<(), String> {
        let Some(init) = self.init else {
            return Ok(());
        };
        // SAFETY: guaranteed callable by the contract of `ForeignEngine::new`.
        let status = unsafe { init() };
        if status == 0 {
            Ok(())
        } else {
            Err(format!("init returned {status}"))
        }
    }

    fn run(self: Box<Self>, io: EngineIo) -> i32 {
        // The foreign loop reads and writes the raw descriptors.
        drop(io);

        let program = CString::default();
        let mut argv = [program.as_ptr().cast_mut(), std::ptr::null_mut()];
        tracing::debug!("Entering foreign main for {}", self.variant);
        // SAFETY: argv holds one valid NUL-terminated string followed by a null
        // pointer and outlives the call; `main` upholds the contract of `new`.
        let code = unsafe { (self.main)(1, argv.as_mut_ptr()) };

        // Output still sitting in C stdio buffers must precede the sentinel.
        // SAFETY: fflush(NULL) flushes every open output stream.
        unsafe { libc::fflush(std::ptr::null_mut()) };
        code
    }
}

/// Declares the C ABI symbols of one vendored variant and a constructor for it.
macro_rules! linked_variant {
    ($feature:literal, $module:ident, $variant:expr, $init:ident, $main:ident) => {
        #[cfg(feature = $feature)]
        pub(crate) mod $module {
            use std::ffi::{c_char, c_int};

            use engine_bridge::Engine;

            use super::ForeignEngine;
            use crate::variant::EngineVariant;

            extern "C" {
                fn $init() -> c_int;
                fn $main(argc: c_int, argv: *mut *mut c_char) -> c_int;
            }

            pub(crate) fn engine() -> Box<dyn Engine> {
                // SAFETY: the linked library exports a program-style entry point
                // for this variant, as required by the feature.
                Box::new(unsafe { ForeignEngine::new($variant, $main, Some($init)) })
            }
        }
    };
}

linked_variant!(
    "hce",
    hce,
    EngineVariant::Classical,
    multiengine_hce_init,
    multiengine_hce_main
);
linked_variant!(
    "nnue",
    nnue,
    EngineVariant::Nnue,
    multiengine_nnue_init,
    multiengine_nnue_main
);
linked_variant!(
    "fairy",
    fairy,
    EngineVariant::Fairy,
    multiengine_fairy_init,
    multiengine_fairy_main
);
linked_variant!(
    "sf16",
    sf16,
    EngineVariant::Sf16,
    multiengine_sf16_init,
    multiengine_sf16_main
);
