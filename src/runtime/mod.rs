//! The capabilities the dispatcher needs from its host.
//!
//! The dispatcher never reaches for process globals directly. Everything it
//! needs from the surrounding program (installing itself as the error sink,
//! reading the last raw error, switching the working directory, unwinding
//! output buffers, stopping the process) goes through the [`Runtime`] trait.
//!
//! [`ProcessRuntime`] is the implementation for ordinary Rust processes;
//! tests drive the dispatcher with a scripted implementation instead.
//!
//! # Sinks and tokens
//!
//! A runtime has one *error sink* and one *uncaught-failure sink* at a time.
//! Installing a sink returns a [`SinkToken`] that remembers which sink was
//! installed before; handing the token back restores that sink. The only
//! introspection the dispatcher relies on is [`Runtime::active_error_sink`].

pub mod process;

use std::{
    fmt, io,
    path::Path,
    rc::Weak,
    sync::atomic::{AtomicU64, Ordering},
};

pub use self::process::{ProcessRuntime, raise};
use crate::{Failure, Origin, Severity, SeverityMask, output::OutputBuffer};

/// Identifies a sink across install and restore calls.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

impl SinkId {
    /// Allocates a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Receives notifications from a [`Runtime`].
pub trait RuntimeSink {
    /// A runtime diagnostic was raised.
    ///
    /// `Ok(())` tells the runtime the diagnostic was handled. An `Err` is
    /// the failure to raise at the site that produced the diagnostic.
    fn on_error(&self, severity: Severity, message: &str, origin: Origin) -> Result<(), Failure>;

    /// A failure was not caught by the program.
    fn on_uncaught_exception(&self, failure: Failure);

    /// The process is shutting down.
    fn on_shutdown(&self);
}

/// A sink together with its id.
#[derive(Clone)]
pub struct SinkHandle {
    id: SinkId,
    sink: Weak<dyn RuntimeSink>,
}

impl SinkHandle {
    /// Creates a handle.
    pub fn new(id: SinkId, sink: Weak<dyn RuntimeSink>) -> Self {
        Self { id, sink }
    }

    /// The sink id.
    pub fn id(&self) -> SinkId {
        self.id
    }

    /// Returns the sink if it is still alive.
    pub fn upgrade(&self) -> Option<std::rc::Rc<dyn RuntimeSink>> {
        self.sink.upgrade()
    }
}

impl fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkHandle")
            .field("id", &self.id)
            .field("alive", &(self.sink.strong_count() > 0))
            .finish()
    }
}

/// Proof of a sink installation, required to restore the previous sink.
#[must_use = "dropping the token makes it impossible to restore the previous sink"]
#[derive(Debug)]
pub struct SinkToken {
    installed: SinkId,
    previous: Option<SinkHandle>,
}

impl SinkToken {
    /// Creates a token for the installation of `installed` over `previous`.
    pub fn new(installed: SinkId, previous: Option<SinkHandle>) -> Self {
        Self {
            installed,
            previous,
        }
    }

    /// The sink this token installed.
    pub fn installed(&self) -> SinkId {
        self.installed
    }

    /// The sink that was active before.
    pub fn previous(&self) -> Option<&SinkHandle> {
        self.previous.as_ref()
    }

    /// Consumes the token, returning the previous sink.
    pub fn into_previous(self) -> Option<SinkHandle> {
        self.previous
    }
}

/// Error returned when a sink can't be restored because another sink was
/// installed on top of it in the meantime.
#[derive(Debug)]
pub struct SinkRestoreError {
    /// The sink the token belongs to.
    pub expected: SinkId,
    /// The sink that is actually installed.
    pub found: Option<SinkId>,
    /// The token that could not be applied.
    pub token: SinkToken,
}

impl fmt::Display for SinkRestoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.found {
            Some(found) => write!(
                f,
                "cannot restore sink: {:?} is installed instead of {:?}",
                found, self.expected
            ),
            None => write!(f, "cannot restore sink: {:?} is no longer installed", self.expected),
        }
    }
}

impl std::error::Error for SinkRestoreError {}

/// A raw runtime error as recorded by the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawError {
    /// The severity.
    pub severity: Severity,
    /// The message.
    pub message: String,
    /// Where it was raised.
    pub origin: Origin,
}

/// Why a failure reached the uncaught path.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Termination {
    /// A failure nobody caught.
    UncaughtException,
    /// A fatal error detected at shutdown.
    FatalError,
    /// A fatal error classified as memory exhaustion.
    OutOfMemory,
}

/// The host capability set used by the dispatcher.
pub trait Runtime {
    /// Installs the error sink.
    fn install_error_sink(&self, sink: SinkHandle) -> SinkToken;

    /// Restores the error sink that was active before `token` was issued.
    fn restore_error_sink(&self, token: SinkToken) -> Result<(), SinkRestoreError>;

    /// Installs the uncaught-failure sink.
    fn install_exception_sink(&self, sink: SinkHandle) -> SinkToken;

    /// Restores the uncaught-failure sink that was active before `token` was
    /// issued.
    fn restore_exception_sink(&self, token: SinkToken) -> Result<(), SinkRestoreError>;

    /// Adds a sink to notify at shutdown. Shutdown sinks can't be removed.
    fn register_shutdown_sink(&self, sink: SinkHandle);

    /// The id of the currently installed error sink.
    fn active_error_sink(&self) -> Option<SinkId>;

    /// The most recent raw error the host recorded.
    fn last_error(&self) -> Option<RawError>;

    /// Whether the host prints errors itself.
    fn display_errors(&self) -> bool;

    /// Sets whether the host prints errors itself, returning the previous
    /// setting.
    fn set_display_errors(&self, enabled: bool) -> bool;

    /// The severities currently reported.
    fn error_reporting(&self) -> SeverityMask;

    /// Frees whatever memory the host can spare.
    fn collect_garbage(&self);

    /// Whether the process is a command line program rather than serving a
    /// web request.
    fn is_cli(&self) -> bool;

    /// Replaces the response status line. Returns `false` if output was
    /// already sent.
    fn replace_status_line(&self, line: &str) -> bool;

    /// Changes the working directory.
    fn set_working_directory(&self, path: &Path) -> io::Result<()>;

    /// The output buffer stack.
    fn output(&self) -> &OutputBuffer;

    /// Writes directly to standard output, bypassing output buffers.
    fn write_stdout(&self, text: &str);

    /// Stops the process with `status`.
    fn terminate(&self, status: u8);
}
