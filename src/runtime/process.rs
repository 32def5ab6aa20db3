//! The [`Runtime`] of an ordinary Rust process.
//!
//! Rust has no global error callback, so [`ProcessRuntime`] supplies one:
//! code reports diagnostics through [`raise`], unrecoverable conditions
//! through [`fatal`], and runs its body through [`ProcessRuntime::run`],
//! which turns returned failures and panics into uncaught failures and runs
//! the shutdown sinks when the body finishes.
//!
//! Sinks are installed per thread. Each thread has its own runtime state,
//! which makes a thread the isolation boundary for dispatchers.
//!
//! ```no_run
//! use crashguard::{Dispatcher, Failure, Severity, runtime::{self, ProcessRuntime}};
//!
//! fn main() -> std::process::ExitCode {
//!     let dispatcher = Dispatcher::new(ProcessRuntime::current());
//!     dispatcher.register();
//!
//!     ProcessRuntime::current().run(|| {
//!         runtime::raise(Severity::Deprecated, "the v1 config format is deprecated")?;
//!         Err(Failure::msg("nothing to do"))
//!     })
//! }
//! ```

use std::{
    cell::{Cell, RefCell},
    io::{self, Write},
    path::Path,
    process::ExitCode,
    rc::Rc,
};

use super::{RawError, Runtime, SinkHandle, SinkId, SinkRestoreError, SinkToken};
use crate::{EXIT_STATUS, Failure, Origin, Severity, SeverityMask, format::ChainFormat, output::OutputBuffer};

/// Whether the process is a command line program or serves a web request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum ExecutionContext {
    /// A command line program.
    #[default]
    Cli,
    /// A program producing a web response on standard output.
    Web,
}

struct State {
    error_sink: RefCell<Option<SinkHandle>>,
    exception_sink: RefCell<Option<SinkHandle>>,
    shutdown_sinks: RefCell<Vec<SinkHandle>>,
    last_error: RefCell<Option<RawError>>,
    display_errors: Cell<bool>,
    reporting: Cell<SeverityMask>,
    context: Cell<ExecutionContext>,
    status_line: RefCell<Option<String>>,
    memory_pressure: RefCell<Vec<Rc<dyn Fn()>>>,
    output: OutputBuffer,
}

impl State {
    fn new() -> Self {
        Self {
            error_sink: RefCell::new(None),
            exception_sink: RefCell::new(None),
            shutdown_sinks: RefCell::new(Vec::new()),
            last_error: RefCell::new(None),
            display_errors: Cell::new(true),
            reporting: Cell::new(SeverityMask::ALL),
            context: Cell::new(ExecutionContext::Cli),
            status_line: RefCell::new(None),
            memory_pressure: RefCell::new(Vec::new()),
            output: OutputBuffer::stdout(),
        }
    }
}

thread_local! {
    static CURRENT: Rc<State> = Rc::new(State::new());
}

/// The runtime of the current thread.
///
/// Cloning is cheap; every clone refers to the same thread state.
#[derive(Clone)]
pub struct ProcessRuntime {
    state: Rc<State>,
}

impl ProcessRuntime {
    /// Returns the runtime of the current thread.
    pub fn current() -> Self {
        Self {
            state: CURRENT.with(Rc::clone),
        }
    }

    /// Sets the execution context.
    pub fn set_context(&self, context: ExecutionContext) {
        self.state.context.set(context);
    }

    /// The execution context.
    pub fn context(&self) -> ExecutionContext {
        self.state.context.get()
    }

    /// The status line set for the response, if any.
    ///
    /// The status line is written ahead of the first output that reaches
    /// standard output through [`Runtime::output`].
    pub fn status_line(&self) -> Option<String> {
        self.state.status_line.borrow().clone()
    }

    /// Sets the reporting mask, returning the previous one.
    pub fn set_error_reporting(&self, mask: SeverityMask) -> SeverityMask {
        self.state.reporting.replace(mask)
    }

    /// Adds a callback to run when memory should be freed.
    pub fn on_memory_pressure(&self, callback: impl Fn() + 'static) {
        self.state.memory_pressure.borrow_mut().push(Rc::new(callback));
    }

    /// Forgets the last raw error.
    pub fn clear_last_error(&self) {
        self.state.last_error.borrow_mut().take();
    }

    /// Reports a diagnostic.
    ///
    /// With an error sink installed, the sink decides: `Err` is the failure
    /// to propagate from here. Without one, the diagnostic is recorded as the
    /// last error and printed to standard error when displaying errors is
    /// enabled and the severity is reported.
    #[track_caller]
    pub fn raise(&self, severity: Severity, message: impl Into<String>) -> Result<(), Failure> {
        let origin = Origin::caller();
        let message = message.into();

        let sink = self
            .state
            .error_sink
            .borrow()
            .as_ref()
            .and_then(SinkHandle::upgrade);
        if let Some(sink) = sink {
            return sink.on_error(severity, &message, origin);
        }

        if self.state.display_errors.get() && self.state.reporting.get().reports(severity) {
            eprintln!(
                "{severity}: {message} in {} on line {}",
                origin.file(),
                origin.line()
            );
        }
        self.record(RawError {
            severity,
            message,
            origin,
        });
        Ok(())
    }

    /// Reports an unrecoverable condition and stops the process.
    ///
    /// The condition is recorded as the last error; shutdown sinks see it
    /// when the process stops.
    #[track_caller]
    pub fn fatal(&self, severity: Severity, message: impl Into<String>) -> ! {
        let origin = Origin::caller();
        let message = message.into();
        if self.state.display_errors.get() {
            eprintln!(
                "Fatal {severity}: {message} in {} on line {}",
                origin.file(),
                origin.line()
            );
        }
        self.record(RawError {
            severity,
            message,
            origin,
        });
        self.exit(EXIT_STATUS)
    }

    /// Runs `f` with every severity suppressed.
    pub fn silence<T>(&self, f: impl FnOnce() -> T) -> T {
        struct Restore<'a>(&'a ProcessRuntime, SeverityMask);

        impl Drop for Restore<'_> {
            fn drop(&mut self) {
                self.0.set_error_reporting(self.1);
            }
        }

        let _restore = Restore(self, self.set_error_reporting(SeverityMask::empty()));
        f()
    }

    /// Runs the program body.
    ///
    /// A failure returned or panicked by `main` goes to the uncaught-failure
    /// sink, which normally stops the process. When no sink is installed the
    /// failure is printed to standard error. Shutdown sinks run once the body
    /// is done.
    pub fn run<F>(&self, main: F) -> ExitCode
    where
        F: FnOnce() -> Result<(), Failure>,
    {
        let failure = crate::panic::catch_result(main).err();
        let status = match failure {
            None => ExitCode::SUCCESS,
            Some(failure) => {
                self.uncaught(failure);
                ExitCode::from(EXIT_STATUS)
            }
        };
        self.shutdown();
        self.state.output.flush_all();
        status
    }

    /// Runs the shutdown sinks, flushes output and exits.
    pub fn exit(&self, status: u8) -> ! {
        self.shutdown();
        self.state.output.flush_all();
        std::process::exit(i32::from(status))
    }

    pub(crate) fn deliver_panic(failure: Failure) -> bool {
        let Ok(runtime) = CURRENT.try_with(|state| Self {
            state: Rc::clone(state),
        }) else {
            return false;
        };

        let sink = runtime
            .state
            .exception_sink
            .borrow()
            .as_ref()
            .and_then(SinkHandle::upgrade);
        match sink {
            Some(sink) => {
                sink.on_uncaught_exception(failure);
                true
            }
            None => false,
        }
    }

    fn uncaught(&self, failure: Failure) {
        let sink = self
            .state
            .exception_sink
            .borrow()
            .as_ref()
            .and_then(SinkHandle::upgrade);
        match sink {
            Some(sink) => sink.on_uncaught_exception(failure),
            None => eprintln!("Uncaught {}", ChainFormat::FULL.display(&failure)),
        }
    }

    fn shutdown(&self) {
        let sinks = std::mem::take(&mut *self.state.shutdown_sinks.borrow_mut());
        for sink in sinks.iter().filter_map(SinkHandle::upgrade) {
            sink.on_shutdown();
        }
    }

    fn record(&self, error: RawError) {
        *self.state.last_error.borrow_mut() = Some(error);
    }

    fn restore(
        slot: &RefCell<Option<SinkHandle>>,
        token: SinkToken,
    ) -> Result<(), SinkRestoreError> {
        let found = slot.borrow().as_ref().map(SinkHandle::id);
        if found != Some(token.installed()) {
            return Err(SinkRestoreError {
                expected: token.installed(),
                found,
                token,
            });
        }
        *slot.borrow_mut() = token.into_previous();
        Ok(())
    }
}

impl std::fmt::Debug for ProcessRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRuntime")
            .field("context", &self.state.context.get())
            .field("reporting", &self.state.reporting.get())
            .field("output", &self.state.output)
            .finish_non_exhaustive()
    }
}

impl Runtime for ProcessRuntime {
    fn install_error_sink(&self, sink: SinkHandle) -> SinkToken {
        let installed = sink.id();
        let previous = self.state.error_sink.replace(Some(sink));
        SinkToken::new(installed, previous)
    }

    fn restore_error_sink(&self, token: SinkToken) -> Result<(), SinkRestoreError> {
        Self::restore(&self.state.error_sink, token)
    }

    fn install_exception_sink(&self, sink: SinkHandle) -> SinkToken {
        crate::panic::install_bridge();
        let installed = sink.id();
        let previous = self.state.exception_sink.replace(Some(sink));
        SinkToken::new(installed, previous)
    }

    fn restore_exception_sink(&self, token: SinkToken) -> Result<(), SinkRestoreError> {
        Self::restore(&self.state.exception_sink, token)
    }

    fn register_shutdown_sink(&self, sink: SinkHandle) {
        self.state.shutdown_sinks.borrow_mut().push(sink);
    }

    fn active_error_sink(&self) -> Option<SinkId> {
        self.state.error_sink.borrow().as_ref().map(SinkHandle::id)
    }

    fn last_error(&self) -> Option<RawError> {
        self.state.last_error.borrow().clone()
    }

    fn display_errors(&self) -> bool {
        self.state.display_errors.get()
    }

    fn set_display_errors(&self, enabled: bool) -> bool {
        self.state.display_errors.replace(enabled)
    }

    fn error_reporting(&self) -> SeverityMask {
        self.state.reporting.get()
    }

    fn collect_garbage(&self) {
        let callbacks: Vec<Rc<dyn Fn()>> = self.state.memory_pressure.borrow().clone();
        for callback in callbacks {
            callback();
        }
    }

    fn is_cli(&self) -> bool {
        self.state.context.get() == ExecutionContext::Cli
    }

    fn replace_status_line(&self, line: &str) -> bool {
        if !self.state.output.set_preamble(format!("{line}\r\n\r\n")) {
            return false;
        }
        *self.state.status_line.borrow_mut() = Some(line.to_owned());
        true
    }

    fn set_working_directory(&self, path: &Path) -> io::Result<()> {
        std::env::set_current_dir(path)
    }

    fn output(&self) -> &OutputBuffer {
        &self.state.output
    }

    fn write_stdout(&self, text: &str) {
        let mut stdout = io::stdout().lock();
        if let Err(err) = stdout.write_all(text.as_bytes()).and_then(|()| stdout.flush()) {
            tracing::debug!(%err, "failed to write to stdout");
        }
    }

    fn terminate(&self, status: u8) {
        self.exit(status)
    }
}

/// Reports a diagnostic through the current thread's runtime.
///
/// See [`ProcessRuntime::raise`].
#[track_caller]
pub fn raise(severity: Severity, message: impl Into<String>) -> Result<(), Failure> {
    ProcessRuntime::current().raise(severity, message)
}

/// Reports an unrecoverable condition through the current thread's runtime
/// and stops the process.
#[track_caller]
pub fn fatal(severity: Severity, message: impl Into<String>) -> ! {
    ProcessRuntime::current().fatal(severity, message)
}

/// Runs `f` with every severity suppressed on the current thread.
pub fn silence<T>(f: impl FnOnce() -> T) -> T {
    ProcessRuntime::current().silence(f)
}

#[cfg(test)]
mod tests {
    use std::rc::Weak;

    use super::*;
    use crate::runtime::RuntimeSink;

    struct Counting {
        errors: Cell<usize>,
    }

    impl RuntimeSink for Counting {
        fn on_error(&self, _: Severity, message: &str, _: Origin) -> Result<(), Failure> {
            self.errors.set(self.errors.get() + 1);
            Err(Failure::msg(message.to_owned()))
        }

        fn on_uncaught_exception(&self, _: Failure) {}

        fn on_shutdown(&self) {}
    }

    fn handle(sink: &Rc<Counting>) -> SinkHandle {
        let weak: Weak<dyn RuntimeSink> = Rc::downgrade(sink) as Weak<dyn RuntimeSink>;
        SinkHandle::new(SinkId::next(), weak)
    }

    #[test]
    fn test_process_runtime_not_send() {
        static_assertions::assert_not_impl_any!(ProcessRuntime: Send, Sync);
    }

    #[test]
    fn raise_without_sink_records_last_error() {
        let runtime = ProcessRuntime::current();
        runtime.set_display_errors(false);
        runtime.raise(Severity::Notice, "plain notice").unwrap();
        let last = runtime.last_error().unwrap();
        assert_eq!(last.message, "plain notice");
        assert_eq!(last.severity, Severity::Notice);
        assert!(last.origin.file().ends_with("process.rs"));
    }

    #[test]
    fn raise_goes_to_installed_sink() {
        let runtime = ProcessRuntime::current();
        let sink = Rc::new(Counting {
            errors: Cell::new(0),
        });
        let token = runtime.install_error_sink(handle(&sink));
        assert_eq!(runtime.active_error_sink(), Some(token.installed()));

        let failure = runtime.raise(Severity::Warning, "to the sink").unwrap_err();
        assert_eq!(failure.message(), "to the sink");
        assert_eq!(sink.errors.get(), 1);

        runtime.restore_error_sink(token).unwrap();
        assert_eq!(runtime.active_error_sink(), None);
    }

    #[test]
    fn restore_refuses_out_of_order_tokens() {
        let runtime = ProcessRuntime::current();
        let first = Rc::new(Counting {
            errors: Cell::new(0),
        });
        let second = Rc::new(Counting {
            errors: Cell::new(0),
        });
        let first_token = runtime.install_error_sink(handle(&first));
        let second_token = runtime.install_error_sink(handle(&second));

        let err = runtime.restore_error_sink(first_token).unwrap_err();
        assert_eq!(err.found, Some(second_token.installed()));

        runtime.restore_error_sink(second_token).unwrap();
        runtime.restore_error_sink(err.token).unwrap();
        assert_eq!(runtime.active_error_sink(), None);
    }

    #[test]
    fn silence_restores_mask() {
        let runtime = ProcessRuntime::current();
        runtime.set_error_reporting(SeverityMask::ALL);
        let inside = runtime.silence(|| runtime.error_reporting());
        assert_eq!(inside, SeverityMask::empty());
        assert_eq!(runtime.error_reporting(), SeverityMask::ALL);
    }

    #[test]
    fn status_line_only_before_output() {
        let runtime = ProcessRuntime::current();
        assert!(runtime.replace_status_line("HTTP/1.1 500 Internal Server Error"));
        assert_eq!(
            runtime.status_line().as_deref(),
            Some("HTTP/1.1 500 Internal Server Error")
        );
    }

    #[test]
    fn run_stops_with_the_dispatcher_status() {
        let runtime = ProcessRuntime::current();
        assert_eq!(runtime.run(|| Ok(())), ExitCode::SUCCESS);
        assert_eq!(
            runtime.run(|| Err(Failure::msg("nothing to do"))),
            ExitCode::from(crate::dispatcher::EXIT_STATUS)
        );
    }

    #[test]
    fn memory_pressure_callbacks_run() {
        let runtime = ProcessRuntime::current();
        let freed = Rc::new(Cell::new(false));
        let flag = freed.clone();
        runtime.on_memory_pressure(move || flag.set(true));
        runtime.collect_garbage();
        assert!(freed.get());
    }
}
