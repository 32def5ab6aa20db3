//! The failure dispatcher.
//!
//! A [`Dispatcher`] sits between a [`Runtime`] and a [`Screen`]. Once
//! registered it receives every runtime diagnostic, every failure the
//! program did not catch, and the shutdown notification, and it decides
//! what becomes a raised failure, what gets rendered and when the process
//! stops.
//!
//! # Runtime diagnostics
//!
//! A diagnostic whose severity is excluded from the runtime's reporting mask
//! is suppressed: [`Dispatcher::on_error`] returns `Ok(())` and the program
//! carries on. Otherwise the diagnostic comes back as `Err(Failure)` for the
//! call site to propagate. Listeners of [`ErrorEvent`] see the decision first
//! and may overturn it.
//!
//! # Uncaught failures
//!
//! A failure nobody caught is announced with [`ExceptionEvent`], handed to
//! the screen and followed by [`Runtime::terminate`] with [`EXIT_STATUS`].
//! A failure raised by a listener or by the screen on the way does not get
//! lost: it is chained together with the failure being handled.
//!
//! # Shutdown
//!
//! When the process shuts down with a raw error recorded that the dispatcher
//! has not seen yet, that error was fatal and never went through
//! [`Dispatcher::on_error`]. It is turned into a fatal failure (or an out of
//! memory failure) and goes down the uncaught path.
//!
//! ```
//! use crashguard::{Dispatcher, DispatcherConfig, events::ErrorEvent, runtime::ProcessRuntime};
//!
//! let dispatcher = Dispatcher::with_config(
//!     ProcessRuntime::current(),
//!     DispatcherConfig::new().with_debug(true),
//! );
//! dispatcher.events().on::<ErrorEvent, _>(|event| {
//!     if event.failure().message().contains("deprecated") {
//!         event.suppress();
//!     }
//!     Ok(())
//! });
//! assert!(dispatcher.register());
//! assert!(dispatcher.is_active());
//! assert!(dispatcher.unregister());
//! ```

use std::{
    cell::{Cell, RefCell},
    fmt,
    io::{self, Write},
    path::PathBuf,
    rc::{Rc, Weak},
    sync::OnceLock,
};

use crate::{
    Failure, Origin, Severity,
    config::DispatcherConfig,
    events::{ErrorEvent, EventBus, ExceptionEvent, FailureEvent},
    format::ChainFormat,
    panic::catch_result,
    runtime::{RawError, Runtime, RuntimeSink, SinkHandle, SinkId, SinkToken, Termination},
    screen::{CliScreen, Screen, WebScreen},
};

/// The status the process stops with after an uncaught failure.
pub const EXIT_STATUS: u8 = 255;

const STATUS_LINE: &str = "HTTP/1.1 500 Internal Server Error";

const ERROR_LISTENER_FAILED: &str =
    "Additional exception was thrown from an [error] event listener. See previous exceptions.";

const EXCEPTION_LISTENER_FAILED: &str =
    "Additional exception was thrown from an [exception] event listener. See previous exceptions.";

/// Handles runtime diagnostics, uncaught failures and fatal shutdowns.
///
/// Cloning is cheap; clones share the same dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Rc<Inner>,
}

struct Registration {
    error_token: SinkToken,
    exception_token: SinkToken,
    display_errors: bool,
}

struct Inner {
    this: Weak<Inner>,
    sink_id: SinkId,
    runtime: Rc<dyn Runtime>,
    events: EventBus,
    screen: RefCell<Option<Rc<dyn Screen>>>,
    debug: Cell<bool>,
    clean_buffers: Cell<bool>,
    print_unhandled_in_debug: Cell<bool>,
    working_directory: RefCell<Option<PathBuf>>,
    registration: RefCell<Option<Registration>>,
    shutdown_installed: Cell<bool>,
    in_flight: RefCell<Option<Failure>>,
    emitting: Cell<bool>,
    last_seen: RefCell<Option<RawError>>,
    reserved_memory: RefCell<Option<Box<[u8]>>>,
}

/// Marks a failure as in flight until dropped, then puts back whatever was
/// in flight before.
struct InFlight<'a> {
    slot: &'a RefCell<Option<Failure>>,
    previous: Option<Failure>,
}

impl<'a> InFlight<'a> {
    fn enter(slot: &'a RefCell<Option<Failure>>, failure: Failure) -> Self {
        let previous = slot.replace(Some(failure));
        Self { slot, previous }
    }

    fn replace(&self, failure: Failure) {
        *self.slot.borrow_mut() = Some(failure);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        *self.slot.borrow_mut() = self.previous.take();
    }
}

/// Writes into the runtime's output buffers.
struct RuntimeOutput(Rc<dyn Runtime>);

impl Write for RuntimeOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.output().write(&String::from_utf8_lossy(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Set while [`ErrorEvent`] listeners run. Diagnostics raised by a listener
/// are not emitted again.
struct Emitting<'a>(&'a Cell<bool>);

impl<'a> Emitting<'a> {
    fn enter(flag: &'a Cell<bool>) -> Option<Self> {
        (!flag.replace(true)).then_some(Self(flag))
    }
}

impl Drop for Emitting<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Dispatcher {
    /// Creates a dispatcher with the default configuration.
    pub fn new(runtime: impl Runtime + 'static) -> Self {
        Self::with_config(runtime, DispatcherConfig::new())
    }

    /// Creates a dispatcher from `config`.
    ///
    /// The reserved memory block is allocated here.
    pub fn with_config(runtime: impl Runtime + 'static, config: DispatcherConfig) -> Self {
        let runtime: Rc<dyn Runtime> = Rc::new(runtime);
        let reserved_memory =
            (config.reserved_memory > 0).then(|| vec![b'.'; config.reserved_memory].into_boxed_slice());

        let inner = Rc::new_cyclic(|this| Inner {
            this: this.clone(),
            sink_id: SinkId::next(),
            runtime,
            events: EventBus::new(),
            screen: RefCell::new(None),
            debug: Cell::new(config.debug),
            clean_buffers: Cell::new(config.clean_buffers),
            print_unhandled_in_debug: Cell::new(config.print_unhandled_in_debug),
            working_directory: RefCell::new(config.working_directory),
            registration: RefCell::new(None),
            shutdown_installed: Cell::new(false),
            in_flight: RefCell::new(None),
            emitting: Cell::new(false),
            last_seen: RefCell::new(None),
            reserved_memory: RefCell::new(reserved_memory),
        });
        Self { inner }
    }

    /// Installs the dispatcher as the runtime's error and uncaught-failure
    /// sink.
    ///
    /// Turns off the runtime's own error display while registered. The
    /// shutdown check is installed with the first registration and stays
    /// installed. Returns `false` if the dispatcher was already registered.
    pub fn register(&self) -> bool {
        self.inner.register()
    }

    /// Restores the sinks and the error display setting that were active
    /// before [`register`](Self::register).
    ///
    /// Returns `false` if the dispatcher was not registered.
    pub fn unregister(&self) -> bool {
        self.inner.unregister()
    }

    /// Whether the dispatcher is registered.
    pub fn is_registered(&self) -> bool {
        self.inner.registration.borrow().is_some()
    }

    /// Whether the dispatcher is handling a diagnostic right now or is the
    /// runtime's active error sink.
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// The id the dispatcher is installed under.
    pub fn sink_id(&self) -> SinkId {
        self.inner.sink_id
    }

    /// The bus [`ErrorEvent`], [`ExceptionEvent`] and [`FailureEvent`] are
    /// emitted on.
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Handles a runtime diagnostic.
    ///
    /// `Ok(())` means the diagnostic was handled; `Err` holds the failure to
    /// raise where the diagnostic came from.
    pub fn on_error(&self, severity: Severity, message: &str, origin: Origin) -> Result<(), Failure> {
        self.inner.on_error(severity, message, origin)
    }

    /// Handles a failure the program did not catch, then stops the runtime.
    pub fn on_uncaught_exception(&self, failure: Failure) {
        self.inner.handle(failure, Termination::UncaughtException);
    }

    /// Checks for a fatal error at shutdown.
    pub fn on_shutdown(&self) {
        self.inner.on_shutdown();
    }

    /// Whether debug mode is enabled.
    pub fn debug(&self) -> bool {
        self.inner.debug.get()
    }

    /// Enables or disables debug mode.
    pub fn set_debug(&self, debug: bool) {
        self.inner.debug.set(debug);
    }

    /// Sets the directory to switch back to before handling a fatal error.
    pub fn set_working_directory(&self, path: Option<PathBuf>) {
        *self.inner.working_directory.borrow_mut() = path;
    }

    /// The directory switched back to before handling a fatal error.
    pub fn working_directory(&self) -> Option<PathBuf> {
        self.inner.working_directory.borrow().clone()
    }

    /// Whether output buffers are unwound before rendering.
    pub fn clean_buffers(&self) -> bool {
        self.inner.clean_buffers.get()
    }

    /// Sets whether output buffers are unwound before rendering.
    pub fn set_clean_buffers(&self, clean_buffers: bool) {
        self.inner.clean_buffers.set(clean_buffers);
    }

    /// Whether failures of the screen are printed in debug mode when no
    /// [`FailureEvent`] listener handles them.
    pub fn print_unhandled_in_debug(&self) -> bool {
        self.inner.print_unhandled_in_debug.get()
    }

    /// Sets whether failures of the screen are printed in debug mode when
    /// no [`FailureEvent`] listener handles them.
    pub fn set_print_unhandled_in_debug(&self, print: bool) {
        self.inner.print_unhandled_in_debug.set(print);
    }

    /// The screen failures are rendered with.
    ///
    /// Unless one was set, this is a [`CliScreen`] for command line
    /// programs and a [`WebScreen`] otherwise. The default [`WebScreen`]
    /// writes through [`Runtime::output`], after the status line.
    pub fn screen(&self) -> Rc<dyn Screen> {
        self.inner.screen()
    }

    /// Sets the screen failures are rendered with.
    pub fn set_screen(&self, screen: impl Screen + 'static) {
        let screen: Rc<dyn Screen> = Rc::new(screen);
        *self.inner.screen.borrow_mut() = Some(screen);
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("sink_id", &self.inner.sink_id)
            .field("registered", &self.is_registered())
            .field("debug", &self.inner.debug.get())
            .field("events", &self.inner.events)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn sink_handle(&self) -> SinkHandle {
        let sink: Weak<dyn RuntimeSink> = self.this.clone();
        SinkHandle::new(self.sink_id, sink)
    }

    fn register(&self) -> bool {
        if self.registration.borrow().is_some() {
            return false;
        }

        let error_token = self.runtime.install_error_sink(self.sink_handle());
        let exception_token = self.runtime.install_exception_sink(self.sink_handle());
        let display_errors = self.runtime.set_display_errors(false);
        if !self.shutdown_installed.replace(true) {
            self.runtime.register_shutdown_sink(self.sink_handle());
        }
        *self.last_seen.borrow_mut() = self.runtime.last_error();
        *self.registration.borrow_mut() = Some(Registration {
            error_token,
            exception_token,
            display_errors,
        });

        tracing::debug!(sink = ?self.sink_id, "dispatcher registered");
        true
    }

    fn unregister(&self) -> bool {
        let Some(registration) = self.registration.borrow_mut().take() else {
            return false;
        };

        if let Err(err) = self.runtime.restore_error_sink(registration.error_token) {
            tracing::warn!(%err, "error sink was not restored");
        }
        if let Err(err) = self.runtime.restore_exception_sink(registration.exception_token) {
            tracing::warn!(%err, "uncaught-failure sink was not restored");
        }
        self.runtime.set_display_errors(registration.display_errors);

        tracing::debug!(sink = ?self.sink_id, "dispatcher unregistered");
        true
    }

    fn is_active(&self) -> bool {
        self.in_flight.borrow().is_some() || self.runtime.active_error_sink() == Some(self.sink_id)
    }

    fn screen(&self) -> Rc<dyn Screen> {
        if let Some(screen) = self.screen.borrow().as_ref() {
            return screen.clone();
        }
        let screen: Rc<dyn Screen> = if self.runtime.is_cli() {
            Rc::new(CliScreen::new())
        } else {
            Rc::new(WebScreen::with_writer(RuntimeOutput(self.runtime.clone())))
        };
        *self.screen.borrow_mut() = Some(screen.clone());
        screen
    }

    fn on_error(&self, severity: Severity, message: &str, origin: Origin) -> Result<(), Failure> {
        *self.last_seen.borrow_mut() = self.runtime.last_error();

        let suppressed = !self.runtime.error_reporting().reports(severity);
        let failure = Failure::error(severity, message.to_owned(), origin).with_suppressed(suppressed);

        let in_flight = InFlight::enter(&self.in_flight, failure.clone());
        let emitting = if self.events.has_listeners::<ErrorEvent>() {
            Emitting::enter(&self.emitting)
        } else {
            None
        };
        let failure = if emitting.is_some() {
            let mut event = ErrorEvent::new(failure.clone(), self.debug.get());
            match catch_result(|| self.events.emit(&mut event)) {
                Ok(()) => event.into_failure(),
                Err(listener_failure) => {
                    tracing::warn!(failure = %listener_failure, "error listener failed");
                    let chained =
                        Failure::chained(ERROR_LISTENER_FAILED, Failure::join(failure, listener_failure));
                    in_flight.replace(chained.clone());
                    chained
                }
            }
        } else {
            failure
        };
        drop(emitting);
        drop(in_flight);

        tracing::debug!(%severity, suppressed = failure.is_suppressed(), "runtime error");
        if failure.is_suppressed() {
            Ok(())
        } else {
            Err(crate::trace::attach_default(failure))
        }
    }

    fn on_shutdown(&self) {
        self.reserved_memory.borrow_mut().take();

        if !self.is_active() {
            return;
        }
        let Some(error) = self.runtime.last_error() else {
            return;
        };
        if self.last_seen.borrow().as_ref() == Some(&error) {
            return;
        }
        *self.last_seen.borrow_mut() = Some(error.clone());

        if let Some(directory) = self.working_directory.borrow().as_deref()
            && let Err(err) = self.runtime.set_working_directory(directory)
        {
            tracing::warn!(%err, directory = %directory.display(), "working directory was not restored");
        }

        let RawError {
            severity,
            message,
            origin,
        } = error;
        let (failure, termination) = if is_out_of_memory(severity, &message) {
            self.runtime.collect_garbage();
            (Failure::out_of_memory(severity, message, origin), Termination::OutOfMemory)
        } else {
            (Failure::fatal(severity, message, origin), Termination::FatalError)
        };
        let previous = self.in_flight.borrow().clone();

        tracing::debug!(?termination, "fatal error at shutdown");
        self.handle(failure.with_previous(previous), termination);
    }

    fn handle(&self, failure: Failure, termination: Termination) {
        let debug = self.debug.get();
        let mut failure = failure;

        if self.events.has_listeners::<ExceptionEvent>() {
            let mut event = ExceptionEvent::new(failure.clone(), debug, termination);
            if let Err(listener_failure) = catch_result(|| self.events.emit(&mut event)) {
                tracing::warn!(failure = %listener_failure, "exception listener failed");
                failure = Failure::chained(EXCEPTION_LISTENER_FAILED, Failure::join(failure, listener_failure));
            }
        }

        let screen = self.screen();
        if let Err(render_failure) = catch_result(|| self.render(&*screen, &failure, termination)) {
            let screen_name = screen.name();
            tracing::error!(screen = %screen_name, failure = %render_failure, "screen failed");
            let chained = Failure::chained(
                format!(
                    "Additional exception was thrown while trying to invoke {screen_name}. See previous exceptions."
                ),
                Failure::join(failure, render_failure),
            );

            let mut handled = false;
            if self.events.has_listeners::<FailureEvent>() {
                let mut event = FailureEvent::new(chained.clone(), debug, termination);
                match catch_result(|| self.events.emit(&mut event)) {
                    Ok(()) => handled = true,
                    Err(listener_failure) => {
                        tracing::error!(failure = %listener_failure, "failure listener failed");
                    }
                }
            }
            if !handled && debug && self.print_unhandled_in_debug.get() {
                self.runtime
                    .write_stdout(&ChainFormat::FULL.display(&chained).to_string());
            }
        }

        self.runtime.terminate(EXIT_STATUS);
    }

    fn render(&self, screen: &dyn Screen, failure: &Failure, termination: Termination) -> Result<(), Failure> {
        if !self.runtime.is_cli() && !self.runtime.replace_status_line(STATUS_LINE) {
            tracing::debug!("output already sent, status line kept");
        }

        let output_buffer = if self.clean_buffers.get() {
            let output = self.runtime.output();
            let base_level = output.base_level();
            if termination == Termination::OutOfMemory {
                output.discard(base_level);
                None
            } else {
                Some(output.capture_and_close(base_level)).filter(|buffer| !buffer.is_empty())
            }
        } else {
            None
        };

        screen.render(failure, self.debug.get(), output_buffer.as_deref())
    }
}

impl RuntimeSink for Inner {
    fn on_error(&self, severity: Severity, message: &str, origin: Origin) -> Result<(), Failure> {
        Inner::on_error(self, severity, message, origin)
    }

    fn on_uncaught_exception(&self, failure: Failure) {
        self.handle(failure, Termination::UncaughtException);
    }

    fn on_shutdown(&self) {
        Inner::on_shutdown(self);
    }
}

/// Best effort: the runtime only tells us through the message.
fn is_out_of_memory(severity: Severity, message: &str) -> bool {
    static REGEX: OnceLock<Option<regex::Regex>> = OnceLock::new();

    severity == Severity::FATAL
        && REGEX
            .get_or_init(|| regex::Regex::new(r"(?i)^(allowed memory size of |out of memory)").ok())
            .as_ref()
            .is_some_and(|regex| regex.is_match(message))
}
