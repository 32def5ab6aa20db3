#![allow(dead_code)]

use std::{
    borrow::Cow,
    cell::{Cell, RefCell},
    io::{self, Write},
    path::{Path, PathBuf},
    rc::Rc,
};

use crashguard::{
    Failure, Origin, Severity, SeverityMask,
    output::OutputBuffer,
    runtime::{RawError, Runtime, SinkHandle, SinkId, SinkRestoreError, SinkToken},
    screen::Screen,
};

/// An in-memory writer whose content stays readable after it was handed
/// away.
#[derive(Clone, Default)]
pub struct SharedWriter(Rc<RefCell<Vec<u8>>>);

impl SharedWriter {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct State {
    error_sink: RefCell<Option<SinkHandle>>,
    exception_sink: RefCell<Option<SinkHandle>>,
    shutdown_sinks: RefCell<Vec<SinkHandle>>,
    last_error: RefCell<Option<RawError>>,
    display_errors: Cell<bool>,
    reporting: Cell<SeverityMask>,
    cli: Cell<bool>,
    headers_sent: Cell<bool>,
    status_lines: RefCell<Vec<String>>,
    working_directories: RefCell<Vec<PathBuf>>,
    garbage_collections: Cell<usize>,
    output: OutputBuffer,
    output_writer: SharedWriter,
    stdout: RefCell<String>,
    terminations: RefCell<Vec<u8>>,
}

/// A [`Runtime`] that records everything the dispatcher asks of it.
#[derive(Clone)]
pub struct ScriptedRuntime {
    state: Rc<State>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::with_output(OutputBuffer::new)
    }

    /// A runtime whose output buffer has a layer owned by the host.
    pub fn with_base_layer() -> Self {
        Self::with_output(|writer| OutputBuffer::new(writer).with_base_layer())
    }

    fn with_output(output: impl FnOnce(SharedWriter) -> OutputBuffer) -> Self {
        let output_writer = SharedWriter::default();
        Self {
            state: Rc::new(State {
                error_sink: RefCell::new(None),
                exception_sink: RefCell::new(None),
                shutdown_sinks: RefCell::new(Vec::new()),
                last_error: RefCell::new(None),
                display_errors: Cell::new(true),
                reporting: Cell::new(SeverityMask::ALL),
                cli: Cell::new(true),
                headers_sent: Cell::new(false),
                status_lines: RefCell::new(Vec::new()),
                working_directories: RefCell::new(Vec::new()),
                garbage_collections: Cell::new(0),
                output: output(output_writer.clone()),
                output_writer,
                stdout: RefCell::new(String::new()),
                terminations: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn set_reporting(&self, mask: SeverityMask) {
        self.state.reporting.set(mask);
    }

    pub fn set_cli(&self, cli: bool) {
        self.state.cli.set(cli);
    }

    pub fn set_headers_sent(&self, sent: bool) {
        self.state.headers_sent.set(sent);
    }

    pub fn set_last_error(&self, severity: Severity, message: &str) {
        *self.state.last_error.borrow_mut() = Some(RawError {
            severity,
            message: message.to_owned(),
            origin: Origin::new("script.rs", 99),
        });
    }

    /// Delivers a diagnostic the way the host would.
    pub fn raise(&self, severity: Severity, message: &str) -> Result<(), Failure> {
        let sink = self.state.error_sink.borrow().as_ref().and_then(SinkHandle::upgrade);
        match sink {
            Some(sink) => sink.on_error(severity, message, Origin::new("script.rs", 10)),
            None => {
                self.set_last_error(severity, message);
                Ok(())
            }
        }
    }

    /// Delivers an uncaught failure the way the host would.
    pub fn uncaught(&self, failure: Failure) -> bool {
        let sink = self
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

    /// Runs every shutdown sink.
    pub fn shutdown(&self) {
        let sinks: Vec<SinkHandle> = self.state.shutdown_sinks.borrow().clone();
        for sink in sinks.iter().filter_map(SinkHandle::upgrade) {
            sink.on_shutdown();
        }
    }

    pub fn error_sink(&self) -> Option<SinkId> {
        self.state.error_sink.borrow().as_ref().map(SinkHandle::id)
    }

    pub fn exception_sink(&self) -> Option<SinkId> {
        self.state.exception_sink.borrow().as_ref().map(SinkHandle::id)
    }

    pub fn shutdown_sink_count(&self) -> usize {
        self.state.shutdown_sinks.borrow().len()
    }

    pub fn status_lines(&self) -> Vec<String> {
        self.state.status_lines.borrow().clone()
    }

    pub fn working_directories(&self) -> Vec<PathBuf> {
        self.state.working_directories.borrow().clone()
    }

    pub fn garbage_collections(&self) -> usize {
        self.state.garbage_collections.get()
    }

    pub fn stdout(&self) -> String {
        self.state.stdout.borrow().clone()
    }

    pub fn flushed_output(&self) -> String {
        self.state.output_writer.text()
    }

    pub fn terminations(&self) -> Vec<u8> {
        self.state.terminations.borrow().clone()
    }

    fn restore(slot: &RefCell<Option<SinkHandle>>, token: SinkToken) -> Result<(), SinkRestoreError> {
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

impl Runtime for ScriptedRuntime {
    fn install_error_sink(&self, sink: SinkHandle) -> SinkToken {
        let installed = sink.id();
        SinkToken::new(installed, self.state.error_sink.replace(Some(sink)))
    }

    fn restore_error_sink(&self, token: SinkToken) -> Result<(), SinkRestoreError> {
        Self::restore(&self.state.error_sink, token)
    }

    fn install_exception_sink(&self, sink: SinkHandle) -> SinkToken {
        let installed = sink.id();
        SinkToken::new(installed, self.state.exception_sink.replace(Some(sink)))
    }

    fn restore_exception_sink(&self, token: SinkToken) -> Result<(), SinkRestoreError> {
        Self::restore(&self.state.exception_sink, token)
    }

    fn register_shutdown_sink(&self, sink: SinkHandle) {
        self.state.shutdown_sinks.borrow_mut().push(sink);
    }

    fn active_error_sink(&self) -> Option<SinkId> {
        self.error_sink()
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
        self.state
            .garbage_collections
            .set(self.state.garbage_collections.get() + 1);
    }

    fn is_cli(&self) -> bool {
        self.state.cli.get()
    }

    fn replace_status_line(&self, line: &str) -> bool {
        if self.state.headers_sent.get() {
            return false;
        }
        self.state.status_lines.borrow_mut().push(line.to_owned());
        true
    }

    fn set_working_directory(&self, path: &Path) -> io::Result<()> {
        self.state.working_directories.borrow_mut().push(path.to_owned());
        Ok(())
    }

    fn output(&self) -> &OutputBuffer {
        &self.state.output
    }

    fn write_stdout(&self, text: &str) {
        self.state.stdout.borrow_mut().push_str(text);
    }

    fn terminate(&self, status: u8) {
        self.state.terminations.borrow_mut().push(status);
    }
}

/// What a [`RecordingScreen`] was asked to render.
#[derive(Clone, Debug)]
pub struct Rendered {
    pub failure: Failure,
    pub debug: bool,
    pub output_buffer: Option<String>,
}

/// How a [`RecordingScreen`] reacts to a render call.
#[derive(Clone, Debug)]
pub enum Behavior {
    Succeed,
    Fail(Failure),
    Panic(&'static str),
}

/// A [`Screen`] that records its calls.
#[derive(Clone)]
pub struct RecordingScreen {
    rendered: Rc<RefCell<Vec<Rendered>>>,
    behavior: Rc<RefCell<Behavior>>,
}

impl RecordingScreen {
    pub fn new() -> Self {
        Self {
            rendered: Rc::new(RefCell::new(Vec::new())),
            behavior: Rc::new(RefCell::new(Behavior::Succeed)),
        }
    }

    pub fn failing(failure: Failure) -> Self {
        let screen = Self::new();
        screen.set_behavior(Behavior::Fail(failure));
        screen
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.borrow_mut() = behavior;
    }

    pub fn rendered(&self) -> Vec<Rendered> {
        self.rendered.borrow().clone()
    }
}

impl Screen for RecordingScreen {
    fn render(&self, failure: &Failure, debug: bool, output_buffer: Option<&str>) -> Result<(), Failure> {
        self.rendered.borrow_mut().push(Rendered {
            failure: failure.clone(),
            debug,
            output_buffer: output_buffer.map(str::to_owned),
        });
        let behavior = self.behavior.borrow().clone();
        match behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail(failure) => Err(failure),
            Behavior::Panic(message) => panic!("{message}"),
        }
    }

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed("RecordingScreen")
    }
}

/// The messages of a chain, newest first.
pub fn messages(failure: &Failure) -> Vec<String> {
    failure.chain().map(|link| link.message().to_owned()).collect()
}
