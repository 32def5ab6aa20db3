//! Stacked output buffers.
//!
//! An [`OutputBuffer`] is a stack of in-memory layers in front of a writer.
//! While a layer is open, [`OutputBuffer::write`] appends to the top layer;
//! with no layer open, text goes straight to the writer. Closing a layer
//! either flushes its content into the layer below (or the writer), or
//! throws it away.
//!
//! Some layers may belong to the host rather than the program. Those sit
//! below [`OutputBuffer::base_level`] and are never unwound by the
//! dispatcher.

use std::{
    cell::{Cell, RefCell},
    fmt,
    io::{self, Write},
};

/// A stack of output layers in front of a writer.
pub struct OutputBuffer {
    layers: RefCell<Vec<String>>,
    base_level: usize,
    writer: RefCell<Box<dyn Write>>,
    preamble: RefCell<Option<String>>,
    sent: Cell<bool>,
}

impl OutputBuffer {
    /// Creates a buffer stack in front of `writer`, with no open layer.
    pub fn new(writer: impl Write + 'static) -> Self {
        Self {
            layers: RefCell::new(Vec::new()),
            base_level: 0,
            writer: RefCell::new(Box::new(writer)),
            preamble: RefCell::new(None),
            sent: Cell::new(false),
        }
    }

    /// Creates a buffer stack in front of standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Opens a layer owned by the host, below which the dispatcher never
    /// unwinds.
    #[must_use]
    pub fn with_base_layer(mut self) -> Self {
        self.layers.get_mut().push(String::new());
        self.base_level = 1;
        self
    }

    /// The number of layers owned by the host.
    pub fn base_level(&self) -> usize {
        self.base_level
    }

    /// The number of open layers.
    pub fn level(&self) -> usize {
        self.layers.borrow().len()
    }

    /// Whether anything has reached the writer yet.
    pub fn output_sent(&self) -> bool {
        self.sent.get()
    }

    /// Sets text that is written once, right before the first output
    /// reaches the writer. Replaces an earlier preamble.
    ///
    /// Returns `false` when output was already sent.
    pub fn set_preamble(&self, text: impl Into<String>) -> bool {
        if self.sent.get() {
            return false;
        }
        *self.preamble.borrow_mut() = Some(text.into());
        true
    }

    /// Opens a new layer.
    pub fn start(&self) {
        self.layers.borrow_mut().push(String::new());
    }

    /// Writes to the top layer, or to the writer when no layer is open.
    pub fn write(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(top) = self.layers.borrow_mut().last_mut() {
            top.push_str(text);
            return;
        }
        self.send(text);
    }

    /// The content of the top layer.
    pub fn contents(&self) -> Option<String> {
        self.layers.borrow().last().cloned()
    }

    /// Closes the top layer, passing its content down. Returns `false` when
    /// no layer is open.
    pub fn end_flush(&self) -> bool {
        let Some(content) = self.layers.borrow_mut().pop() else {
            return false;
        };
        self.write(&content);
        true
    }

    /// Closes the top layer, discarding its content. Returns `false` when no
    /// layer is open.
    pub fn end_clean(&self) -> bool {
        self.layers.borrow_mut().pop().is_some()
    }

    /// Closes the top layer and returns its content.
    pub fn get_clean(&self) -> Option<String> {
        self.layers.borrow_mut().pop()
    }

    /// Closes every layer above `target` and returns their combined
    /// content, outermost layer first.
    pub fn capture_and_close(&self, target: usize) -> String {
        let mut layers = self.layers.borrow_mut();
        if layers.len() <= target {
            return String::new();
        }
        layers.drain(target..).collect()
    }

    /// Closes every layer above `target` without reading it.
    pub fn discard(&self, target: usize) {
        self.layers.borrow_mut().truncate(target);
    }

    /// Flushes every layer, including the host's, down to the writer.
    pub fn flush_all(&self) {
        while self.end_flush() {}
        if let Err(err) = self.writer.borrow_mut().flush() {
            tracing::debug!(%err, "failed to flush output");
        }
    }

    fn send(&self, text: &str) {
        self.sent.set(true);
        let mut writer = self.writer.borrow_mut();
        let preamble = self.preamble.borrow_mut().take();
        let written = match preamble {
            Some(preamble) => writer
                .write_all(preamble.as_bytes())
                .and_then(|()| writer.write_all(text.as_bytes())),
            None => writer.write_all(text.as_bytes()),
        };
        if let Err(err) = written {
            tracing::debug!(%err, "failed to write output");
        }
    }
}

impl fmt::Debug for OutputBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputBuffer")
            .field("level", &self.level())
            .field("base_level", &self.base_level)
            .field("preamble", &self.preamble.borrow())
            .field("sent", &self.sent.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;

    #[derive(Clone, Default)]
    struct Shared(Rc<RefCell<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Shared {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.borrow()).into_owned()
        }
    }

    #[test]
    fn unbuffered_writes_reach_writer() {
        let writer = Shared::default();
        let output = OutputBuffer::new(writer.clone());
        assert!(!output.output_sent());
        output.write("hello");
        assert_eq!(writer.text(), "hello");
        assert!(output.output_sent());
    }

    #[test]
    fn capture_concatenates_outermost_first() {
        let writer = Shared::default();
        let output = OutputBuffer::new(writer.clone()).with_base_layer();
        output.write("host ");
        output.start();
        output.write("outer ");
        output.start();
        output.write("inner");

        assert_eq!(output.level(), 3);
        assert_eq!(output.capture_and_close(output.base_level()), "outer inner");
        assert_eq!(output.level(), 1);
        assert_eq!(output.contents().as_deref(), Some("host "));
        assert_eq!(writer.text(), "");
    }

    #[test]
    fn discard_keeps_base_layer() {
        let output = OutputBuffer::new(Shared::default()).with_base_layer();
        output.start();
        output.write("dropped");
        output.discard(1);
        assert_eq!(output.level(), 1);
        assert_eq!(output.capture_and_close(1), "");
    }

    #[test]
    fn flush_all_passes_layers_down() {
        let writer = Shared::default();
        let output = OutputBuffer::new(writer.clone());
        output.start();
        output.write("a");
        output.start();
        output.write("b");
        assert!(output.end_clean());
        output.flush_all();
        assert_eq!(writer.text(), "a");
        assert_eq!(output.level(), 0);
        assert!(!output.end_flush());
    }

    #[test]
    fn preamble_precedes_the_first_output_once() {
        let writer = Shared::default();
        let output = OutputBuffer::new(writer.clone());
        assert!(output.set_preamble("Status: 500\r\n\r\n"));
        output.start();
        output.write("buffered");
        assert_eq!(writer.text(), "");

        output.flush_all();
        output.write(" more");
        assert_eq!(writer.text(), "Status: 500\r\n\r\nbuffered more");
        assert!(!output.set_preamble("too late"));
    }
}
