use std::{
    borrow::Cow,
    cell::RefCell,
    fmt,
    io::{self, Write},
};

use super::{RenderEvent, Screen, emit_render};
use crate::{Failure, events::EventBus, format::ChainFormat};

/// What [`CliScreen`] writes: a title, a blank line, then the text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CliView {
    /// The first line of the report.
    pub title: String,
    /// The body of the report.
    pub text: String,
}

/// The non-debug render event of [`CliScreen`].
pub type CliRender = RenderEvent<CliView, false>;

/// The debug render event of [`CliScreen`].
pub type CliDebugRender = RenderEvent<CliView, true>;

/// A plain text screen for command line programs.
///
/// Writes to standard error unless another writer is given. In debug mode
/// the report holds the whole failure chain with traces.
pub struct CliScreen {
    writer: RefCell<Box<dyn Write>>,
    events: EventBus,
}

impl CliScreen {
    /// The title of every report.
    pub const TITLE: &'static str = "An error has occurred";

    /// The text of non-debug reports.
    pub const TEXT: &'static str = "Enable debug mode for more details.";

    /// Creates a screen writing to standard error.
    pub fn new() -> Self {
        Self::with_writer(io::stderr())
    }

    /// Creates a screen writing to `writer`.
    pub fn with_writer(writer: impl Write + 'static) -> Self {
        Self {
            writer: RefCell::new(Box::new(writer)),
            events: EventBus::new(),
        }
    }

    /// The bus the render events are emitted on.
    pub fn events(&self) -> &EventBus {
        &self.events
    }
}

impl Default for CliScreen {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CliScreen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CliScreen")
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl Screen for CliScreen {
    fn render(
        &self,
        failure: &Failure,
        debug: bool,
        output_buffer: Option<&str>,
    ) -> Result<(), Failure> {
        let text = if debug {
            ChainFormat::FULL.display(failure).to_string()
        } else {
            String::from(Self::TEXT)
        };
        let view = CliView {
            title: String::from(Self::TITLE),
            text,
        };
        let view = emit_render(&self.events, failure, debug, output_buffer, view)?;

        let mut writer = self.writer.borrow_mut();
        if !view.title.is_empty() {
            writer.write_all(view.title.as_bytes())?;
        }
        if !view.text.is_empty() {
            if !view.title.is_empty() {
                writer.write_all(b"\n\n")?;
            }
            writer.write_all(view.text.as_bytes())?;
        }
        writer.flush()?;
        Ok(())
    }

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed("CliScreen")
    }
}
