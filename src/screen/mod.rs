//! Screens turn the final failure into output.
//!
//! The dispatcher hands every failure that reaches the uncaught path to its
//! [`Screen`]. Two screens are provided:
//!
//! - [`CliScreen`]: a plain text report for command line programs
//! - [`WebScreen`]: an HTML error page
//!
//! Both emit a render event on their own [`EventBus`] before writing
//! anything, which lets observers rewrite the view. Non-debug rendering
//! emits `render`, debug rendering emits `render.debug`.
//!
//! ```
//! use crashguard::screen::{CliRender, CliScreen};
//!
//! let screen = CliScreen::with_writer(Vec::new());
//! screen.events().on::<CliRender, _>(|event| {
//!     event.view_mut().title = "Something broke".into();
//!     Ok(())
//! });
//! ```

mod cli;
mod web;

use std::borrow::Cow;

pub use self::{
    cli::{CliDebugRender, CliRender, CliScreen, CliView},
    web::{WebDebugRender, WebRender, WebScreen, WebView},
};
use crate::{
    Failure,
    events::{Event, EventBus},
};

/// Produces visible output for a failure.
pub trait Screen {
    /// Renders `failure`.
    ///
    /// `output_buffer` is whatever the program had written into output
    /// buffers before the failure, if the dispatcher captured any.
    fn render(&self, failure: &Failure, debug: bool, output_buffer: Option<&str>)
    -> Result<(), Failure>;

    /// A name for the screen, used in failure messages.
    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed(std::any::type_name::<Self>())
    }
}

/// The render event of a screen, carrying the view listeners may change.
///
/// `DEBUG` selects the event name: `render` or `render.debug`.
#[derive(Debug)]
pub struct RenderEvent<V, const DEBUG: bool> {
    failure: Failure,
    output_buffer: Option<String>,
    view: V,
}

impl<V: 'static> Event for RenderEvent<V, false> {
    const NAME: &'static str = "render";
}

impl<V: 'static> Event for RenderEvent<V, true> {
    const NAME: &'static str = "render.debug";
}

impl<V, const DEBUG: bool> RenderEvent<V, DEBUG> {
    fn new(failure: &Failure, output_buffer: Option<&str>, view: V) -> Self {
        Self {
            failure: failure.clone(),
            output_buffer: output_buffer.map(str::to_owned),
            view,
        }
    }

    /// The failure being rendered.
    pub fn failure(&self) -> &Failure {
        &self.failure
    }

    /// The captured output buffer, if any.
    pub fn output_buffer(&self) -> Option<&str> {
        self.output_buffer.as_deref()
    }

    /// The view about to be rendered.
    pub fn view(&self) -> &V {
        &self.view
    }

    /// Mutable access to the view.
    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }
}

fn emit_render<V: 'static>(
    events: &EventBus,
    failure: &Failure,
    debug: bool,
    output_buffer: Option<&str>,
    view: V,
) -> Result<V, Failure> {
    if debug {
        let mut event = RenderEvent::<V, true>::new(failure, output_buffer, view);
        events.emit(&mut event)?;
        Ok(event.view)
    } else {
        let mut event = RenderEvent::<V, false>::new(failure, output_buffer, view);
        events.emit(&mut event)?;
        Ok(event.view)
    }
}
