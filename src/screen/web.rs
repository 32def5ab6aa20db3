use std::{
    borrow::Cow,
    cell::RefCell,
    fmt::{self, Write as _},
    io::{self, Write},
};

use html_escape::encode_safe;

use super::{RenderEvent, Screen, emit_render};
use crate::{Failure, events::EventBus, format::ChainFormat};

/// What [`WebScreen`] renders.
///
/// `heading`, `text` and `extras` are HTML fragments and are written as
/// they are; `title` is escaped. In debug mode only `title` and `extras`
/// are used: the page body is the failure chain, with `extras` placed after
/// the first link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebView {
    /// The document title.
    pub title: String,
    /// The page heading.
    pub heading: String,
    /// The message under the heading.
    pub text: String,
    /// Additional HTML.
    pub extras: String,
}

/// The non-debug render event of [`WebScreen`].
pub type WebRender = RenderEvent<WebView, false>;

/// The debug render event of [`WebScreen`].
pub type WebDebugRender = RenderEvent<WebView, true>;

/// An HTML error page.
///
/// Writes to standard output unless another writer is given.
pub struct WebScreen {
    writer: RefCell<Box<dyn Write>>,
    events: EventBus,
    max_output_buffer_length: usize,
}

impl WebScreen {
    /// The title and heading of non-debug pages.
    pub const TITLE: &'static str = "Internal server error";

    /// The text of non-debug pages.
    pub const TEXT: &'static str =
        "Something went wrong while processing your request. Please try again later.";

    /// Creates a screen writing to standard output.
    pub fn new() -> Self {
        Self::with_writer(io::stdout())
    }

    /// Creates a screen writing to `writer`.
    pub fn with_writer(writer: impl Write + 'static) -> Self {
        Self {
            writer: RefCell::new(Box::new(writer)),
            events: EventBus::new(),
            max_output_buffer_length: 100 * 1024,
        }
    }

    /// Output buffers longer than this many bytes are not shown in debug
    /// pages.
    #[must_use]
    pub fn with_max_output_buffer_length(mut self, length: usize) -> Self {
        self.max_output_buffer_length = length;
        self
    }

    /// The bus the render events are emitted on.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn render_page(
        &self,
        failure: &Failure,
        output_buffer: Option<&str>,
        view: &WebView,
        debug: bool,
    ) -> Result<String, fmt::Error> {
        let mut content = String::new();
        if debug {
            let chain: Vec<&Failure> = failure.chain().collect();
            let total = chain.len();
            for (index, link) in chain.into_iter().enumerate() {
                render_link(&mut content, link, index, total)?;
                if index == 0 {
                    content.push_str(&view.extras);
                    self.render_output_buffer(&mut content, output_buffer)?;
                    render_plaintext(&mut content, failure)?;
                }
            }
        } else {
            writeln!(
                content,
                "<div class=\"group\">\n<div class=\"section major\">\n<h1>{}</h1>\n<p class=\"message\">{}</p>\n</div>\n</div>",
                view.heading, view.text
            )?;
            if !view.extras.is_empty() {
                writeln!(content, "\n{}", view.extras)?;
            }
        }

        let mut page = String::new();
        write!(
            page,
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n<div id=\"content\">\n{}</div>\n</body>\n</html>\n",
            encode_safe(&view.title),
            content
        )?;
        Ok(page)
    }

    fn render_output_buffer(&self, html: &mut String, output_buffer: Option<&str>) -> fmt::Result {
        let Some(buffer) = output_buffer.filter(|buffer| !buffer.is_empty()) else {
            return Ok(());
        };

        writeln!(
            html,
            "<div class=\"group\">\n<div class=\"section\">\n<h2>Output buffer <em>({})</em></h2>",
            buffer.len()
        )?;
        if buffer.len() > self.max_output_buffer_length {
            writeln!(html, "<p>The output buffer is too big to display.</p>")?;
        } else if buffer.chars().any(is_unprintable) {
            writeln!(html, "<p>The output buffer contains unprintable characters.</p>")?;
        } else {
            writeln!(
                html,
                "<textarea readonly rows=\"{}\" cols=\"80\">{}</textarea>",
                rows(buffer),
                encode_safe(buffer)
            )?;
        }
        writeln!(html, "</div>\n</div>")
    }
}

fn is_unprintable(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{9}' | '\u{b}' | '\u{c}' | '\u{e}'..='\u{1f}')
}

fn rows(text: &str) -> usize {
    1 + text.lines().count().saturating_sub(1).min(10)
}

fn render_link(html: &mut String, link: &Failure, index: usize, total: usize) -> fmt::Result {
    let tag = if index == 0 { "h1" } else { "h2" };
    let message = encode_safe(link.message()).replace('\n', "<br>\n");
    writeln!(
        html,
        "<div class=\"group failure\">\n<div class=\"section major\">\n<{tag}><em>{}/{}</em> {}</{tag}>\n<p class=\"message\">{}</p>\n<p>in <em>{}</em> on line <em>{}</em></p>\n</div>",
        index + 1,
        total,
        encode_safe(&link.label()),
        message,
        encode_safe(link.origin().file()),
        link.origin().line()
    )?;
    if let Some(trace) = link.trace() {
        writeln!(
            html,
            "<div class=\"section\">\n<pre class=\"trace\">{}</pre>\n</div>",
            encode_safe(&trace.to_string())
        )?;
    }
    writeln!(html, "</div>")
}

fn render_plaintext(html: &mut String, failure: &Failure) -> fmt::Result {
    let text = ChainFormat::FULL.display(failure).to_string();
    let text = text.trim_end();
    writeln!(
        html,
        "<div class=\"group\">\n<div class=\"section\">\n<h2>Plaintext trace</h2>\n<textarea readonly rows=\"{}\" cols=\"80\">{}</textarea>\n</div>\n</div>",
        rows(text),
        encode_safe(text)
    )
}

impl Default for WebScreen {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WebScreen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebScreen")
            .field("events", &self.events)
            .field("max_output_buffer_length", &self.max_output_buffer_length)
            .finish_non_exhaustive()
    }
}

impl Screen for WebScreen {
    fn render(
        &self,
        failure: &Failure,
        debug: bool,
        output_buffer: Option<&str>,
    ) -> Result<(), Failure> {
        let view = if debug {
            WebView {
                title: failure.label().into_owned(),
                heading: String::new(),
                text: String::new(),
                extras: String::new(),
            }
        } else {
            WebView {
                title: String::from(Self::TITLE),
                heading: String::from(Self::TITLE),
                text: String::from(Self::TEXT),
                extras: String::new(),
            }
        };
        let view = emit_render(&self.events, failure, debug, output_buffer, view)?;
        let page = self.render_page(failure, output_buffer, &view, debug)?;

        let mut writer = self.writer.borrow_mut();
        writer.write_all(page.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed("WebScreen")
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{Origin, Severity};

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

    fn failure() -> Failure {
        Failure::error(Severity::Warning, "<script>alert(1)</script>", Origin::new("view.rs", 4))
            .with_previous(Some(Failure::msg("template missing")))
    }

    #[test]
    fn non_debug_page_is_generic() {
        let out = Shared::default();
        let screen = WebScreen::with_writer(out.clone());
        screen.render(&failure(), false, Some("half a page")).unwrap();
        let html = out.text();
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>Internal server error</title>"));
        assert!(html.contains(WebScreen::TEXT));
        assert!(!html.contains("alert"));
        assert!(!html.contains("half a page"));
    }

    #[test]
    fn debug_page_escapes_and_lists_chain() {
        let out = Shared::default();
        let screen = WebScreen::with_writer(out.clone());
        screen.render(&failure(), true, Some("half a page")).unwrap();
        let html = out.text();
        assert!(html.contains("<title>Warning</title>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("<em>1/2</em> Warning"));
        assert!(html.contains("<em>2/2</em> Failure"));
        assert!(html.contains("Output buffer <em>(11)</em>"));
        assert!(html.contains("Plaintext trace"));
    }

    #[test]
    fn oversized_and_binary_buffers_are_not_shown() {
        let out = Shared::default();
        let screen = WebScreen::with_writer(out.clone()).with_max_output_buffer_length(4);
        screen.render(&failure(), true, Some("too long")).unwrap();
        assert!(out.text().contains("too big to display"));

        let out = Shared::default();
        let screen = WebScreen::with_writer(out.clone());
        screen.render(&failure(), true, Some("bell\u{7}")).unwrap();
        assert!(out.text().contains("unprintable characters"));
    }

    #[test]
    fn render_listeners_add_extras() {
        let out = Shared::default();
        let screen = WebScreen::with_writer(out.clone());
        screen.events().on::<WebRender, _>(|event| {
            event.view_mut().extras = String::from("<p>Request id: 42</p>");
            Ok(())
        });
        screen.render(&failure(), false, None).unwrap();
        assert!(out.text().contains("<p>Request id: 42</p>"));
    }
}
