//! Plain text rendering of failure chains.
//!
//! ```
//! use crashguard::{Failure, format::ChainFormat};
//!
//! let failure = Failure::chained("wrapped", Failure::msg("root cause"));
//! let text = ChainFormat::FULL.display(&failure).to_string();
//! assert!(text.starts_with("[1/2] Chained failure: wrapped in "));
//! assert!(text.contains("[2/2] Failure: root cause in "));
//! ```

use std::fmt;

use crate::Failure;

/// Controls how much of a failure chain is rendered.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChainFormat {
    /// Render every link of the chain, numbered, instead of only the head.
    pub include_previous: bool,
    /// Render the trace attached to each rendered link.
    pub include_traces: bool,
}

impl ChainFormat {
    /// The head of the chain and its trace.
    pub const DEFAULT: Self = Self {
        include_previous: false,
        include_traces: true,
    };

    /// Every link of the chain, with traces.
    pub const FULL: Self = Self {
        include_previous: true,
        include_traces: true,
    };

    /// Every link of the chain, without traces.
    pub const MESSAGES: Self = Self {
        include_previous: true,
        include_traces: false,
    };

    /// Returns a value that renders `failure` in this format.
    pub fn display(self, failure: &Failure) -> FormattedChain<'_> {
        FormattedChain {
            format: self,
            failure,
        }
    }
}

impl Default for ChainFormat {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A failure chain rendered by a [`ChainFormat`].
#[derive(Copy, Clone)]
pub struct FormattedChain<'a> {
    format: ChainFormat,
    failure: &'a Failure,
}

impl fmt::Display for FormattedChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let links: Vec<&Failure> = if self.format.include_previous {
            self.failure.chain().collect()
        } else {
            vec![self.failure]
        };
        let total = links.len();

        for (index, link) in links.into_iter().enumerate() {
            if index > 0 && self.format.include_traces {
                writeln!(f)?;
            }
            if self.format.include_previous {
                write!(f, "[{}/{}] ", index + 1, total)?;
            }
            write_link(f, link)?;
            if self.format.include_traces
                && let Some(trace) = link.trace()
            {
                writeln!(f, "{trace}")?;
            }
        }
        Ok(())
    }
}

/// Writes the one-line summary of a single link: label, message and origin.
pub(crate) fn write_link(f: &mut impl fmt::Write, link: &Failure) -> fmt::Result {
    let message = match link.message() {
        "" => "<no message>",
        message => message,
    };
    writeln!(
        f,
        "{}: {} in {} on line {}",
        link.label(),
        message,
        link.origin().file(),
        link.origin().line()
    )
}
