//! Conversions between failures and other error handling libraries.
//!
//! - [`anyhow1`] - `anyhow` 1.x (requires the `compat-anyhow1` feature flag)
//! - [`eyre06`] - `eyre` 0.6.x (requires the `compat-eyre06` feature flag)
//!
//! Converting an external error into a [`Failure`] produces one chain link
//! per error in its source chain: the head is named after the library's
//! error type, the rest are named `Caused by`.
//!
//! Going the other way, a [`Failure`] is wrapped in [`FailureAsError`],
//! which implements [`core::error::Error`].
//!
//! ```
//! # #[cfg(feature = "compat-anyhow1")] {
//! use crashguard::{Failure, compat::IntoFailure};
//!
//! fn legacy() -> anyhow::Result<u32> {
//!     anyhow::bail!("legacy code gave up")
//! }
//!
//! fn current() -> Result<u32, Failure> {
//!     legacy().into_failure()
//! }
//!
//! assert_eq!(current().unwrap_err().message(), "legacy code gave up");
//! # }
//! ```

use core::fmt;

use crate::{Failure, Origin, format::ChainFormat};

/// Converts errors of other libraries into failures.
///
/// Implemented for the error types of the enabled compatibility modules and
/// for `Result`s carrying them.
pub trait IntoFailure {
    /// [`Failure`] for error types, `Result<T, Failure>` for results.
    type Output;

    /// Performs the conversion. The failure's origin is the caller.
    #[track_caller]
    fn into_failure(self) -> Self::Output;
}

#[cfg(feature = "compat-anyhow1")]
#[cfg_attr(docsrs, doc(cfg(feature = "compat-anyhow1")))]
pub mod anyhow1;

#[cfg(feature = "compat-eyre06")]
#[cfg_attr(docsrs, doc(cfg(feature = "compat-eyre06")))]
pub mod eyre06;

/// Builds a failure from an error chain, outermost error first.
#[cfg_attr(
    not(any(feature = "compat-anyhow1", feature = "compat-eyre06")),
    allow(dead_code)
)]
pub(crate) fn from_error_chain<'a>(
    name: &'static str,
    errors: impl Iterator<Item = &'a (dyn core::error::Error + 'static)>,
    origin: Origin,
) -> Option<Failure> {
    let mut errors: Vec<String> = errors.map(|error| error.to_string()).collect();
    if errors.is_empty() {
        return None;
    }
    let head = errors.remove(0);

    let mut previous = None;
    for message in errors.into_iter().rev() {
        previous = Some(Failure::generic("Caused by", message, origin.clone()).with_previous(previous));
    }
    Some(Failure::generic(name, head, origin).with_previous(previous))
}

/// A [`Failure`] that implements [`core::error::Error`], for handing
/// failures to libraries that expect one.
///
/// Displays every link of the chain without traces.
#[derive(Clone)]
pub struct FailureAsError(pub Failure);

impl fmt::Debug for FailureAsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for FailureAsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = ChainFormat::MESSAGES.display(&self.0).to_string();
        f.write_str(text.trim_end())
    }
}

impl core::error::Error for FailureAsError {}

impl From<Failure> for FailureAsError {
    fn from(failure: Failure) -> Self {
        Self(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("outer")]
    struct Outer(#[source] Inner);

    #[derive(Debug, thiserror::Error)]
    #[error("inner")]
    struct Inner;

    #[test]
    fn error_chains_become_links() {
        let outer = Outer(Inner);
        let mut chain: Vec<&(dyn core::error::Error + 'static)> = vec![&outer];
        chain.push(&outer.0);

        let failure = from_error_chain("Outer", chain.into_iter(), Origin::new("lib.rs", 1)).unwrap();
        let labels: Vec<_> = failure
            .chain()
            .map(|link| format!("{}: {}", link.label(), link.message()))
            .collect();
        assert_eq!(labels, ["Outer: outer", "Caused by: inner"]);
    }

    #[test]
    fn failures_display_as_errors() {
        let failure = Failure::generic("Io", "disk gone", Origin::new("a.rs", 2));
        let error = FailureAsError::from(failure);
        assert_eq!(error.to_string(), "Io: disk gone in a.rs on line 2");
    }
}
