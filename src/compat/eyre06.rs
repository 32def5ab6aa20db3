//! Integration with the [`eyre`] 0.6.x error handling library.
//!
//! Requires the `compat-eyre06` feature flag.
//!
//! [`IntoFailure`] turns an [`eyre::Report`] into a [`Failure`] named
//! `eyre::Report`, with one `Caused by` link per error in its chain.
//! [`IntoEyre`] goes the other way through [`FailureAsError`].
//!
//! ```
//! use crashguard::{Failure, compat::IntoFailure};
//!
//! fn eyre_function() -> eyre::Result<String> {
//!     eyre::bail!("no such table");
//! }
//!
//! let failure = eyre_function().into_failure().unwrap_err();
//! assert_eq!(failure.message(), "no such table");
//! ```

use super::{FailureAsError, IntoFailure, from_error_chain};
use crate::{Failure, Origin};

impl IntoFailure for eyre::Report {
    type Output = Failure;

    #[track_caller]
    fn into_failure(self) -> Self::Output {
        let origin = Origin::caller();
        from_error_chain("eyre::Report", self.chain(), origin.clone())
            .unwrap_or_else(|| Failure::generic("eyre::Report", self.to_string(), origin))
    }
}

impl<T> IntoFailure for eyre::Result<T> {
    type Output = Result<T, Failure>;

    #[track_caller]
    fn into_failure(self) -> Self::Output {
        match self {
            Ok(value) => Ok(value),
            Err(report) => Err(report.into_failure()),
        }
    }
}

/// Converts failures into [`eyre::Report`]s.
pub trait IntoEyre {
    /// [`eyre::Report`] for failures, [`eyre::Result<T>`] for results.
    type Output;

    /// Performs the conversion.
    fn into_eyre(self) -> Self::Output;
}

impl IntoEyre for Failure {
    type Output = eyre::Report;

    fn into_eyre(self) -> Self::Output {
        eyre::Report::new(FailureAsError(self))
    }
}

impl<T> IntoEyre for Result<T, Failure> {
    type Output = eyre::Result<T>;

    fn into_eyre(self) -> Self::Output {
        self.map_err(IntoEyre::into_eyre)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_reports_keep_their_chain() {
        let report = eyre::eyre!("timeout").wrap_err("syncing replicas");
        let failure = report.into_failure();
        let messages: Vec<_> = failure.chain().map(Failure::message).collect();
        assert_eq!(messages, ["syncing replicas", "timeout"]);
        assert_eq!(failure.label(), "eyre::Report");
    }

    #[test]
    fn failures_become_reports() {
        let report = Failure::msg("out of retries").into_eyre();
        assert!(report.to_string().contains("out of retries"));
    }
}
