//! Integration with the [`anyhow`] 1.x error handling library.
//!
//! Requires the `compat-anyhow1` feature flag.
//!
//! [`IntoFailure`] turns an [`anyhow::Error`] into a [`Failure`] named
//! `anyhow::Error`, with one `Caused by` link per error in its chain.
//! [`IntoAnyhow`] goes the other way through [`FailureAsError`].
//!
//! ```
//! use crashguard::{Failure, compat::{IntoFailure, anyhow1::IntoAnyhow}};
//!
//! let error = anyhow::anyhow!("pool exhausted").context("request failed");
//! let failure: Failure = error.into_failure();
//! assert_eq!(failure.message(), "request failed");
//! assert_eq!(failure.previous().map(Failure::message), Some("pool exhausted"));
//!
//! let back: anyhow::Error = failure.into_anyhow();
//! assert!(back.to_string().contains("request failed"));
//! ```

use super::{FailureAsError, IntoFailure, from_error_chain};
use crate::{Failure, Origin};

impl IntoFailure for anyhow::Error {
    type Output = Failure;

    #[track_caller]
    fn into_failure(self) -> Self::Output {
        let origin = Origin::caller();
        from_error_chain("anyhow::Error", self.chain(), origin.clone())
            .unwrap_or_else(|| Failure::generic("anyhow::Error", self.to_string(), origin))
    }
}

impl<T> IntoFailure for anyhow::Result<T> {
    type Output = Result<T, Failure>;

    #[track_caller]
    fn into_failure(self) -> Self::Output {
        match self {
            Ok(value) => Ok(value),
            Err(error) => Err(error.into_failure()),
        }
    }
}

/// Converts failures into [`anyhow::Error`]s.
pub trait IntoAnyhow {
    /// [`anyhow::Error`] for failures, [`anyhow::Result<T>`] for results.
    type Output;

    /// Performs the conversion.
    fn into_anyhow(self) -> Self::Output;
}

impl IntoAnyhow for Failure {
    type Output = anyhow::Error;

    fn into_anyhow(self) -> Self::Output {
        anyhow::Error::new(FailureAsError(self))
    }
}

impl<T> IntoAnyhow for Result<T, Failure> {
    type Output = anyhow::Result<T>;

    fn into_anyhow(self) -> Self::Output {
        self.map_err(IntoAnyhow::into_anyhow)
    }
}
