//! Commonly used items for convenient importing.
//!
//! ```rust
//! use crashguard::prelude::*;
//!
//! fn parse_port(text: &str) -> Result<u16, Failure> {
//!     let Ok(port) = text.parse() else {
//!         bail!("not a port: {text}");
//!     };
//!     Ok(port)
//! }
//!
//! assert_eq!(parse_port("443").unwrap(), 443);
//! ```

#[cfg(feature = "backtrace")]
pub use crate::trace::TraceExt;
pub use crate::{
    Dispatcher, DispatcherConfig, Failure, FailureKind, Origin, Severity, SeverityMask, bail,
    compat::IntoFailure, events::EventBus, failure, raise, screen::Screen,
};
