#![deny(
    missing_docs,
    clippy::missing_safety_doc,
    clippy::undocumented_unsafe_blocks,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::broken_intra_doc_links,
    missing_copy_implementations,
    unused_doc_comments
)]
// Make docs.rs generate better docs
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Process-wide interception of runtime errors, uncaught failures and fatal
//! shutdowns.
//!
//! ## Overview
//!
//! A program registers one [`Dispatcher`] with its [`Runtime`]. From then
//! on:
//!
//! - every runtime diagnostic (a warning, a notice, a deprecation) goes
//!   through the dispatcher, which either suppresses it or turns it into a
//!   [`Failure`] the call site propagates with `?`
//! - every failure the program does not catch, including panics, is
//!   rendered by a [`Screen`] and stops the process with a fixed status
//! - a fatal error recorded when the process shuts down is rendered the same
//!   way, classified as out of memory when it looks like one
//!
//! Observers take part through the dispatcher's [`EventBus`]: they can
//! overturn suppression decisions, add to the failure being handled, or
//! handle failures of the screen itself. A failure raised by an observer
//! is never lost; it is chained together with the failure it interrupted.
//!
//! ## Quick Example
//!
//! ```no_run
//! use crashguard::{Dispatcher, DispatcherConfig, Severity, raise, runtime::ProcessRuntime};
//!
//! fn main() -> std::process::ExitCode {
//!     let runtime = ProcessRuntime::current();
//!     let dispatcher = Dispatcher::with_config(runtime.clone(), DispatcherConfig::from_env());
//!     dispatcher.register();
//!
//!     runtime.run(|| {
//!         raise!(Severity::Warning, "cache directory {} is missing", "/var/cache/app")?;
//!         Ok(())
//!     })
//! }
//! ```
//!
//! ## Failures
//!
//! A [`Failure`] is one failure occurrence: a [`FailureKind`], a message, an
//! [`Origin`], an optional trace and an optional link to the failure before
//! it. Failures are cheap to clone and immutable once shared. Any
//! [`core::error::Error`] converts into a failure with `?`, keeping its
//! source chain as linked failures.
//!
//! ## Layout
//!
//! - [`dispatcher`]: the [`Dispatcher`] and its handling rules
//! - [`events`]: the [`EventBus`] and the dispatcher's events
//! - [`runtime`]: the [`Runtime`] capability set and [`ProcessRuntime`]
//! - [`screen`]: the [`Screen`] trait with a text and an HTML screen
//! - [`output`]: stacked output buffers
//! - [`panic`]: turning panics into failures
//! - [`format`]: plain text rendering of chains
//! - [`trace`]: stack traces (with the `backtrace` feature)
//! - [`config`]: [`DispatcherConfig`] and its environment variables
//! - [`compat`]: conversions from `anyhow` and `eyre`
//!
//! ## Features
//!
//! - `backtrace` (default): capture stack traces for raised failures
//! - `compat-anyhow1`: conversions to and from `anyhow` 1.x
//! - `compat-eyre06`: conversions to and from `eyre` 0.6.x
//!
//! ## Threads
//!
//! Dispatchers and [`ProcessRuntime`] state are per thread and are neither
//! `Send` nor `Sync`. Failures are `Send + Sync` and can be moved freely.
//!
//! [`ProcessRuntime`]: runtime::ProcessRuntime
//! [`Runtime`]: runtime::Runtime
//! [`Screen`]: screen::Screen
//! [`EventBus`]: events::EventBus

#[macro_use]
mod macros;

pub mod compat;
pub mod config;
pub mod dispatcher;
pub mod events;
pub mod format;
pub mod output;
pub mod panic;
pub mod prelude;
pub mod runtime;
pub mod screen;
pub mod trace;

pub use crashguard_internals::{
    failure::{Chain, Failure, FailureKind, Origin, TraceData},
    severity::{Severity, SeverityMask},
};

pub use self::{
    config::DispatcherConfig,
    dispatcher::{Dispatcher, EXIT_STATUS},
};

#[doc(hidden)]
pub mod __private {
    #[doc(hidden)]
    pub use std::{format, result::Result::Err};
}
