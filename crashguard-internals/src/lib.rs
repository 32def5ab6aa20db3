#![no_std]
#![forbid(
    missing_docs,
    clippy::alloc_instead_of_core,
    clippy::std_instead_of_alloc,
    clippy::std_instead_of_core,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::broken_intra_doc_links,
    missing_copy_implementations
)]
// `bitflags!` expands to `#[allow(unused_doc_comments)]`, which `forbid` rejects.
#![deny(unused_doc_comments)]
//! Internal data model for [`crashguard`].
//!
//! # Overview
//!
//! This crate holds the failure model the dispatcher in [`crashguard`] works
//! on. It has no knowledge of the runtime, events or screens, and it builds
//! without `std`.
//!
//! **This crate is an implementation detail.** No semantic versioning guarantees
//! are provided. Users should depend on the [`crashguard`] crate, not this one.
//!
//! # Layout
//!
//! - **[`severity`]**: the [`Severity`] table and the [`SeverityMask`] used to
//!   decide whether a diagnostic is suppressed
//! - **[`failure`]**: the reference counted [`Failure`] record with its
//!   [`FailureKind`] and [`Origin`]
//!   - [`failure::chain`]: cycle-safe chain walking and chain splicing
//!
//! [`crashguard`]: https://docs.rs/crashguard/latest/crashguard/
//! [`Severity`]: severity::Severity
//! [`SeverityMask`]: severity::SeverityMask
//! [`Failure`]: failure::Failure
//! [`FailureKind`]: failure::FailureKind
//! [`Origin`]: failure::Origin

extern crate alloc;

pub mod failure;
pub mod severity;
