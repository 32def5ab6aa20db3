//! Integration tests for the failure model.
//!
//! - `test_error_conversion_keeps_sources`: `?` conversion from std errors
//! - `test_join_preserves_identity_of_earlier_chain`: splicing keeps the
//!   earlier nodes shared
//! - `test_join_leaves_inputs_untouched`: splicing never mutates its inputs
//! - `test_trace_survives_join`: attached traces are carried into copies
//! - `test_suppression_flag_round_trip`: copy-on-write suppression

use std::io;

use crashguard_internals::{
    failure::{Failure, FailureKind, Origin},
    severity::Severity,
};

fn read_config() -> Result<(), Failure> {
    let result: Result<(), io::Error> =
        Err(io::Error::new(io::ErrorKind::NotFound, "config.toml missing"));
    result?;
    Ok(())
}

#[test]
fn test_error_conversion_keeps_sources() {
    let failure = read_config().unwrap_err();
    assert_eq!(failure.message(), "config.toml missing");
    assert_eq!(
        failure.kind(),
        &FailureKind::Generic {
            name: "Error".into()
        }
    );
    assert!(failure.origin().file().ends_with("integration_tests.rs"));
}

#[test]
fn test_join_preserves_identity_of_earlier_chain() {
    let original = Failure::error(Severity::Warning, "Test runtime", Origin::new("app.rs", 3));
    let listener = Failure::msg("listener failed");

    let joined = Failure::join(original.clone(), listener.clone());
    let wrapper = Failure::chained("wrapped", joined);

    let nodes: Vec<&Failure> = wrapper.chain().collect();
    assert_eq!(nodes.len(), 3);
    assert_eq!(nodes[1].message(), "listener failed");
    assert!(nodes[2].ptr_eq(&original));
    assert_eq!(wrapper.kind(), &FailureKind::Chained);
}

#[test]
fn test_join_leaves_inputs_untouched() {
    let earlier = Failure::msg("earlier");
    let later = Failure::msg("later");
    let _ = Failure::join(earlier.clone(), later.clone());
    assert!(earlier.previous().is_none());
    assert!(later.previous().is_none());
}

#[test]
fn test_trace_survives_join() {
    let earlier = Failure::msg("earlier");
    let later = Failure::msg("later").with_trace("#0 main");
    let joined = Failure::join(earlier, later);
    assert_eq!(joined.trace().map(|t| t.to_string()).as_deref(), Some("#0 main"));
}

#[test]
fn test_suppression_flag_round_trip() {
    let failure = Failure::error(Severity::Notice, "n", Origin::new("a", 1)).with_suppressed(true);
    assert!(failure.is_suppressed());
    let forced = failure.clone().with_suppressed(false);
    assert!(!forced.is_suppressed());
    assert!(failure.is_suppressed());
}
