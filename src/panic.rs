//! Turning panics into failures.
//!
//! Panics reach the failure model in two ways:
//!
//! - Inside [`catch`], a panic unwinds to the caller and comes back as an
//!   `Err(Failure)` of kind [`FailureKind::Panic`], carrying the panic
//!   message and location. The dispatcher runs listeners and screens this
//!   way, so a listener that panics is handled exactly like one that returns
//!   an error.
//! - Outside of any [`catch`], the panic bridge hands the panic to the
//!   uncaught-failure sink of the current thread's [`ProcessRuntime`], or to
//!   the previously installed panic hook when the thread has no sink.
//!
//! The bridge is a process-wide panic hook installed once, the first time
//! it is needed. It wraps whatever hook was installed before it.
//!
//! Panicking from inside the bridge (for example in a listener that runs
//! while an uncaught panic is being delivered) aborts the process, as any
//! panic from inside a panic hook does.
//!
//! [`FailureKind::Panic`]: crate::FailureKind::Panic
//! [`ProcessRuntime`]: crate::runtime::ProcessRuntime

use std::{
    any::Any,
    cell::{Cell, RefCell},
    panic::{AssertUnwindSafe, PanicHookInfo},
};

use crate::{Failure, Origin, runtime::ProcessRuntime};

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Send + Sync + 'static>;

static BRIDGE: spin::Once<()> = spin::Once::new();

thread_local! {
    static CATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
    static CAUGHT: RefCell<Option<Failure>> = const { RefCell::new(None) };
}

/// Installs the panic bridge if it is not installed yet.
pub fn install_bridge() {
    BRIDGE.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| bridge(info, &previous)));
        tracing::debug!("panic bridge installed");
    });
}

/// Returns `true` once the panic bridge is installed.
pub fn bridge_installed() -> bool {
    BRIDGE.is_completed()
}

fn bridge(info: &PanicHookInfo<'_>, previous: &PanicHook) {
    let failure = crate::trace::attach_default(failure_from_hook(info));

    if CATCH_DEPTH.try_with(Cell::get).unwrap_or(0) > 0 {
        let _ = CAUGHT.try_with(|slot| {
            if let Ok(mut slot) = slot.try_borrow_mut() {
                *slot = Some(failure);
            }
        });
        return;
    }

    if !ProcessRuntime::deliver_panic(failure) {
        previous(info);
    }
}

fn failure_from_hook(info: &PanicHookInfo<'_>) -> Failure {
    let message = match info.payload_as_str() {
        Some(message) => message.to_owned(),
        None => String::from("Box<dyn Any>"),
    };
    let origin = info
        .location()
        .map_or_else(unknown_origin, |location| {
            Origin::new(location.file().to_owned(), location.line())
        });
    Failure::panic(message, origin)
}

/// Builds a failure from a panic payload, for panics the bridge did not see.
pub fn failure_from_payload(payload: &(dyn Any + Send)) -> Failure {
    let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("Box<dyn Any>")
    };
    Failure::panic(message, unknown_origin())
}

fn unknown_origin() -> Origin {
    Origin::new("<unknown>", 0)
}

struct CatchScope;

impl CatchScope {
    fn enter() -> Self {
        CATCH_DEPTH.with(|depth| depth.set(depth.get() + 1));
        CAUGHT.with(|slot| slot.borrow_mut().take());
        CatchScope
    }
}

impl Drop for CatchScope {
    fn drop(&mut self) {
        CATCH_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Runs `f`, turning a panic into a failure.
///
/// The panic is not printed by the panic hook. State shared with `f` may
/// be left half-updated by the panic.
///
/// ```
/// let failure = crashguard::panic::catch(|| -> u32 { panic!("listener broke") }).unwrap_err();
/// assert_eq!(failure.message(), "listener broke");
/// ```
pub fn catch<T>(f: impl FnOnce() -> T) -> Result<T, Failure> {
    install_bridge();
    let scope = CatchScope::enter();
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(f));
    drop(scope);

    outcome.map_err(|payload| {
        CAUGHT
            .with(|slot| slot.borrow_mut().take())
            .unwrap_or_else(|| failure_from_payload(&*payload))
    })
}

/// Like [`catch`], for closures that already return a failure.
pub fn catch_result<T>(f: impl FnOnce() -> Result<T, Failure>) -> Result<T, Failure> {
    catch(f).and_then(|result| result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FailureKind;

    #[test]
    fn panics_become_failures() {
        let failure = catch(|| -> () { panic!("broken {}", 42) }).unwrap_err();
        assert_eq!(failure.message(), "broken 42");
        assert_eq!(failure.kind(), &FailureKind::Panic);
        assert!(failure.origin().file().ends_with("panic.rs"));
        assert!(bridge_installed());
    }

    #[test]
    fn nested_catches() {
        let outer = catch(|| {
            let inner = catch(|| -> () { panic!("inner") });
            assert_eq!(inner.unwrap_err().message(), "inner");
            panic!("outer")
        });
        assert_eq!(outer.unwrap_err().message(), "outer");
        assert_eq!(CATCH_DEPTH.with(Cell::get), 0);
    }

    #[test]
    fn results_are_flattened() {
        assert_eq!(catch_result(|| Ok::<_, Failure>(3)).unwrap(), 3);
        let failure = catch_result(|| Err::<(), _>(Failure::msg("plain"))).unwrap_err();
        assert_eq!(failure.message(), "plain");
    }

    #[test]
    fn payload_fallback() {
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(failure_from_payload(&*payload).message(), "Box<dyn Any>");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(failure_from_payload(&*payload).message(), "owned");
    }
}
