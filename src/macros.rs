/// Creates a [`Failure`](crate::Failure) at the current location.
///
/// With a string literal first, the arguments are interpreted like
/// [`format!()`](std::format) and the failure is a generic `Failure`.
/// Any other expression is converted with `Failure::from`, so errors keep
/// their source chain.
///
/// # Examples
///
/// ```
/// use crashguard::failure;
///
/// let port = 8080;
/// let failure = failure!("port {port} is taken");
/// assert_eq!(failure.message(), "port 8080 is taken");
///
/// let failure = failure!(std::io::Error::other("socket closed"));
/// assert_eq!(failure.message(), "socket closed");
/// ```
#[macro_export]
macro_rules! failure {
    ($msg:literal $(,)?) => {
        $crate::Failure::msg($crate::__private::format!($msg))
    };
    ($err:expr $(,)?) => {
        $crate::Failure::from($err)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Failure::msg($crate::__private::format!($fmt, $($arg)*))
    };
}

/// Return early with a failure.
///
/// This is equivalent to writing `return Err(failure!(...).into());`
///
/// # Examples
///
/// ```
/// use crashguard::{Failure, bail};
///
/// fn check(value: i32) -> Result<(), Failure> {
///     if value < 0 {
///         bail!("value must be non-negative, got {}", value);
///     }
///     Ok(())
/// }
///
/// assert!(check(-1).is_err());
/// ```
#[macro_export]
macro_rules! bail {
    ($($args:tt)*) => {
        return $crate::__private::Err($crate::failure!($($args)*).into())
    };
}

/// Reports a diagnostic through the current thread's
/// [`ProcessRuntime`](crate::runtime::ProcessRuntime).
///
/// Takes a [`Severity`](crate::Severity) followed by
/// [`format!()`](std::format) arguments and evaluates to
/// `Result<(), Failure>`.
///
/// # Examples
///
/// ```
/// use crashguard::{Failure, Severity, raise};
///
/// fn load(name: &str) -> Result<(), Failure> {
///     raise!(Severity::Deprecated, "{name}: the v1 format is deprecated")?;
///     Ok(())
/// }
/// # crashguard::runtime::ProcessRuntime::current().set_error_reporting(crashguard::SeverityMask::empty());
/// # load("settings.toml").unwrap();
/// ```
#[macro_export]
macro_rules! raise {
    ($severity:expr, $($arg:tt)+) => {
        $crate::runtime::raise($severity, $crate::__private::format!($($arg)+))
    };
}
