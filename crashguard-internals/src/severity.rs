//! Diagnostic severities and the reporting mask.
//!
//! Every runtime diagnostic carries a [`Severity`], a single bit out of a
//! fixed table. The [`SeverityMask`] is the set of severities the host
//! currently *reports*; a diagnostic whose bit is missing from the mask is
//! considered suppressed.

use alloc::borrow::Cow;
use core::fmt;

/// The severity of a runtime diagnostic.
///
/// Each known severity maps to a single bit. Codes that do not correspond to
/// a known severity are preserved as [`Severity::Unknown`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    /// A fatal runtime error. This is the level used for shutdown-time
    /// fatal conditions, including out-of-memory.
    Error,
    /// A runtime warning.
    Warning,
    /// A parse error.
    Parse,
    /// A runtime notice.
    Notice,
    /// A fatal error raised by the runtime core.
    CoreError,
    /// A warning raised by the runtime core.
    CoreWarning,
    /// A fatal compile-time error.
    CompileError,
    /// A compile-time warning.
    CompileWarning,
    /// An error raised by user code.
    UserError,
    /// A warning raised by user code.
    UserWarning,
    /// A notice raised by user code.
    UserNotice,
    /// A strictness notice.
    Strict,
    /// A catchable fatal error.
    RecoverableError,
    /// Use of a deprecated facility.
    Deprecated,
    /// Use of a deprecated facility, raised by user code.
    UserDeprecated,
    /// A code outside the known table.
    Unknown(u32),
}

const TABLE: [(Severity, u32, &str); 15] = [
    (Severity::Error, 1, "Error"),
    (Severity::Warning, 2, "Warning"),
    (Severity::Parse, 4, "Parse error"),
    (Severity::Notice, 8, "Notice"),
    (Severity::CoreError, 16, "Core error"),
    (Severity::CoreWarning, 32, "Core warning"),
    (Severity::CompileError, 64, "Compile error"),
    (Severity::CompileWarning, 128, "Compile warning"),
    (Severity::UserError, 256, "User error"),
    (Severity::UserWarning, 512, "User warning"),
    (Severity::UserNotice, 1024, "User notice"),
    (Severity::Strict, 2048, "Strict notice"),
    (Severity::RecoverableError, 4096, "Recoverable error"),
    (Severity::Deprecated, 8192, "Deprecated"),
    (Severity::UserDeprecated, 16384, "User deprecated"),
];

impl Severity {
    /// The severity used for fatal conditions detected at shutdown.
    pub const FATAL: Self = Self::Error;

    /// Looks up the severity for a raw code.
    ///
    /// ```
    /// use crashguard_internals::severity::Severity;
    ///
    /// assert_eq!(Severity::from_code(2), Severity::Warning);
    /// assert_eq!(Severity::from_code(3), Severity::Unknown(3));
    /// ```
    pub fn from_code(code: u32) -> Self {
        TABLE
            .iter()
            .find(|(_, c, _)| *c == code)
            .map_or(Self::Unknown(code), |(severity, _, _)| *severity)
    }

    /// Returns the raw code of this severity.
    pub fn code(self) -> u32 {
        match self {
            Self::Unknown(code) => code,
            known => TABLE
                .iter()
                .find(|(severity, _, _)| *severity == known)
                .map_or(0, |(_, code, _)| *code),
        }
    }

    /// Returns the human readable name of this severity.
    pub fn name(self) -> Cow<'static, str> {
        match self {
            Self::Unknown(code) => Cow::Owned(alloc::format!("Unknown error ({code})")),
            known => Cow::Borrowed(
                TABLE
                    .iter()
                    .find(|(severity, _, _)| *severity == known)
                    .map_or("Unknown error", |(_, _, name)| *name),
            ),
        }
    }

    /// Returns `true` for the fatal error level.
    pub fn is_fatal(self) -> bool {
        self == Self::FATAL
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

bitflags::bitflags! {
    /// The set of severities the host currently reports.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct SeverityMask: u32 {
        /// [`Severity::Error`]
        const ERROR = 1;
        /// [`Severity::Warning`]
        const WARNING = 2;
        /// [`Severity::Parse`]
        const PARSE = 4;
        /// [`Severity::Notice`]
        const NOTICE = 8;
        /// [`Severity::CoreError`]
        const CORE_ERROR = 16;
        /// [`Severity::CoreWarning`]
        const CORE_WARNING = 32;
        /// [`Severity::CompileError`]
        const COMPILE_ERROR = 64;
        /// [`Severity::CompileWarning`]
        const COMPILE_WARNING = 128;
        /// [`Severity::UserError`]
        const USER_ERROR = 256;
        /// [`Severity::UserWarning`]
        const USER_WARNING = 512;
        /// [`Severity::UserNotice`]
        const USER_NOTICE = 1024;
        /// [`Severity::Strict`]
        const STRICT = 2048;
        /// [`Severity::RecoverableError`]
        const RECOVERABLE_ERROR = 4096;
        /// [`Severity::Deprecated`]
        const DEPRECATED = 8192;
        /// [`Severity::UserDeprecated`]
        const USER_DEPRECATED = 16384;
        /// Every known severity.
        const ALL = 32767;
    }
}

impl SeverityMask {
    /// Returns `true` when diagnostics of the given severity are reported.
    ///
    /// Unknown codes are reported when any of their bits are in the mask.
    pub fn reports(self, severity: Severity) -> bool {
        self.bits() & severity.code() != 0
    }

    /// Returns the mask with the bit of `severity` added.
    pub fn with(self, severity: Severity) -> Self {
        Self::from_bits_retain(self.bits() | severity.code())
    }

    /// Returns the mask with the bit of `severity` removed.
    pub fn without(self, severity: Severity) -> Self {
        Self::from_bits_retain(self.bits() & !severity.code())
    }
}

impl Default for SeverityMask {
    fn default() -> Self {
        Self::ALL
    }
}
