//! Stack traces for failures.
//!
//! With the `backtrace` feature, failures can carry a [`Trace`] of the stack
//! at the point they were raised. Frames belonging to this crate and the
//! standard library are filtered from the start and end of the trace so the
//! first frame shown is the code that raised the failure.
//!
//! Filtering is controlled by the environment:
//!
//! - `RUST_BACKTRACE=full` disables filtering and the frame limit
//! - `RUST_BACKTRACE=0` disables trace capture
//!
//! Without the feature, nothing is captured.

use crate::Failure;

#[cfg(feature = "backtrace")]
pub use self::capture::{Trace, TraceExt, TraceFilter, TraceFrame};

/// Attaches a trace captured with the environment's filter, unless the
/// failure already has one.
pub(crate) fn attach_default(failure: Failure) -> Failure {
    #[cfg(feature = "backtrace")]
    {
        if failure.trace().is_none()
            && let Some(filter) = TraceFilter::from_env()
            && let Some(trace) = Trace::capture(&filter)
        {
            return failure.with_trace(trace);
        }
    }
    failure
}

#[cfg(feature = "backtrace")]
mod capture {
    use std::{borrow::Cow, fmt, sync::OnceLock};

    use backtrace::BytesOrWideString;

    use crate::Failure;

    /// A captured stack trace, most recent frame first.
    #[derive(Clone, Debug)]
    pub struct Trace {
        /// The frames that survived filtering.
        pub frames: Vec<TraceFrame>,
        /// How many frames were filtered out.
        pub omitted_frames: usize,
    }

    /// A single frame of a [`Trace`].
    #[derive(Clone, Debug)]
    pub struct TraceFrame {
        /// The demangled symbol, without its hash.
        pub symbol: String,
        /// The source file, if known.
        pub file: Option<String>,
        /// The source line, if known.
        pub line: Option<u32>,
        /// The crate the frame belongs to, when it could be told from the
        /// file path.
        pub crate_name: Option<Cow<'static, str>>,
    }

    /// Which frames to keep in a [`Trace`].
    #[derive(Copy, Clone, Debug)]
    pub struct TraceFilter {
        /// Crates whose frames are dropped from the start of the trace.
        pub skipped_initial_crates: &'static [&'static str],
        /// Crates whose frames are dropped from the end of the trace.
        pub skipped_final_crates: &'static [&'static str],
        /// The maximum number of frames kept.
        pub max_frames: usize,
    }

    impl TraceFilter {
        /// Default filter settings.
        pub const DEFAULT: Self = Self {
            skipped_initial_crates: &["backtrace", "crashguard", "core", "std", "alloc"],
            skipped_final_crates: &["std", "core", "alloc"],
            max_frames: 20,
        };

        /// Keeps every frame.
        pub const UNFILTERED: Self = Self {
            skipped_initial_crates: &[],
            skipped_final_crates: &[],
            max_frames: usize::MAX,
        };

        /// The filter selected by `RUST_BACKTRACE`, or `None` when capture is
        /// disabled.
        pub fn from_env() -> Option<Self> {
            static FILTER: OnceLock<Option<TraceFilter>> = OnceLock::new();

            *FILTER.get_or_init(|| match std::env::var_os("RUST_BACKTRACE") {
                Some(var) if var == "0" => None,
                Some(var) if var == "full" => Some(Self::UNFILTERED),
                _ => Some(Self::DEFAULT),
            })
        }
    }

    impl Default for TraceFilter {
        fn default() -> Self {
            Self::DEFAULT
        }
    }

    fn crate_of(path: &str) -> Option<Cow<'static, str>> {
        static REGEXES: OnceLock<Option<[regex::Regex; 2]>> = OnceLock::new();
        const OWN_SOURCES: [&str; 2] = [
            concat!(env!("CARGO_MANIFEST_DIR"), "/src/"),
            concat!(env!("CARGO_MANIFEST_DIR"), "/crashguard-internals/src/"),
        ];

        if OWN_SOURCES.iter().any(|prefix| path.starts_with(prefix)) {
            return Some(Cow::Borrowed("crashguard"));
        }

        let regexes = REGEXES.get_or_init(|| {
            Some([
                // /lib/rustlib/src/rust/library/{std|core|alloc}/src/...
                // /rustc/{hash}/library/{std|core|alloc}/src/...
                regex::Regex::new(
                    r"(?:/lib/rustlib/src/rust|^/rustc/[0-9a-f]{40})/library/(std|core|alloc)/src/",
                )
                .ok()?,
                // /.cargo/registry/src/{index}-{hash}/{crate}-{version}/src/...
                regex::Regex::new(r"/\.cargo/registry/src/[^/]+-[0-9a-f]{16}/([^./]+)-[0-9]+\.[^/]*/src/")
                    .ok()?,
            ])
        });

        regexes.as_ref()?.iter().find_map(|regex| {
            regex
                .captures(path)
                .and_then(|captures| captures.get(1))
                .map(|name| Cow::Owned(name.as_str().to_owned()))
        })
    }

    fn path_string(path: BytesOrWideString<'_>) -> String {
        path.to_str_lossy().replace('\\', "/")
    }

    impl Trace {
        /// Captures the current stack, applying `filter`.
        ///
        /// Returns `None` when no frame could be resolved.
        pub fn capture(filter: &TraceFilter) -> Option<Self> {
            let mut frames: Vec<TraceFrame> = Vec::new();
            let mut omitted_frames = 0;
            let mut initial_filtering = !filter.skipped_initial_crates.is_empty();

            backtrace::trace(|frame| {
                backtrace::resolve_frame(frame, |symbol| {
                    let Some(name) = symbol.name() else {
                        return;
                    };
                    if frames.len() >= filter.max_frames {
                        omitted_frames += 1;
                        return;
                    }

                    let file = symbol.filename_raw().map(path_string);
                    let crate_name = file.as_deref().and_then(crate_of);

                    if initial_filtering {
                        let skipped = crate_name.as_deref().is_some_and(|name| {
                            filter.skipped_initial_crates.contains(&name)
                        }) || file.is_none();
                        if skipped {
                            omitted_frames += 1;
                            return;
                        }
                        initial_filtering = false;
                    }

                    frames.push(TraceFrame {
                        symbol: format!("{name:#}"),
                        file,
                        line: symbol.lineno(),
                        crate_name,
                    });
                });
                true
            });

            while let Some(last) = frames.last() {
                let runtime_frame = last
                    .crate_name
                    .as_deref()
                    .is_some_and(|name| filter.skipped_final_crates.contains(&name))
                    || last.symbol.starts_with("__libc_start")
                    || last.symbol == "_start";
                if !runtime_frame {
                    break;
                }
                frames.pop();
                omitted_frames += 1;
            }

            if frames.is_empty() {
                None
            } else {
                Some(Self {
                    frames,
                    omitted_frames,
                })
            }
        }
    }

    impl fmt::Display for Trace {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            for (index, frame) in self.frames.iter().enumerate() {
                if index > 0 {
                    writeln!(f)?;
                }
                write!(f, "#{index} {}", frame.symbol)?;
                if let Some(file) = &frame.file {
                    write!(f, "\n    at {file}")?;
                    if let Some(line) = frame.line {
                        write!(f, ":{line}")?;
                    }
                }
            }
            if self.omitted_frames > 0 {
                write!(f, "\n... {} frames omitted", self.omitted_frames)?;
            }
            Ok(())
        }
    }

    /// Extension trait for attaching traces to failures.
    pub trait TraceExt: Sized {
        /// Attaches a trace captured with [`TraceFilter::DEFAULT`].
        fn attach_trace(self) -> Self {
            self.attach_trace_with_filter(&TraceFilter::DEFAULT)
        }

        /// Attaches a trace captured with `filter`.
        fn attach_trace_with_filter(self, filter: &TraceFilter) -> Self;
    }

    impl TraceExt for Failure {
        fn attach_trace_with_filter(self, filter: &TraceFilter) -> Self {
            match Trace::capture(filter) {
                Some(trace) => self.with_trace(trace),
                None => self,
            }
        }
    }

    impl<T> TraceExt for Result<T, Failure> {
        fn attach_trace_with_filter(self, filter: &TraceFilter) -> Self {
            self.map_err(|failure| failure.attach_trace_with_filter(filter))
        }
    }

}
