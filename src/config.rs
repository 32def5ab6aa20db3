//! Dispatcher settings.
//!
//! A [`DispatcherConfig`] is what a [`Dispatcher`](crate::Dispatcher) is
//! built from. Everything except the reserved memory can also be changed on
//! the dispatcher later.
//!
//! # Environment Variables
//!
//! [`DispatcherConfig::from_env`] starts from the defaults and reads:
//!
//! - `CRASHGUARD_DEBUG` - `1`, `true`, `yes` or `on` enables debug mode
//! - `CRASHGUARD_RESERVED_MEMORY` - the size of the reserved memory block in
//!   bytes, `0` disables it
//!
//! The environment is read once per process.

use std::{path::PathBuf, sync::OnceLock};

/// Settings for a [`Dispatcher`](crate::Dispatcher).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Show failure details instead of a generic message.
    pub debug: bool,
    /// Unwind output buffers before rendering.
    pub clean_buffers: bool,
    /// In debug mode, print failures that the screen could not render and
    /// nobody else handled.
    pub print_unhandled_in_debug: bool,
    /// Bytes kept allocated until shutdown, so shutdown has memory to work
    /// with after an out of memory condition.
    pub reserved_memory: usize,
    /// The directory to switch back to before handling a fatal error.
    pub working_directory: Option<PathBuf>,
}

impl DispatcherConfig {
    /// The default size of the reserved memory block.
    pub const DEFAULT_RESERVED_MEMORY: usize = 10 * 1024;

    /// Creates the default configuration.
    ///
    /// The working directory is the current directory at the time of the
    /// call, if it can be read.
    pub fn new() -> Self {
        Self {
            debug: false,
            clean_buffers: true,
            print_unhandled_in_debug: true,
            reserved_memory: Self::DEFAULT_RESERVED_MEMORY,
            working_directory: std::env::current_dir().ok(),
        }
    }

    /// Creates the default configuration, overridden by the environment.
    pub fn from_env() -> Self {
        let options = EnvOptions::get();
        let mut config = Self::new();
        if let Some(debug) = options.debug {
            config.debug = debug;
        }
        if let Some(reserved_memory) = options.reserved_memory {
            config.reserved_memory = reserved_memory;
        }
        config
    }

    /// Sets [`debug`](Self::debug).
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sets [`clean_buffers`](Self::clean_buffers).
    #[must_use]
    pub fn with_clean_buffers(mut self, clean_buffers: bool) -> Self {
        self.clean_buffers = clean_buffers;
        self
    }

    /// Sets [`print_unhandled_in_debug`](Self::print_unhandled_in_debug).
    #[must_use]
    pub fn with_print_unhandled_in_debug(mut self, print: bool) -> Self {
        self.print_unhandled_in_debug = print;
        self
    }

    /// Sets [`reserved_memory`](Self::reserved_memory).
    #[must_use]
    pub fn with_reserved_memory(mut self, bytes: usize) -> Self {
        self.reserved_memory = bytes;
        self
    }

    /// Sets [`working_directory`](Self::working_directory).
    #[must_use]
    pub fn with_working_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(path.into());
        self
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct EnvOptions {
    debug: Option<bool>,
    reserved_memory: Option<usize>,
}

impl EnvOptions {
    fn get() -> &'static Self {
        static CRASHGUARD_FLAGS: OnceLock<EnvOptions> = OnceLock::new();

        CRASHGUARD_FLAGS.get_or_init(|| {
            let debug = std::env::var_os("CRASHGUARD_DEBUG").map(|var| parse_flag(&var.to_string_lossy()));
            let reserved_memory = std::env::var_os("CRASHGUARD_RESERVED_MEMORY").and_then(|var| {
                let value = var.to_string_lossy();
                match value.trim().parse() {
                    Ok(bytes) => Some(bytes),
                    Err(err) => {
                        tracing::warn!(%value, %err, "ignoring invalid CRASHGUARD_RESERVED_MEMORY");
                        None
                    }
                }
            });
            EnvOptions {
                debug,
                reserved_memory,
            }
        })
    }
}

fn parse_flag(value: &str) -> bool {
    ["1", "true", "yes", "on"]
        .iter()
        .any(|flag| value.trim().eq_ignore_ascii_case(flag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DispatcherConfig::default();
        assert!(!config.debug);
        assert!(config.clean_buffers);
        assert!(config.print_unhandled_in_debug);
        assert_eq!(config.reserved_memory, 10240);
    }

    #[test]
    fn builders() {
        let config = DispatcherConfig::new()
            .with_debug(true)
            .with_clean_buffers(false)
            .with_reserved_memory(0)
            .with_working_directory("/srv/app");
        assert!(config.debug);
        assert!(!config.clean_buffers);
        assert_eq!(config.reserved_memory, 0);
        assert_eq!(config.working_directory, Some(PathBuf::from("/srv/app")));
    }

    #[test]
    fn flags() {
        assert!(parse_flag("1"));
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" on "));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("off"));
        assert!(!parse_flag(""));
    }
}
