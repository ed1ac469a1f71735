// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Logging facade shared by the survey sync crates
//!
//! Wraps `emit` so every crate logs the same way and a single environment
//! variable decides what reaches the terminal.
//!
//! Usage:
//! - Set SURVEYSYNC_LOG=off (default) - no logs
//! - Set SURVEYSYNC_LOG=info - sync progress, cursor movement
//! - Set SURVEYSYNC_LOG=debug - per-submission and per-object detail

use std::sync::Once;

// Re-export emit so macros can use it
pub use emit;

/// Environment variable consulted by [`init_diagnostics`]
pub const LOG_ENV_VAR: &str = "SURVEYSYNC_LOG";

static INIT: Once = Once::new();

/// Map a `SURVEYSYNC_LOG` value onto a minimum level, `None` meaning logging is off.
///
/// Unknown values fall back to `Info`; the second tuple element reports that.
pub fn parse_level(value: &str) -> (Option<emit::Level>, bool) {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "off" => (None, true),
        "debug" => (Some(emit::Level::Debug), true),
        "info" => (Some(emit::Level::Info), true),
        "warn" => (Some(emit::Level::Warn), true),
        "error" => (Some(emit::Level::Error), true),
        _ => (Some(emit::Level::Info), false),
    }
}

/// Initialize diagnostics based on the SURVEYSYNC_LOG environment variable
///
/// Call once at application startup. Later calls are ignored.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let log_level = std::env::var(LOG_ENV_VAR).unwrap_or_else(|_| "off".to_string());
        let (level, recognized) = parse_level(&log_level);

        let Some(level) = level else {
            return;
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(level))
            .init();

        if !recognized {
            emit::warn!("Unknown {var} value {log_level}, using info", var: LOG_ENV_VAR);
        }

        // The runtime must outlive every emitting thread.
        std::mem::forget(rt);
    });
}

/// Log basic operations (sync runs, cursor updates, table writes)
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Log detailed diagnostics (object keys, per-attachment transfers, batch planning)
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Log recoverable conditions (retries, skipped submissions)
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

/// Log failures that abort a submission or a whole sync run
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

/// Re-export the init function for convenience
pub use init_diagnostics as init;
