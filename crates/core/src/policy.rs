//! Return-code sentinels and the policy that turns attempts into an "executable" signal.
//!
//! Sentinel table (negative values never collide with real exit statuses):
//!
//! | code | meaning                                                        |
//! |------|----------------------------------------------------------------|
//! | -1   | run exceeded its wall-clock timeout and was killed             |
//! | -2   | the emulator could not be launched for this attempt            |
//! | -3   | the emulator refused the binary (loader/format error on stderr)|
//!
//! Processes killed by a signal report `128 + signal`, so an illegal-instruction
//! death is 132 and a segfault is 139. Which codes count as "could not execute under
//! this architecture" is configurable through [`ExecutionPolicy`]; the defaults treat
//! the three sentinels and SIGILL as negative and everything else (including crashes
//! and non-zero application exits) as positive.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub const TIMEOUT_RETURN_CODE: i32 = -1;
pub const LAUNCH_FAILURE_RETURN_CODE: i32 = -2;
pub const EMULATOR_ERROR_RETURN_CODE: i32 = -3;

/// Offset added to a terminating signal number, following shell convention.
pub const SIGNAL_EXIT_BASE: i32 = 128;

/// 128 + SIGILL.
pub const ILLEGAL_INSTRUCTION_RETURN_CODE: i32 = SIGNAL_EXIT_BASE + 4;

/// Classification knobs for emulator results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionPolicy {
    /// Return codes meaning "did not execute under this architecture".
    pub failure_return_codes: BTreeSet<i32>,
    /// Substrings the emulator prints on stderr when it rejects the binary itself.
    ///
    /// An attempt whose stderr contains one of these is recorded with
    /// [`EMULATOR_ERROR_RETURN_CODE`] regardless of the process exit status.
    pub emulator_error_markers: Vec<String>,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            failure_return_codes: [
                TIMEOUT_RETURN_CODE,
                LAUNCH_FAILURE_RETURN_CODE,
                EMULATOR_ERROR_RETURN_CODE,
                ILLEGAL_INSTRUCTION_RETURN_CODE,
            ]
            .into_iter()
            .collect(),
            emulator_error_markers: [
                "Invalid ELF image for this architecture",
                "Error while loading",
                "Error mapping file",
                "Unable to reserve",
                "exec format error",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl ExecutionPolicy {
    /// True when `return_code` counts as a real execution.
    pub fn is_success(&self, return_code: i32) -> bool {
        !self.failure_return_codes.contains(&return_code)
    }

    /// Return the emulator-error marker found in `stderr`, if any.
    pub fn emulator_error<'a>(&'a self, stderr: &[u8]) -> Option<&'a str> {
        let text = String::from_utf8_lossy(stderr);
        self.emulator_error_markers
            .iter()
            .find(|marker| !marker.is_empty() && text.contains(marker.as_str()))
            .map(String::as_str)
    }

    /// Replace the raw exit code with the emulator-error sentinel when stderr shows
    /// the emulator rejected the binary.
    pub fn normalize_return_code(&self, return_code: i32, stderr: &[u8]) -> i32 {
        if return_code == TIMEOUT_RETURN_CODE {
            return return_code;
        }
        match self.emulator_error(stderr) {
            Some(_) => EMULATOR_ERROR_RETURN_CODE,
            None => return_code,
        }
    }
}
