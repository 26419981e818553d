//! Process exit codes produced by goals.

use serde::{Deserialize, Serialize};

/// Exit code handed to the process-exit collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExitCode(i32);

impl ExitCode {
    /// Every subject succeeded
    pub const SUCCESS: Self = Self(0);
    /// At least one subject failed
    pub const FAILURE: Self = Self(1);

    /// Numeric code
    #[must_use]
    pub const fn code(&self) -> i32 {
        self.0
    }

    /// Check for success
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.0 == Self::SUCCESS.0
    }

    /// Success when `ok`, failure otherwise
    #[must_use]
    pub const fn from_success(ok: bool) -> Self {
        if ok { Self::SUCCESS } else { Self::FAILURE }
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
