//! Stable exit codes for cortex CLI commands.

/// Command succeeded; for `cortex run`, the integrator produced a recommendation.
pub const OK: i32 = 0;
/// Invalid usage, configuration or I/O failure.
pub const INVALID: i32 = 1;
/// `cortex run` was aborted by a systemic error (invalid plan, stall, cancellation).
pub const ABORTED: i32 = 2;
/// `cortex run` completed but the integrator stage failed.
pub const INTEGRATION_FAILED: i32 = 3;
