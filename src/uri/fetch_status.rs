//! Fetch status codes
//!
//! Positive values are protocol response codes (HTTP status). Zero means the
//! URI has not been attempted. Negative values are crawler-internal outcomes.

/// Not yet attempted
pub const S_UNATTEMPTED: i32 = 0;
/// DNS lookup of the host failed
pub const S_DOMAIN_UNRESOLVABLE: i32 = -1;
/// Connection could not be established
pub const S_CONNECT_FAILED: i32 = -2;
/// Connection dropped mid-transfer
pub const S_CONNECT_LOST: i32 = -3;
/// Request timed out
pub const S_TIMEOUT: i32 = -4;
/// A processing stage failed with a recoverable error
pub const S_RUNTIME_EXCEPTION: i32 = -5;
/// Waiting on a prerequisite (e.g. robots.txt)
pub const S_DEFERRED: i32 = -50;
/// A prerequisite could not be obtained
pub const S_PREREQUISITE_FAILURE: i32 = -61;
/// The worker hit a serious (resource exhaustion) error
pub const S_SERIOUS_ERROR: i32 = -3000;
/// Rejected by the scope rules
pub const S_OUT_OF_SCOPE: i32 = -5000;
/// Blocked by operator settings
pub const S_BLOCKED_BY_USER: i32 = -5001;
/// The processing worker was killed
pub const S_PROCESSING_THREAD_KILLED: i32 = -7000;
/// Disallowed by the host's robots.txt
pub const S_ROBOTS_PRECLUDED: i32 = -9998;

/// Returns a short human-readable description of a fetch status
pub fn fetch_status_text(code: i32) -> &'static str {
    match code {
        S_UNATTEMPTED => "unattempted",
        S_DOMAIN_UNRESOLVABLE => "domain-unresolvable",
        S_CONNECT_FAILED => "connect-failed",
        S_CONNECT_LOST => "connect-lost",
        S_TIMEOUT => "timeout",
        S_RUNTIME_EXCEPTION => "runtime-exception",
        S_DEFERRED => "deferred",
        S_PREREQUISITE_FAILURE => "prerequisite-failure",
        S_SERIOUS_ERROR => "serious-error",
        S_OUT_OF_SCOPE => "out-of-scope",
        S_BLOCKED_BY_USER => "blocked-by-user",
        S_PROCESSING_THREAD_KILLED => "thread-killed",
        S_ROBOTS_PRECLUDED => "robots-precluded",
        c if (200..300).contains(&c) => "ok",
        c if (300..400).contains(&c) => "redirect",
        c if (400..500).contains(&c) => "client-error",
        c if c >= 500 => "server-error",
        _ => "unknown",
    }
}

/// Returns true for a completed protocol exchange with a usable response
pub fn is_success(code: i32) -> bool {
    (200..400).contains(&code)
}

/// Returns true for outcomes worth another attempt later
pub fn is_retryable(code: i32) -> bool {
    matches!(
        code,
        S_DOMAIN_UNRESOLVABLE
            | S_CONNECT_FAILED
            | S_CONNECT_LOST
            | S_TIMEOUT
            | S_PROCESSING_THREAD_KILLED
    )
}
