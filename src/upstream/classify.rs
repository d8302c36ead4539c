/// Verdict on a single upstream attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    /// Worth trying the next region.
    Retryable,
    /// Surfaced immediately; no further regions are tried.
    Terminal,
}

/// Body substrings that mark an otherwise-terminal status as retryable.
const RETRYABLE_MARKERS: &[&str] = &["capacity", "overloaded", "unavailable"];

/// Classify an upstream HTTP outcome.
///
/// 2xx is success. 429, 500 and 503 are retryable, as is any response whose
/// body mentions a capacity condition. Every other status (including other
/// 4xx and 3xx) is terminal.
pub fn classify(status: u16, body: &str) -> Classification {
    if (200..300).contains(&status) {
        return Classification::Success;
    }

    if matches!(status, 429 | 500 | 503) {
        return Classification::Retryable;
    }

    let lower = body.to_ascii_lowercase();
    if RETRYABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        return Classification::Retryable;
    }

    Classification::Terminal
}
