use serde::{Deserialize, Serialize};

/// Failure taxonomy shared by the wire protocol and the registry.
///
/// `InputError` means the job payload itself is unusable; retrying would
/// reproduce the failure. `SystemError` means the execution environment
/// failed and another attempt may succeed. `CoordinationTimeout` is never
/// reported by a worker; the sweeper synthesizes it when a lease lapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ProtocolError,
    InputError,
    SystemError,
    CoordinationTimeout,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::ProtocolError => write!(f, "protocol_error"),
            ErrorKind::InputError => write!(f, "input_error"),
            ErrorKind::SystemError => write!(f, "system_error"),
            ErrorKind::CoordinationTimeout => write!(f, "coordination_timeout"),
        }
    }
}

/// What the coordinator does with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue the job. When `escalate` is set the tier reservation is
    /// dropped so the whole fleet may pick it up.
    Retry { escalate: bool },
    /// Terminalize the job as Failed.
    Terminal,
}

/// Retries stop being tier-picky once a job has failed this many attempts.
const ESCALATION_ATTEMPT: u32 = 2;

/// Map a reported failure into a retry decision.
///
/// The worker agent is the component that observes the execution step, so
/// its `kind` tag is trusted; the attempt ceiling is enforced separately by
/// the registry. A `retryable = false` hint from the worker forces terminal
/// regardless of kind.
pub fn classify(
    kind: ErrorKind,
    stage: Option<&str>,
    retryable_hint: bool,
    attempt: u32,
) -> RetryDecision {
    if !retryable_hint {
        return RetryDecision::Terminal;
    }

    match kind {
        ErrorKind::InputError | ErrorKind::ProtocolError => RetryDecision::Terminal,
        ErrorKind::SystemError | ErrorKind::CoordinationTimeout => {
            let oom = stage.is_some_and(|s| s.eq_ignore_ascii_case("oom"));
            RetryDecision::Retry {
                escalate: oom || attempt >= ESCALATION_ATTEMPT,
            }
        }
    }
}
