//! Maps raw transport and API faults onto a small user-facing taxonomy.
//!
//! The output is a formatted transcript message, not a machine-readable
//! code: the only consumer is the chat transcript, where the errored turn
//! replaces the streamed reply.

/// How many characters of an unrecognized fault survive into the fallback
/// reason line.
const UNKNOWN_REASON_LIMIT: usize = 50;

const ERROR_HEADER: &str = "**The assistant could not reply**";

/// A classified fault: what went wrong and what the user can do about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultClass {
    pub reason: String,
    pub remediation: String,
}

impl FaultClass {
    fn new(reason: &str, remediation: &str) -> Self {
        Self {
            reason: reason.to_string(),
            remediation: remediation.to_string(),
        }
    }

    /// Render the transcript message carried by the turn's error event.
    pub fn to_transcript_message(&self) -> String {
        format!(
            "{ERROR_HEADER}\n\n**Reason**: {}\n\n**Suggestion**: {}",
            self.reason, self.remediation
        )
    }
}

/// Classify a raw fault string. Patterns are checked in order and the first
/// match wins; anything unrecognized falls through to a truncated echo of
/// the raw text.
pub fn classify_fault(raw: &str) -> FaultClass {
    if raw.contains("400") {
        return FaultClass::new(
            "The request format was invalid",
            "Check your input for content the service refuses to process.",
        );
    }
    if raw.contains("401") || raw.contains("API key not valid") {
        return FaultClass::new(
            "The API key was rejected",
            "Check the key configured for this persona.",
        );
    }
    if raw.contains("403") {
        return FaultClass::new(
            "Access was denied",
            "The key may lack permission for this model, or the service is restricted in your region.",
        );
    }
    if raw.contains("429") {
        return FaultClass::new(
            "Requests are being rate limited",
            "You hit the API rate limit. Wait a moment and try again.",
        );
    }
    if raw.contains("500") || raw.contains("503") {
        return FaultClass::new(
            "The model service reported an upstream fault",
            "The service is temporarily unavailable. Try again later.",
        );
    }
    if is_network_fault(raw) {
        return FaultClass::new(
            "The network connection failed",
            "Check your connectivity and that the API endpoint is reachable.",
        );
    }

    FaultClass {
        reason: truncate_reason(raw),
        remediation: "Try sending the message again.".to_string(),
    }
}

/// Classified message for the redesigned credential flow: no key configured
/// for the persona and none available from the environment.
pub fn missing_credential() -> FaultClass {
    FaultClass::new(
        "No API key is configured",
        "Set a key for this persona, or export GEMINI_API_KEY in the environment.",
    )
}

/// Classified message for a turn started without an eligible prompt.
pub fn empty_prompt() -> FaultClass {
    FaultClass::new(
        "There was no message to send",
        "Type a message before sending.",
    )
}

/// Convenience for the pipeline: classify and render in one step.
pub fn format_turn_error(raw: &str) -> String {
    classify_fault(raw).to_transcript_message()
}

fn is_network_fault(raw: &str) -> bool {
    let lowered = raw.to_lowercase();
    ["fetch failed", "dns error", "connection refused", "connect error", "timed out", "error sending request"]
        .iter()
        .any(|pattern| lowered.contains(pattern))
}

fn truncate_reason(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() > UNKNOWN_REASON_LIMIT {
        let mut reason: String = trimmed.chars().take(UNKNOWN_REASON_LIMIT).collect();
        reason.push_str("...");
        reason
    } else if trimmed.is_empty() {
        "An unknown error occurred".to_string()
    } else {
        trimmed.to_string()
    }
}
