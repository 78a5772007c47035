//! Security utilities for rotation
//!
//! Provides:
//! - Audit logging of per-store operations (never logs secret values)
//! - Error sanitization

use regex::Regex;
use std::sync::LazyLock;

/// Audit entry for one operation on a store or key slot
#[derive(Debug, Clone)]
pub struct AuditLog {
    pub operation: String,
    pub target: String,
    pub session_id: String,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl AuditLog {
    pub fn new(
        operation: impl Into<String>,
        target: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            target: target.into(),
            session_id: session_id.into(),
            success: true,
            error: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Mark the entry failed; the message is sanitized
    pub fn with_error(mut self, error: impl AsRef<str>) -> Self {
        self.success = false;
        self.error = Some(sanitize_error(error.as_ref()));
        self
    }

    /// Emit the entry on the `keyrot::audit` target
    pub fn log(&self) {
        if self.success {
            tracing::info!(
                target: "keyrot::audit",
                operation = %self.operation,
                target_path = %self.target,
                session_id = %self.session_id,
                timestamp = %self.timestamp.to_rfc3339(),
                "Operation succeeded"
            );
        } else {
            tracing::warn!(
                target: "keyrot::audit",
                operation = %self.operation,
                target_path = %self.target,
                session_id = %self.session_id,
                error = ?self.error,
                timestamp = %self.timestamp.to_rfc3339(),
                "Operation failed"
            );
        }
    }
}

static REDACTIONS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        // age secret keys
        (r"AGE-SECRET-KEY-1[0-9A-Z]+", "[REDACTED_IDENTITY]"),
        (r"(?i)(token|key|password|secret)([=:])\s*[^\s]+", "$1$2[REDACTED]"),
        // base64-looking runs (48+ chars)
        (r"[A-Za-z0-9+/]{48,}={0,2}", "[REDACTED_BASE64]"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Remove anything that looks like key material from an error message
pub fn sanitize_error(error: &str) -> String {
    let mut sanitized = error.to_string();
    for (re, replacement) in REDACTIONS.iter() {
        sanitized = re.replace_all(&sanitized, *replacement).into_owned();
    }
    sanitized
}
