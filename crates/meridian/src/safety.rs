//! Safety hook.
//!
//! Runs over a pipeline's candidate response before it is appended to
//! the conversation. A block is a normal, user-visible outcome — not an
//! error — so [`AppError`](crate::error::AppError)'s mapping for
//! `CoreError::Safety` returns 200, matching how a blocked answer reads
//! to a caller (a message, not a failure).

pub enum SafetyVerdict {
    Allowed,
    Blocked { reason: String },
}

pub trait SafetyChecker: Send + Sync {
    fn check(&self, text: &str) -> SafetyVerdict;
}

/// Default checker when `a2rchi.safety_enabled = false`.
pub struct NullSafetyChecker;

impl SafetyChecker for NullSafetyChecker {
    fn check(&self, _text: &str) -> SafetyVerdict {
        SafetyVerdict::Allowed
    }
}

/// A denylist-of-phrases checker, case-insensitive substring match.
/// Simple by design: the pipeline can swap in a model-backed checker
/// later without changing the call site.
pub struct KeywordSafetyChecker {
    banned_phrases: Vec<String>,
}

impl KeywordSafetyChecker {
    pub fn new(banned_phrases: Vec<String>) -> Self {
        Self { banned_phrases: banned_phrases.into_iter().map(|p| p.to_ascii_lowercase()).collect() }
    }
}

impl SafetyChecker for KeywordSafetyChecker {
    fn check(&self, text: &str) -> SafetyVerdict {
        let lower = text.to_ascii_lowercase();
        for phrase in &self.banned_phrases {
            if lower.contains(phrase.as_str()) {
                return SafetyVerdict::Blocked { reason: format!("response contains disallowed phrase: {phrase}") };
            }
        }
        SafetyVerdict::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_checker_always_allows() {
        assert!(matches!(NullSafetyChecker.check("anything"), SafetyVerdict::Allowed));
    }

    #[test]
    fn keyword_checker_blocks_case_insensitively() {
        let checker = KeywordSafetyChecker::new(vec!["forbidden topic".to_string()]);
        assert!(matches!(checker.check("This mentions a Forbidden Topic."), SafetyVerdict::Blocked { .. }));
    }

    #[test]
    fn keyword_checker_allows_clean_text() {
        let checker = KeywordSafetyChecker::new(vec!["forbidden topic".to_string()]);
        assert!(matches!(checker.check("This is fine."), SafetyVerdict::Allowed));
    }
}
