//! Cancellation bookkeeping for the long-running service calls.
//!
//! Each operation category holds at most one live token. Issuing a new
//! token for a category invalidates whatever was outstanding; responses
//! and retry timers carry the token they were started under and are
//! checked against the registry before they are allowed to touch the
//! model.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpCategory {
    Analysis,
    Recommendations,
    TryOn,
    VideoGeneration,
}

impl OpCategory {
    pub const ALL: [Self; 4] = [
        Self::Analysis,
        Self::Recommendations,
        Self::TryOn,
        Self::VideoGeneration,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Recommendations => "recommendations",
            Self::TryOn => "try_on",
            Self::VideoGeneration => "video_generation",
        }
    }
}

/// Compared by identity only; the value never wraps in practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpToken(pub u64);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationRegistry {
    current: HashMap<OpCategory, OpToken>,
    next: u64,
}

impl CancellationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a fresh token for the category, invalidating any prior one.
    pub fn issue(&mut self, category: OpCategory) -> OpToken {
        self.next += 1;
        let token = OpToken(self.next);
        self.current.insert(category, token);
        token
    }

    pub fn cancel(&mut self, category: OpCategory) {
        self.current.remove(&category);
    }

    pub fn cancel_all(&mut self) {
        self.current.clear();
    }

    #[must_use]
    pub fn current(&self, category: OpCategory) -> Option<OpToken> {
        self.current.get(&category).copied()
    }

    #[must_use]
    pub fn is_current(&self, category: OpCategory, token: OpToken) -> bool {
        self.current(category) == Some(token)
    }
}

/// The check every continuation runs before committing its result: the
/// token must still be the live one for its category AND the session it
/// was started under must still be the current session. Either mismatch
/// means the work was superseded and the result is dropped silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleGuard {
    pub category: OpCategory,
    pub token: OpToken,
    pub session_id: SessionId,
}

impl StaleGuard {
    #[must_use]
    pub const fn new(category: OpCategory, token: OpToken, session_id: SessionId) -> Self {
        Self {
            category,
            token,
            session_id,
        }
    }

    #[must_use]
    pub fn is_live(&self, registry: &CancellationRegistry, current_session: SessionId) -> bool {
        registry.is_current(self.category, self.token) && self.session_id == current_session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod registry_tests {
        use super::*;

        #[test]
        fn test_issue_replaces_prior_token() {
            let mut registry = CancellationRegistry::new();
            let first = registry.issue(OpCategory::Analysis);
            let second = registry.issue(OpCategory::Analysis);

            assert_ne!(first, second);
            assert!(!registry.is_current(OpCategory::Analysis, first));
            assert!(registry.is_current(OpCategory::Analysis, second));
        }

        #[test]
        fn test_categories_are_independent() {
            let mut registry = CancellationRegistry::new();
            let analysis = registry.issue(OpCategory::Analysis);
            let try_on = registry.issue(OpCategory::TryOn);

            registry.cancel(OpCategory::TryOn);

            assert!(registry.is_current(OpCategory::Analysis, analysis));
            assert!(!registry.is_current(OpCategory::TryOn, try_on));
        }

        #[test]
        fn test_cancel_all_clears_every_category() {
            let mut registry = CancellationRegistry::new();
            let tokens: Vec<_> = OpCategory::ALL
                .iter()
                .map(|&c| (c, registry.issue(c)))
                .collect();

            registry.cancel_all();

            for (category, token) in tokens {
                assert!(!registry.is_current(category, token));
            }
        }

        #[test]
        fn test_tokens_never_repeat_across_categories() {
            let mut registry = CancellationRegistry::new();
            let a = registry.issue(OpCategory::Analysis);
            let b = registry.issue(OpCategory::Recommendations);
            let c = registry.issue(OpCategory::Analysis);
            assert!(a != b && b != c && a != c);
        }
    }

    mod stale_guard_tests {
        use super::*;

        #[test]
        fn test_live_when_token_and_session_match() {
            let mut registry = CancellationRegistry::new();
            let token = registry.issue(OpCategory::Analysis);
            let guard = StaleGuard::new(OpCategory::Analysis, token, SessionId(1));

            assert!(guard.is_live(&registry, SessionId(1)));
        }

        #[test]
        fn test_stale_when_token_superseded() {
            let mut registry = CancellationRegistry::new();
            let token = registry.issue(OpCategory::Analysis);
            let guard = StaleGuard::new(OpCategory::Analysis, token, SessionId(1));

            registry.issue(OpCategory::Analysis);

            assert!(!guard.is_live(&registry, SessionId(1)));
        }

        #[test]
        fn test_stale_when_session_changed() {
            let mut registry = CancellationRegistry::new();
            let token = registry.issue(OpCategory::Analysis);
            let guard = StaleGuard::new(OpCategory::Analysis, token, SessionId(1));

            assert!(!guard.is_live(&registry, SessionId(2)));
        }

        #[test]
        fn test_stale_after_cancel() {
            let mut registry = CancellationRegistry::new();
            let token = registry.issue(OpCategory::VideoGeneration);
            let guard = StaleGuard::new(OpCategory::VideoGeneration, token, SessionId(3));

            registry.cancel(OpCategory::VideoGeneration);

            assert!(!guard.is_live(&registry, SessionId(3)));
        }
    }
}
