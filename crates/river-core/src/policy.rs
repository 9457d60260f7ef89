//! Retry policy for dispatched requests
//!
//! Which requests survive a timeout, and which are rebuilt from the message
//! store at startup, is decided per constructor by a declarative table rather
//! than by special cases inside the dispatcher. Applications that add new
//! message kinds extend the table or provide their own [`RetryPolicy`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::Constructor;

// ----------------------------------------------------------------------------
// Rules
// ----------------------------------------------------------------------------

/// What to do with a request whose response did not arrive in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutAction {
    /// Forget the request after the timeout handler ran
    Drop,
    /// Append the request to the tail of the durable queue
    Requeue,
    /// Requeue only while the message store still lists the request as pending
    RequeueWhilePending,
}

/// Per-constructor retry rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryRule {
    pub on_timeout: TimeoutAction,
    /// Timeouts tolerated before the request is dropped; `None` is unbounded
    pub max_attempts: Option<u32>,
    /// Queued copies are stale at startup and get rebuilt from the message store
    pub reconcile_on_start: bool,
}

impl RetryRule {
    pub const fn drop() -> Self {
        Self {
            on_timeout: TimeoutAction::Drop,
            max_attempts: None,
            reconcile_on_start: false,
        }
    }

    pub const fn requeue() -> Self {
        Self {
            on_timeout: TimeoutAction::Requeue,
            max_attempts: None,
            reconcile_on_start: false,
        }
    }

    /// Rule for user-visible sends backed by the pending message store
    pub const fn pending_send() -> Self {
        Self {
            on_timeout: TimeoutAction::RequeueWhilePending,
            max_attempts: None,
            reconcile_on_start: true,
        }
    }

    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Whether a request that has already timed out `attempts` times may go again
    pub fn allows_attempt(&self, attempts: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempts < max,
            None => true,
        }
    }
}

impl Default for RetryRule {
    fn default() -> Self {
        Self::drop()
    }
}

// ----------------------------------------------------------------------------
// Policy Provider
// ----------------------------------------------------------------------------

/// Source of retry rules, consulted by the dispatcher on every timeout
pub trait RetryPolicy: Send + Sync {
    fn rule_for(&self, constructor: Constructor) -> RetryRule;
}

/// Lookup table keyed by constructor with a fallback rule
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryPolicyTable {
    rules: HashMap<Constructor, RetryRule>,
    fallback: RetryRule,
}

impl RetryPolicyTable {
    /// Empty table: every request is dropped after its timeout
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules used by the messenger client
    pub fn messenger_defaults() -> Self {
        Self::new()
            .with_rule(Constructor::MESSAGES_SEND, RetryRule::pending_send())
            .with_rule(Constructor::MESSAGES_SEND_MEDIA, RetryRule::pending_send())
            .with_rule(Constructor::MESSAGES_READ_HISTORY, RetryRule::requeue())
            .with_rule(Constructor::MESSAGES_GET_HISTORY, RetryRule::requeue())
            .with_rule(Constructor::CONTACTS_IMPORT, RetryRule::requeue())
            .with_rule(Constructor::CONTACTS_GET, RetryRule::requeue())
            .with_rule(Constructor::AUTH_SEND_CODE, RetryRule::requeue())
            .with_rule(Constructor::AUTH_REGISTER, RetryRule::requeue())
            .with_rule(Constructor::AUTH_LOGIN, RetryRule::requeue())
    }

    pub fn with_rule(mut self, constructor: Constructor, rule: RetryRule) -> Self {
        self.rules.insert(constructor, rule);
        self
    }

    pub fn with_fallback(mut self, rule: RetryRule) -> Self {
        self.fallback = rule;
        self
    }

    /// Constructors whose queued copies are rebuilt at startup
    pub fn reconciled_constructors(&self) -> Vec<Constructor> {
        let mut constructors: Vec<Constructor> = self
            .rules
            .iter()
            .filter(|(_, rule)| rule.reconcile_on_start)
            .map(|(constructor, _)| *constructor)
            .collect();
        constructors.sort();
        constructors
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl RetryPolicy for RetryPolicyTable {
    fn rule_for(&self, constructor: Constructor) -> RetryRule {
        self.rules
            .get(&constructor)
            .copied()
            .unwrap_or(self.fallback)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messenger_defaults() {
        let table = RetryPolicyTable::messenger_defaults();

        let send = table.rule_for(Constructor::MESSAGES_SEND);
        assert_eq!(send.on_timeout, TimeoutAction::RequeueWhilePending);
        assert!(send.reconcile_on_start);

        let history = table.rule_for(Constructor::MESSAGES_READ_HISTORY);
        assert_eq!(history.on_timeout, TimeoutAction::Requeue);
        assert!(!history.reconcile_on_start);

        let unknown = table.rule_for(Constructor::new(12345));
        assert_eq!(unknown, RetryRule::drop());

        assert_eq!(
            table.reconciled_constructors(),
            vec![Constructor::MESSAGES_SEND_MEDIA, Constructor::MESSAGES_SEND]
        );
    }

    #[test]
    fn test_custom_fallback_and_attempt_budget() {
        let table = RetryPolicyTable::new()
            .with_fallback(RetryRule::requeue().with_max_attempts(2));
        let rule = table.rule_for(Constructor::new(9));

        assert!(rule.allows_attempt(0));
        assert!(rule.allows_attempt(1));
        assert!(!rule.allows_attempt(2));
        assert!(RetryRule::requeue().allows_attempt(u32::MAX));
    }
}
