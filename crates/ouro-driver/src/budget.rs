//! Global token budget accumulation and enforcement.
//!
//! One [`UsageLedger`] is shared by every agent in an invocation tree. The
//! check is part of the same locked section as the increment, so an
//! implementation that runs sub-agents in parallel cannot race an increment
//! past its check. Post-increment semantics: the overflowing call is counted
//! first, then rejected.

use std::sync::Mutex;

use crate::error::{DriverError, Result};
use crate::usage::Usage;

/// Token caps for one invocation tree. Unset caps are unlimited.
#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetCaps {
    pub max_prompt_tokens: Option<u64>,
    pub max_completion_tokens: Option<u64>,
}

/// Process-wide accumulator of usage across the whole agent tree.
#[derive(Debug)]
pub struct UsageLedger {
    caps: BudgetCaps,
    total: Mutex<Usage>,
}

impl UsageLedger {
    pub fn new(caps: BudgetCaps) -> Self {
        Self {
            caps,
            total: Mutex::new(Usage::default()),
        }
    }

    /// Zero the counters. Called once at the start of each top-level run.
    pub fn reset(&self) {
        *self.total.lock().unwrap() = Usage::default();
    }

    /// Add one call's usage, then enforce the caps.
    ///
    /// The increment always lands, even when the check fails, so the ledger
    /// reflects every call the provider actually billed.
    pub fn track_and_check(&self, usage: &Usage) -> Result<()> {
        let mut total = self.total.lock().unwrap();
        total.add(usage);

        if let Some(limit) = self.caps.max_prompt_tokens {
            if total.prompt_tokens > limit {
                return Err(DriverError::Runtime(format!(
                    "Prompt token budget exceeded: {} used, limit is {}",
                    total.prompt_tokens, limit
                )));
            }
        }
        if let Some(limit) = self.caps.max_completion_tokens {
            if total.completion_tokens > limit {
                return Err(DriverError::Runtime(format!(
                    "Completion token budget exceeded: {} used, limit is {}",
                    total.completion_tokens, limit
                )));
            }
        }
        Ok(())
    }

    /// Current running totals.
    pub fn snapshot(&self) -> Usage {
        *self.total.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(prompt: u64, completion: u64) -> Usage {
        Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
            ..Default::default()
        }
    }

    #[test]
    fn test_track_accumulates() {
        let ledger = UsageLedger::new(BudgetCaps::default());
        ledger.track_and_check(&usage(100, 20)).unwrap();
        ledger.track_and_check(&usage(50, 10)).unwrap();

        let total = ledger.snapshot();
        assert_eq!(total.prompt_tokens, 150);
        assert_eq!(total.completion_tokens, 30);
        assert_eq!(total.total_tokens, 180);
    }

    #[test]
    fn test_prompt_cap_post_increment() {
        let ledger = UsageLedger::new(BudgetCaps {
            max_prompt_tokens: Some(100),
            max_completion_tokens: None,
        });
        ledger.track_and_check(&usage(80, 0)).unwrap();

        let err = ledger.track_and_check(&usage(40, 0)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Runtime error: Prompt token budget exceeded: 120 used, limit is 100"
        );
        // The overflowing call was still counted.
        assert_eq!(ledger.snapshot().prompt_tokens, 120);
    }

    #[test]
    fn test_completion_cap() {
        let ledger = UsageLedger::new(BudgetCaps {
            max_prompt_tokens: None,
            max_completion_tokens: Some(10),
        });
        let err = ledger.track_and_check(&usage(0, 11)).unwrap_err();
        assert!(err.to_string().contains("Completion token budget exceeded"));
    }

    #[test]
    fn test_exactly_at_cap_passes() {
        let ledger = UsageLedger::new(BudgetCaps {
            max_prompt_tokens: Some(100),
            max_completion_tokens: None,
        });
        ledger.track_and_check(&usage(100, 0)).unwrap();
    }

    #[test]
    fn test_reset() {
        let ledger = UsageLedger::new(BudgetCaps::default());
        ledger.track_and_check(&usage(10, 10)).unwrap();
        ledger.reset();
        assert_eq!(ledger.snapshot(), Usage::default());
    }
}
