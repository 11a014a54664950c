//! Canonical usage record
//!
//! Every provider's usage shape is converted into this record. Fields are
//! `Option` so "no data" stays distinguishable from a legitimate zero.

use serde::{Deserialize, Serialize};

/// Canonical token usage for one relayed call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt-side tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    /// Completion-side tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    /// Total tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    /// Prompt tokens served from a provider-side cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,
    /// Tokens written to a provider-side cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_tokens: Option<u64>,
    /// Reasoning ("thinking") tokens inside the completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
    /// Audio tokens (speech input or output)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_tokens: Option<u64>,
    /// Image tokens (vision input)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_tokens: Option<u64>,
    /// Web-search invocations billed by the provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_search_count: Option<u64>,
}

impl Usage {
    /// Usage with only input/output known
    pub fn tokens(input: u64, output: u64) -> Self {
        Self {
            input_tokens: Some(input),
            output_tokens: Some(output),
            total_tokens: Some(input + output),
            ..Default::default()
        }
    }

    /// Whether the upstream actually reported anything usable.
    ///
    /// A record whose total is zero (or unset) while both splits are zero or
    /// unset counts as unreported; some providers send all-zero usage objects.
    pub fn is_reported(&self) -> bool {
        self.total_tokens.unwrap_or(0) != 0
            || self.input_tokens.unwrap_or(0) != 0
            || self.output_tokens.unwrap_or(0) != 0
    }

    /// Reconcile this record into a complete, internally consistent one.
    ///
    /// Precedence, applied identically by streaming and non-streaming
    /// handlers:
    /// 1. upstream usage with a known split is trusted; total is fixed up to
    ///    `input + output`
    /// 2. a bare total is split using the pre-call `input_estimate`, with
    ///    output as the (saturating) remainder
    /// 3. no usage at all: output comes from `count_output` over the emitted
    ///    text, input from the estimate
    ///
    /// Idempotent: reconciling an already consistent record changes nothing.
    pub fn reconcile(&mut self, input_estimate: u64, count_output: impl FnOnce() -> u64) {
        if !self.is_reported() {
            self.input_tokens = Some(input_estimate);
            self.output_tokens = Some(count_output());
        } else if self.input_tokens.is_none() && self.output_tokens.is_none() {
            // Total-only report: derive the split from the estimate.
            let total = self.total_tokens.unwrap_or(0);
            let input = input_estimate.min(total);
            self.input_tokens = Some(input);
            self.output_tokens = Some(total - input);
        } else {
            if self.input_tokens.is_none() {
                self.input_tokens = Some(input_estimate);
            }
            if self.output_tokens.is_none() {
                let input = self.input_tokens.unwrap_or(0);
                self.output_tokens =
                    Some(self.total_tokens.unwrap_or(input).saturating_sub(input));
            }
        }

        // total == input + output whenever both halves are known
        self.total_tokens = Some(
            self.input_tokens.unwrap_or(0) + self.output_tokens.unwrap_or(0),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreported_falls_back_to_estimates() {
        let mut usage = Usage::default();
        usage.reconcile(10, || 5);
        assert_eq!(usage.input_tokens, Some(10));
        assert_eq!(usage.output_tokens, Some(5));
        assert_eq!(usage.total_tokens, Some(15));
    }

    #[test]
    fn test_all_zero_counts_as_unreported() {
        let mut usage = Usage {
            input_tokens: Some(0),
            output_tokens: Some(0),
            total_tokens: Some(0),
            ..Default::default()
        };
        usage.reconcile(7, || 3);
        assert_eq!(usage.input_tokens, Some(7));
        assert_eq!(usage.output_tokens, Some(3));
        assert_eq!(usage.total_tokens, Some(10));
    }

    #[test]
    fn test_total_only_derives_split_from_estimate() {
        let mut usage = Usage {
            total_tokens: Some(42),
            ..Default::default()
        };
        usage.reconcile(10, || unreachable!("split must come from the total"));
        assert_eq!(usage.input_tokens, Some(10));
        assert_eq!(usage.output_tokens, Some(32));
        assert_eq!(usage.total_tokens, Some(42));
    }

    #[test]
    fn test_total_smaller_than_estimate_saturates() {
        let mut usage = Usage {
            total_tokens: Some(4),
            ..Default::default()
        };
        usage.reconcile(10, || 0);
        assert_eq!(usage.input_tokens, Some(4));
        assert_eq!(usage.output_tokens, Some(0));
        assert_eq!(usage.total_tokens, Some(4));
    }

    #[test]
    fn test_reported_usage_is_trusted() {
        let mut usage = Usage::tokens(100, 20);
        usage.reconcile(1, || 999);
        assert_eq!(usage.input_tokens, Some(100));
        assert_eq!(usage.output_tokens, Some(20));
        assert_eq!(usage.total_tokens, Some(120));
    }

    #[test]
    fn test_inconsistent_total_is_fixed() {
        let mut usage = Usage {
            input_tokens: Some(10),
            output_tokens: Some(5),
            total_tokens: Some(99),
            ..Default::default()
        };
        usage.reconcile(0, || 0);
        assert_eq!(usage.total_tokens, Some(15));
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut usage = Usage {
            total_tokens: Some(42),
            ..Default::default()
        };
        usage.reconcile(10, || 0);
        let first = usage;
        usage.reconcile(10, || 0);
        assert_eq!(usage, first);

        let mut counted = Usage::default();
        counted.reconcile(3, || 8);
        let first = counted;
        // The second pass must not re-count: the record is now reported.
        counted.reconcile(3, || 1234);
        assert_eq!(counted, first);
    }

    #[test]
    fn test_optional_fields_survive() {
        let mut usage = Usage {
            input_tokens: Some(10),
            output_tokens: Some(5),
            cached_tokens: Some(4),
            reasoning_tokens: Some(2),
            ..Default::default()
        };
        usage.reconcile(0, || 0);
        assert_eq!(usage.cached_tokens, Some(4));
        assert_eq!(usage.reasoning_tokens, Some(2));
    }
}
