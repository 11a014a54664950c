//! Usage reconciliation invariants

use aigateway::relay::usage::Usage;

#[test]
fn test_total_only_split_against_estimate() {
    // Upstream reported only a total; the pre-call estimate splits it
    let mut usage = Usage {
        total_tokens: Some(42),
        ..Default::default()
    };
    usage.reconcile(10, || 999);
    assert_eq!(usage.input_tokens, Some(10));
    assert_eq!(usage.output_tokens, Some(32));
    assert_eq!(usage.total_tokens, Some(42));
}

#[test]
fn test_total_smaller_than_estimate() {
    // The estimate is capped at the reported total
    let mut usage = Usage {
        total_tokens: Some(7),
        ..Default::default()
    };
    usage.reconcile(10, || 999);
    assert_eq!(usage.input_tokens, Some(7));
    assert_eq!(usage.output_tokens, Some(0));
}

#[test]
fn test_nothing_reported_falls_back_to_counting() {
    let mut usage = Usage::default();
    usage.reconcile(15, || 25);
    assert_eq!(usage.input_tokens, Some(15));
    assert_eq!(usage.output_tokens, Some(25));
    assert_eq!(usage.total_tokens, Some(40));
}

#[test]
fn test_total_forced_to_sum() {
    let mut usage = Usage {
        input_tokens: Some(10),
        output_tokens: Some(5),
        total_tokens: Some(999),
        ..Default::default()
    };
    usage.reconcile(10, || 0);
    assert_eq!(usage.total_tokens, Some(15));
}

#[test]
fn test_reconcile_is_idempotent() {
    let mut usage = Usage {
        total_tokens: Some(42),
        ..Default::default()
    };
    usage.reconcile(10, || 999);
    let first = usage;
    usage.reconcile(10, || 999);
    assert_eq!(usage, first);

    let mut counted = Usage::default();
    counted.reconcile(3, || 8);
    let first = counted;
    counted.reconcile(3, || 8);
    assert_eq!(counted, first);
}

#[test]
fn test_all_zero_usage_counts_as_unreported() {
    let usage = Usage {
        input_tokens: Some(0),
        output_tokens: Some(0),
        total_tokens: Some(0),
        ..Default::default()
    };
    assert!(!usage.is_reported());

    let mut reconciled = usage;
    reconciled.reconcile(4, || 6);
    assert_eq!(reconciled.input_tokens, Some(4));
    assert_eq!(reconciled.output_tokens, Some(6));
}

#[test]
fn test_one_sided_report_is_kept() {
    let mut usage = Usage {
        input_tokens: Some(12),
        ..Default::default()
    };
    usage.reconcile(5, || 999);
    assert_eq!(usage.input_tokens, Some(12));
    assert_eq!(usage.output_tokens, Some(0));
    assert_eq!(usage.total_tokens, Some(12));
}
