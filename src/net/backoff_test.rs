use super::*;

#[test]
fn reconnect_delay_grows_by_one_and_a_half() {
    let policy = ReconnectPolicy {
        base_delay: Duration::from_millis(1_000),
        max_attempts: 5,
    };
    let delays = (1..=5).map(|n| policy.delay(n).as_millis()).collect::<Vec<_>>();
    assert_eq!(delays, vec![1_000, 1_500, 2_250, 3_375, 5_062]);
}

#[test]
fn reconnect_delay_is_non_decreasing() {
    let policy = ReconnectPolicy::default();
    for n in 1..10 {
        assert!(policy.delay(n) <= policy.delay(n + 1), "attempt {n}");
    }
}

#[test]
fn reconnect_allows_until_ceiling() {
    let policy = ReconnectPolicy::default();
    assert!(policy.allows(0));
    assert!(policy.allows(4));
    assert!(!policy.allows(5));
}

#[test]
fn retry_delay_doubles_and_caps_at_ten_seconds() {
    let policy = RetryPolicy::default();
    let delays = (1..=5).map(|n| policy.delay(n).as_millis()).collect::<Vec<_>>();
    assert_eq!(delays, vec![2_000, 4_000, 8_000, 10_000, 10_000]);
    assert_eq!(policy.delay(0), Duration::from_millis(1_000));
}

#[test]
fn retry_delay_saturates_for_huge_attempts() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.delay(200), policy.max_delay);
}
