//! Rate limiting through the processor: windows, concurrency and reloads

use company_api::governance::rate_limit::{
    ClientRateLimitPolicy, ContentionPolicy, PolicySnapshot, RateLimitCounterStore, RateLimitDecision,
    RateLimitPolicyStore, RateLimitProcessor, RateLimitRule,
};
use company_api::core::clock::Clock;
use company_api::prelude::{DateTime, ManualClock, Utc};
use std::sync::Arc;
use std::time::Duration;

fn start() -> DateTime<Utc> {
    "2026-01-01T00:00:00Z".parse().unwrap()
}

struct Harness {
    processor: Arc<RateLimitProcessor>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new(general: Vec<RateLimitRule>) -> Self {
        Self::with_clients(general, Vec::new(), Vec::new())
    }

    fn with_clients(general: Vec<RateLimitRule>, clients: Vec<ClientRateLimitPolicy>, exempt: Vec<String>) -> Self {
        let snapshot = PolicySnapshot::compile(&general, &clients, &exempt).unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let processor = RateLimitProcessor::new(
            Arc::new(RateLimitPolicyStore::new(snapshot)),
            Arc::new(RateLimitCounterStore::new(10_000)),
            clock.clone(),
            ContentionPolicy::FailOpen,
        );
        Self {
            processor: Arc::new(processor),
            clock,
        }
    }

    fn get(&self, client: &str, path: &str) -> RateLimitDecision {
        self.processor.check(client, "GET", path)
    }

    fn allowed(&self, client: &str, n: usize) -> usize {
        (0..n)
            .filter(|_| self.get(client, "/api/companies").is_allowed())
            .count()
    }
}

#[test]
fn test_three_allowed_then_denied_with_retry_hint() {
    let harness = Harness::new(vec![RateLimitRule::new("*", 3, "1m")]);
    harness.clock.advance(Duration::from_secs(15));

    for _ in 0..3 {
        assert!(harness.get("A", "/api/companies").is_allowed());
    }
    match harness.get("A", "/api/companies") {
        RateLimitDecision::Denied(error) => {
            assert_eq!(error.limit, 3);
            assert_eq!(error.client_key, "A");
            assert!(error.retry_after <= Duration::from_secs(60));
            assert_eq!(error.retry_after_secs(), 45);
        }
        RateLimitDecision::Allowed(_) => panic!("fourth request must be denied"),
    }
}

#[test]
fn test_fixed_window_admits_boundary_burst() {
    let harness = Harness::new(vec![RateLimitRule::new("*", 2, "1m")]);

    harness.clock.advance(Duration::from_secs(58));
    assert_eq!(harness.allowed("A", 2), 2);
    harness.clock.advance(Duration::from_secs(3));
    assert_eq!(harness.allowed("A", 2), 2);
}

#[test]
fn test_rolling_window_denies_boundary_burst() {
    let harness = Harness::new(vec![RateLimitRule::new("*", 2, "1m").rolling()]);

    harness.clock.advance(Duration::from_secs(58));
    assert_eq!(harness.allowed("A", 2), 2);
    harness.clock.advance(Duration::from_secs(3));
    assert_eq!(harness.allowed("A", 1), 0);

    // A full period after the burst the window is clear again
    harness.clock.advance(Duration::from_secs(60));
    assert_eq!(harness.allowed("A", 2), 2);
}

#[test]
fn test_most_specific_rule_wins() {
    let harness = Harness::new(vec![
        RateLimitRule::new("*", 100, "1m"),
        RateLimitRule::new("get:/api/companies/*/employees", 1, "1m"),
    ]);

    let employees = "/api/companies/7f1f1b5e-0000-0000-0000-000000000000/employees";
    assert!(harness.get("A", employees).is_allowed());
    assert!(!harness.get("A", employees).is_allowed());
    assert!(harness.get("A", "/api/companies").is_allowed());
}

#[test]
fn test_client_override_and_exemption() {
    let harness = Harness::with_clients(
        vec![RateLimitRule::new("*", 1, "1m")],
        vec![ClientRateLimitPolicy {
            client_id: "reporting".to_string(),
            rules: vec![RateLimitRule::new("*", 5, "1m")],
        }],
        vec!["internal".to_string()],
    );

    assert_eq!(harness.allowed("someone", 5), 1);
    assert_eq!(harness.allowed("reporting", 6), 5);
    assert_eq!(harness.allowed("internal", 50), 50);
}

#[test]
fn test_hot_reload_swaps_rules_and_keeps_counters() {
    let harness = Harness::new(vec![RateLimitRule::new("*", 2, "1m")]);
    assert_eq!(harness.allowed("A", 2), 2);

    // Same endpoint and period: the window's count carries over
    let raised = PolicySnapshot::compile(&[RateLimitRule::new("*", 3, "1m")], &[], &[]).unwrap();
    harness.processor.policies().replace(raised);
    assert_eq!(harness.allowed("A", 2), 1);

    // A client override replaces the general rule for that client only
    harness
        .processor
        .policies()
        .set_client_rules("A", &[RateLimitRule::new("*", 10, "1m")])
        .unwrap();
    harness.clock.advance(Duration::from_secs(60));
    assert_eq!(harness.allowed("A", 11), 10);
    assert_eq!(harness.allowed("B", 4), 3);
}

#[test]
fn test_sweep_drops_expired_counters_only() {
    let harness = Harness::new(vec![
        RateLimitRule::new("get:/api/companies", 10, "1m"),
        RateLimitRule::new("get:/api/companies/*", 10, "1h"),
    ]);
    harness.get("A", "/api/companies");
    harness.get("A", "/api/companies/x");
    let counters = harness.processor.counters();
    assert_eq!(counters.len(), 2);

    harness.clock.advance(Duration::from_secs(61));
    assert_eq!(counters.sweep(harness.clock.now()), 1);
    assert_eq!(counters.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_of_one_client_are_counted_exactly() {
    let harness = Harness::new(vec![RateLimitRule::new("*", 100, "1m")]);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let processor = harness.processor.clone();
            tokio::spawn(async move {
                (0..25)
                    .filter(|_| processor.check("A", "GET", "/api/companies").is_allowed())
                    .count()
            })
        })
        .collect();

    let mut allowed = 0;
    for task in futures::future::join_all(tasks).await {
        allowed += task.unwrap();
    }
    assert_eq!(allowed, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_clients_never_block_each_other() {
    let harness = Harness::new(vec![RateLimitRule::new("*", 10, "1m")]);

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let processor = harness.processor.clone();
            tokio::spawn(async move {
                let client = format!("client-{}", i);
                (0..10)
                    .filter(|_| processor.check(&client, "GET", "/api/companies").is_allowed())
                    .count()
            })
        })
        .collect();

    for task in futures::future::join_all(tasks).await {
        assert_eq!(task.unwrap(), 10);
    }
}
