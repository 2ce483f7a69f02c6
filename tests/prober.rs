mod common;

use std::sync::Arc;
use std::time::Duration;

use common::ScriptedRemote;
use flowdesk::backend::RemoteStore;
use flowdesk::sync::AvailabilityProber;

fn prober(remote: &Arc<ScriptedRemote>, ttl: Duration) -> AvailabilityProber {
    AvailabilityProber::new(
        Some(remote.clone() as Arc<dyn RemoteStore>),
        ttl,
        Duration::from_secs(1),
    )
}

#[tokio::test]
async fn test_probes_within_ttl_hit_the_network_once() {
    let remote = ScriptedRemote::new();
    let prober = prober(&remote, Duration::from_secs(60));

    assert!(prober.probe().await);
    assert!(prober.probe().await);
    assert_eq!(remote.probe_count(), 1);
    assert_eq!(prober.network_checks(), 1);
}

#[tokio::test]
async fn test_invalidate_forces_a_fresh_probe() {
    let remote = ScriptedRemote::new();
    let prober = prober(&remote, Duration::from_secs(60));

    assert!(prober.probe().await);
    remote.set_available(false);
    assert!(prober.probe().await, "cached result is reused");

    prober.invalidate();
    assert!(prober.is_stale());
    assert!(!prober.probe().await);
    assert_eq!(remote.probe_count(), 2);

    let status = prober.status();
    assert!(!status.available);
    assert_eq!(status.consecutive_failures, 1);
    assert!(status.last_checked.is_some());
}

#[tokio::test]
async fn test_concurrent_probes_coalesce() {
    let remote = ScriptedRemote::new();
    let prober = Arc::new(prober(&remote, Duration::from_secs(60)));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let prober = prober.clone();
            tokio::spawn(async move { prober.probe().await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap());
    }
    assert_eq!(remote.probe_count(), 1);
}

#[tokio::test]
async fn test_expired_ttl_probes_again() {
    let remote = ScriptedRemote::new();
    let prober = prober(&remote, Duration::from_millis(10));

    prober.probe().await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    prober.probe().await;
    assert_eq!(remote.probe_count(), 2);
}

#[tokio::test]
async fn test_without_remote_nothing_is_probed() {
    let prober = AvailabilityProber::new(None, Duration::from_secs(5), Duration::from_secs(1));
    assert!(!prober.has_remote());
    assert!(!prober.probe().await);
    assert_eq!(prober.network_checks(), 0);
}

#[tokio::test]
async fn test_slow_remote_counts_as_unavailable() {
    let remote = ScriptedRemote::new();
    remote.set_probe_delay(Duration::from_millis(500));
    let prober = AvailabilityProber::new(
        Some(remote.clone() as Arc<dyn RemoteStore>),
        Duration::from_secs(60),
        Duration::from_millis(20),
    );

    let started = std::time::Instant::now();
    assert!(!prober.probe().await);
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(remote.probe_count(), 1);

    let status = prober.status();
    assert!(!status.available);
    assert_eq!(status.consecutive_failures, 1);
}
