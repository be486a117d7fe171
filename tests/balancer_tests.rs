//! # Balancer Integration Tests
//!
//! End-to-end coverage of the least-connections engine: selection order,
//! tie-break determinism, the acquire/release round-trip law, every error
//! path, and concurrent acquisition behavior.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use conn_balancer::{BalancerConfig, BalancerError, LeastConnectionsBalancer};

fn pool(ids: &[&str]) -> LeastConnectionsBalancer {
    let balancer = LeastConnectionsBalancer::new();
    for id in ids {
        balancer.add_server(*id).unwrap();
    }
    balancer
}

/// Three empty servers: three acquires visit each exactly once in
/// lexicographic order, and the fourth wraps back to the first.
#[test]
fn test_acquire_spreads_over_tied_servers() {
    let balancer = pool(&["server-a", "server-b", "server-c"]);

    let first = balancer.acquire().unwrap();
    let second = balancer.acquire().unwrap();
    let third = balancer.acquire().unwrap();
    assert_eq!(first.server_id(), "server-a");
    assert_eq!(second.server_id(), "server-b");
    assert_eq!(third.server_id(), "server-c");
    for id in ["server-a", "server-b", "server-c"] {
        assert_eq!(balancer.count(id).unwrap(), 1);
    }

    // All tied at 1: the tie-break picks server-a again.
    let fourth = balancer.acquire().unwrap();
    assert_eq!(fourth.server_id(), "server-a");
    assert_eq!(balancer.count("server-a").unwrap(), 2);
}

/// The selected server never carries a strictly higher count than any other
/// registered server at the moment of selection.
#[test]
fn test_least_connections_invariant_over_acquire_sequence() {
    let balancer = pool(&["a", "b", "c", "d"]);

    for _ in 0..20 {
        let counts_before: Vec<u64> = balancer
            .server_ids()
            .iter()
            .map(|id| balancer.count(id).unwrap())
            .collect();
        let min_before = *counts_before.iter().min().unwrap();

        let selected = balancer.acquire().unwrap();
        // The count we claimed was the minimum of the snapshot.
        assert_eq!(
            balancer.count(selected.server_id()).unwrap(),
            min_before + 1
        );
    }
}

/// n acquires followed by n matching releases restore every count.
#[test]
fn test_round_trip_law() {
    let balancer = pool(&["a", "b", "c"]);

    let refs: Vec<_> = (0..9).map(|_| balancer.acquire().unwrap()).collect();
    for id in ["a", "b", "c"] {
        assert_eq!(balancer.count(id).unwrap(), 3);
    }
    for server in &refs {
        balancer.release(server).unwrap();
    }
    for id in ["a", "b", "c"] {
        assert_eq!(balancer.count(id).unwrap(), 0);
    }
}

/// Ties are broken the same way on every run with the same server set.
#[test]
fn test_deterministic_tie_break_across_runs() {
    let sequence = |_: usize| -> Vec<String> {
        let balancer = pool(&["zeta", "echo", "mike", "kilo"]);
        (0..8)
            .map(|_| balancer.acquire().unwrap().server_id().to_string())
            .collect()
    };
    let first_run = sequence(0);
    for run in 1..5 {
        assert_eq!(sequence(run), first_run);
    }
}

#[test]
fn test_acquire_on_empty_pool_fails() {
    let balancer = LeastConnectionsBalancer::new();
    let err = balancer.acquire().unwrap_err();
    assert_eq!(err, BalancerError::NoServersAvailable);
    assert!(err.is_retryable());
}

#[test]
fn test_duplicate_add_leaves_count_untouched() {
    let balancer = pool(&["x"]);
    let server = balancer.acquire().unwrap();

    let err = balancer.add_server("x").unwrap_err();
    assert_eq!(err, BalancerError::duplicate_server("x"));
    assert_eq!(balancer.count("x").unwrap(), 1);

    balancer.release(&server).unwrap();
}

#[test]
fn test_remove_unknown_server_fails() {
    let balancer = pool(&["a"]);
    let err = balancer.remove_server("ghost").unwrap_err();
    assert_eq!(err, BalancerError::unknown_server("ghost"));
    assert_eq!(balancer.len(), 1);
}

#[test]
fn test_count_of_unknown_server_fails() {
    let balancer = LeastConnectionsBalancer::new();
    assert_eq!(
        balancer.count("ghost").unwrap_err(),
        BalancerError::unknown_server("ghost")
    );
}

/// A reference that outlives its server fails with UnknownServer and leaves
/// the rest of the engine untouched — including when the id was re-added
/// under a new generation.
#[test]
fn test_stale_reference_after_remove_and_readd() {
    let balancer = pool(&["a", "b"]);

    let stale = balancer.acquire().unwrap();
    assert_eq!(stale.server_id(), "a");
    balancer.release(&stale).unwrap();
    balancer.remove_server("a").unwrap();

    // Plain removal: the reference no longer resolves.
    let err = balancer.release(&stale).unwrap_err();
    assert_eq!(err, BalancerError::unknown_server("a"));

    // Re-add the same id. The stale reference must not decrement the new
    // incarnation's counter.
    balancer.add_server("a").unwrap();
    let fresh = balancer.acquire().unwrap();
    assert_eq!(fresh.server_id(), "a");
    let err = balancer.release(&stale).unwrap_err();
    assert_eq!(err, BalancerError::unknown_server("a"));
    assert_eq!(balancer.count("a").unwrap(), 1);

    balancer.release(&fresh).unwrap();
}

/// Releasing the same acquisition twice is a protocol violation.
#[test]
fn test_double_release_underflows() {
    let balancer = pool(&["only"]);
    let server = balancer.acquire().unwrap();

    balancer.release(&server).unwrap();
    let err = balancer.release(&server).unwrap_err();
    assert_eq!(err, BalancerError::underflow("only"));
    // Engine state is still valid after the violation.
    assert_eq!(balancer.count("only").unwrap(), 0);
    assert_eq!(balancer.acquire().unwrap().server_id(), "only");
}

/// k threads acquiring against m empty servers (k == m) end up with exactly
/// one acquisition per distinct server.
#[test]
fn test_concurrent_acquire_fans_out_exactly_once_per_server() {
    let ids: Vec<String> = (0..8).map(|i| format!("server-{i}")).collect();
    let balancer = Arc::new(LeastConnectionsBalancer::new());
    for id in &ids {
        balancer.add_server(id.clone()).unwrap();
    }

    let barrier = Arc::new(Barrier::new(ids.len()));
    let handles: Vec<_> = (0..ids.len())
        .map(|_| {
            let balancer = Arc::clone(&balancer);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                balancer.acquire().unwrap()
            })
        })
        .collect();

    let selected: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let distinct: HashSet<&str> = selected.iter().map(|s| s.server_id()).collect();
    assert_eq!(distinct.len(), ids.len(), "two callers shared a server");
    for id in &ids {
        assert_eq!(balancer.count(id).unwrap(), 1);
    }
}

/// Sustained concurrent acquire/release churn drains back to zero with no
/// accounting drift and no spurious errors.
#[test]
fn test_concurrent_churn_preserves_accounting() {
    let balancer = Arc::new(LeastConnectionsBalancer::new());
    for id in ["a", "b", "c"] {
        balancer.add_server(id).unwrap();
    }

    let threads = 4;
    let iterations = 1_000;
    let barrier = Arc::new(Barrier::new(threads));
    let workers: Vec<_> = (0..threads)
        .map(|_| {
            let balancer = Arc::clone(&balancer);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..iterations {
                    let server = balancer.acquire().unwrap();
                    balancer.release(&server).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    for id in ["a", "b", "c"] {
        assert_eq!(balancer.count(id).unwrap(), 0);
    }
    let stats = balancer.stats();
    assert_eq!(stats.total_requests, (threads * iterations) as u64);
    assert_eq!(stats.total_releases, (threads * iterations) as u64);
    assert_eq!(stats.failed_selections, 0);
}

/// Servers can be added and removed while traffic is in flight elsewhere.
#[test]
fn test_add_and_remove_during_traffic() {
    let balancer = pool(&["a", "b"]);
    let in_flight = balancer.acquire().unwrap();

    balancer.add_server("c").unwrap();
    // c starts at zero, so it is the unique minimum.
    let on_c = balancer.acquire().unwrap();
    assert_eq!(on_c.server_id(), "c");

    // b is idle and removable; a is busy.
    balancer.remove_server("b").unwrap();
    assert_eq!(
        balancer.remove_server("a").unwrap_err(),
        BalancerError::server_busy("a", 1)
    );

    balancer.release(&on_c).unwrap();
    balancer.release(&in_flight).unwrap();
}

#[test]
fn test_stats_snapshot_and_serialization() {
    let balancer = pool(&["a", "b"]);
    let first = balancer.acquire().unwrap();
    let second = balancer.acquire().unwrap();
    balancer.release(&second).unwrap();
    let _ = balancer.acquire().unwrap();

    let stats = balancer.stats();
    assert_eq!(stats.algorithm, "least_connections");
    assert_eq!(stats.total_requests, 3);
    assert_eq!(stats.total_releases, 1);
    assert_eq!(stats.failed_selections, 0);

    let a = &stats.servers["a"];
    assert_eq!(a.selections, 1);
    assert_eq!(a.active_connections, 1);
    assert!(a.last_selected.is_some());
    let b = &stats.servers["b"];
    assert_eq!(b.selections, 2);
    assert_eq!(b.active_connections, 1);

    // Snapshots serialize for an admin surface.
    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["algorithm"], "least_connections");
    assert_eq!(json["servers"]["b"]["selections"], 2);

    balancer.reset_stats();
    let reset = balancer.stats();
    assert_eq!(reset.total_requests, 0);
    assert_eq!(reset.servers["a"].selections, 0);
    // Live accounting must survive a stats reset.
    assert_eq!(reset.servers["a"].active_connections, 1);
    balancer.release(&first).unwrap();
}

#[test]
fn test_from_config_registers_initial_servers() {
    let config = BalancerConfig {
        servers: vec!["a".to_string(), "b".to_string()],
        ..Default::default()
    };
    let balancer = LeastConnectionsBalancer::from_config(&config).unwrap();
    assert_eq!(balancer.server_ids(), vec!["a", "b"]);

    let duplicated = BalancerConfig {
        servers: vec!["a".to_string(), "a".to_string()],
        ..Default::default()
    };
    assert_eq!(
        LeastConnectionsBalancer::from_config(&duplicated).unwrap_err(),
        BalancerError::duplicate_server("a")
    );

    let invalid = BalancerConfig {
        max_select_retries: 0,
        servers: vec![],
    };
    assert!(LeastConnectionsBalancer::from_config(&invalid).is_err());
}
