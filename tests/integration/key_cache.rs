//! Concurrency tests for the per-pairing key cache.
//!
//! First use of a pairing must negotiate exactly once no matter how many
//! callers race for it, and pairings must not serialize each other.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use qchat::keys::{KeyCache, SharedKey};
use qchat::negotiate::{Bb84Negotiator, KeyNegotiator};
use qchat_proto::bits::BitString;
use qchat_proto::message::{ConversationId, PairingId, UserId};

/// Slow negotiator that hands out a distinct key per call.
struct SlowCounting {
    calls: AtomicUsize,
    delay: Duration,
}

impl SlowCounting {
    fn new(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
        }
    }
}

impl KeyNegotiator for SlowCounting {
    fn negotiate(&self) -> SharedKey {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        let bits = (0..8).map(|i| (n >> i) & 1 == 1);
        SharedKey::new(BitString::from_bits(bits))
    }
}

fn pairing(party: &str, conversation: &str) -> PairingId {
    PairingId::new(UserId::new(party), ConversationId::new(conversation))
}

#[test]
fn racing_threads_negotiate_once() {
    const CALLERS: usize = 32;
    let cache = KeyCache::new(SlowCounting::new(Duration::from_millis(50)));
    let barrier = Barrier::new(CALLERS);
    let target = pairing("alice", "chat-1");

    let keys: Vec<SharedKey> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    cache.get_or_create(&target)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(cache.negotiator().calls.load(Ordering::SeqCst), 1);
    assert!(keys.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(cache.get(&target).as_ref(), keys.first());
    assert_eq!(cache.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_tasks_negotiate_once() {
    let cache = Arc::new(KeyCache::new(SlowCounting::new(Duration::from_millis(20))));
    let target = pairing("bob", "chat-2");

    let handles: Vec<_> = (0..64)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let target = target.clone();
            tokio::task::spawn_blocking(move || cache.get_or_create(&target))
        })
        .collect();

    let mut keys = Vec::new();
    for handle in handles {
        keys.push(handle.await.unwrap());
    }

    assert_eq!(cache.negotiator().calls.load(Ordering::SeqCst), 1);
    assert!(keys.iter().all(|k| *k == keys[0]));
}

#[test]
fn distinct_pairings_negotiate_in_parallel() {
    const PAIRINGS: usize = 8;
    let delay = Duration::from_millis(200);
    let cache = KeyCache::new(SlowCounting::new(delay));
    let barrier = Barrier::new(PAIRINGS);

    let start = Instant::now();
    std::thread::scope(|scope| {
        for i in 0..PAIRINGS {
            let cache = &cache;
            let barrier = &barrier;
            scope.spawn(move || {
                barrier.wait();
                cache.get_or_create(&pairing(&format!("user-{i}"), "shared-chat"));
            });
        }
    });

    assert_eq!(cache.negotiator().calls.load(Ordering::SeqCst), PAIRINGS);
    assert_eq!(cache.len(), PAIRINGS);
    // Serialized negotiation would take PAIRINGS * delay.
    assert!(start.elapsed() < delay * (PAIRINGS as u32) / 2);
}

#[test]
fn lookups_stay_responsive_during_a_slow_negotiation() {
    let delay = Duration::from_millis(300);
    let cache = KeyCache::new(SlowCounting::new(delay));
    let known = pairing("alice", "chat-1");
    let fresh = pairing("bob", "chat-1");
    let known_key = cache.get_or_create(&known);

    std::thread::scope(|scope| {
        scope.spawn(|| cache.get_or_create(&fresh));
        while cache.negotiator().calls.load(Ordering::SeqCst) < 2 {
            std::thread::yield_now();
        }

        let start = Instant::now();
        assert_eq!(cache.get(&known), Some(known_key.clone()));
        assert_eq!(cache.get_or_create(&known), known_key);
        assert!(cache.get(&fresh).is_none());
        assert_eq!(cache.len(), 1);
        assert!(start.elapsed() < delay / 3);
    });

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.negotiator().calls.load(Ordering::SeqCst), 2);
}

#[test]
fn seeded_cache_keys_are_reproducible_and_bounded() {
    let a = KeyCache::new(Bb84Negotiator::seeded(8, 2024));
    let b = KeyCache::new(Bb84Negotiator::seeded(8, 2024));
    for i in 0..10 {
        let p = pairing("carol", &format!("chat-{i}"));
        let ka = a.get_or_create(&p);
        assert_eq!(ka, b.get_or_create(&p));
        assert!(ka.len() <= 8);
    }
}
