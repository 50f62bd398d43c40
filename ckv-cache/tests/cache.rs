use std::net::TcpListener;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use ckv_cache::{Cache, CacheConfig, LockMode};
use ckv_client::{ClientConfig, KVClient};
use ckv_common::CkvError;
use ckv_engine::MemoryStore;

fn cache() -> Cache<MemoryStore> {
    Cache::new(Arc::new(MemoryStore::new()), CacheConfig::propagating())
}

#[test]
fn concurrent_lockers_have_one_winner() {
    let cache = Arc::new(cache());
    let contenders = 8;
    let barrier = Arc::new(Barrier::new(contenders));

    let handles: Vec<_> = (0..contenders)
        .map(|idx| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache
                    .locks()
                    .distributed_lock(
                        "job",
                        &format!("worker-{idx}"),
                        LockMode::NotExist,
                        Duration::from_secs(10),
                    )
                    .expect("lock")
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|handle| handle.join().expect("join"))
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
}

#[test]
fn only_the_owner_can_unlock() {
    let cache = cache();
    let locks = cache.locks();
    let ttl = Duration::from_secs(10);

    assert!(locks.distributed_lock("k", "v1", LockMode::NotExist, ttl).unwrap());
    assert!(!locks.distributed_lock("k", "v2", LockMode::NotExist, ttl).unwrap());
    assert!(matches!(
        locks.unlock("k", "v2").unwrap_err(),
        CkvError::LockNotOwned
    ));
    assert!(cache.exists("k").unwrap());
    assert!(locks.unlock("k", "v1").unwrap());
    assert!(!cache.exists("k").unwrap());
}

#[test]
fn swallowed_unlock_mismatch_reads_false() {
    let cache = Cache::with_defaults(Arc::new(MemoryStore::new()));
    let locks = cache.locks();
    assert!(locks
        .distributed_lock("k", "v1", LockMode::NotExist, Duration::from_secs(10))
        .unwrap());
    assert!(!locks.unlock("k", "v2").unwrap());
    assert!(locks.unlock("k", "v1").unwrap());
}

#[test]
fn expired_lock_can_be_taken_by_another_owner() {
    let cache = cache();
    let locks = cache.locks();
    let ttl = Duration::from_millis(40);

    assert!(locks.distributed_lock("k", "v1", LockMode::NotExist, ttl).unwrap());
    thread::sleep(Duration::from_millis(80));
    assert!(!cache.exists("k").unwrap());
    assert!(locks.distributed_lock("k", "v2", LockMode::NotExist, ttl).unwrap());
    assert!(matches!(
        locks.unlock("k", "v1").unwrap_err(),
        CkvError::LockNotOwned
    ));
}

#[test]
fn preemptive_lock_waits_for_release() {
    let cache = Arc::new(cache());
    assert!(cache
        .locks()
        .distributed_lock("k", "holder", LockMode::NotExist, Duration::from_secs(10))
        .unwrap());

    let releaser = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            cache.locks().unlock("k", "holder").expect("unlock")
        })
    };

    assert!(cache
        .locks()
        .preemptive_lock("k", "waiter", Duration::from_secs(5))
        .unwrap());
    assert!(releaser.join().expect("join"));
    assert_eq!(cache.get("k").unwrap().as_deref(), Some("\"waiter\""));
}

#[test]
fn preemptive_lock_gives_up_at_deadline() {
    let cache = cache();
    let locks = cache.locks();
    locks
        .distributed_lock("k", "holder", LockMode::NotExist, Duration::from_secs(10))
        .unwrap();

    let started = std::time::Instant::now();
    assert!(!locks
        .preemptive_lock("k", "waiter", Duration::from_millis(60))
        .unwrap());
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(60));
    assert!(waited < Duration::from_secs(2));
}

#[test]
fn set_with_expire_twice_keeps_first_value() {
    let cache = cache();
    let ttl = Duration::from_secs(10);
    assert!(cache.set_with_expire("k", &1, ttl).unwrap());
    assert!(!cache.set_with_expire("k", &2, ttl).unwrap());
    assert_eq!(cache.get_json::<i32>("k").unwrap(), Some(1));
}

#[test]
fn ranked_set_ordering() {
    let cache = cache();
    let sets = cache.ranked();
    sets.zadd("s", "a", 1.0).unwrap();
    sets.zadd("s", "b", 2.0).unwrap();
    assert_eq!(sets.zrange("s", 0, -1).unwrap(), ["a", "b"]);
    assert_eq!(sets.zrevrange("s", 0, -1).unwrap(), ["b", "a"]);

    assert_eq!(sets.zrank("s", "a").unwrap(), Some(0));
    assert_eq!(sets.zincrby("s", "a", 5.0).unwrap(), Some(6.0));
    assert_eq!(sets.zrank("s", "a").unwrap(), Some(1));
    assert_eq!(sets.zrevrank("s", "a").unwrap(), Some(0));
    assert_eq!(sets.zrevrange("s", 0, 0).unwrap(), ["a"]);
}

#[test]
fn rename_respects_existing_target() {
    let cache = cache();
    let ttl = Duration::from_secs(10);
    cache.set_with_expire("old", "x", ttl).unwrap();
    cache.set_with_expire("new", "y", ttl).unwrap();
    assert!(!cache.rename_by_key("old", "new").unwrap());
    assert_eq!(cache.get("new").unwrap().as_deref(), Some("\"y\""));

    cache.delete("new").unwrap();
    assert!(cache.rename_by_key("old", "new").unwrap());
    assert!(!cache.exists("old").unwrap());
    assert_eq!(cache.get("new").unwrap().as_deref(), Some("\"x\""));
}

fn unreachable_client() -> KVClient {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    drop(listener);
    KVClient::with_config(ClientConfig {
        addr,
        connect_timeout: Some(Duration::from_millis(200)),
        ..ClientConfig::default()
    })
    .expect("client")
}

#[test]
fn unreachable_store_under_each_policy() {
    let store = Arc::new(unreachable_client());

    let lenient = Cache::with_defaults(Arc::clone(&store));
    assert!(!lenient.exists("k").unwrap());
    assert_eq!(lenient.get("k").unwrap(), None);
    assert!(!lenient.locks().unlock("k", "v").unwrap());
    assert!(lenient.ranked().zrange("s", 0, -1).unwrap().is_empty());

    let strict = Cache::new(store, CacheConfig::propagating());
    assert!(strict.exists("k").unwrap_err().is_unavailable());
    assert!(strict
        .locks()
        .distributed_lock("k", "v", LockMode::NotExist, Duration::from_secs(1))
        .unwrap_err()
        .is_unavailable());
}
