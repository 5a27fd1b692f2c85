use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use txguard::cache::CacheEntry;
use txguard::{CacheConfig, Error, ResilientCache};

/// Where concurrent loaders wait before returning a value.
enum LoaderPause {
    /// Sleep briefly so other callers pile up behind or beside the load.
    Sleep(Duration),
    /// Block until every caller is inside its loader at once.
    AllInFlight,
}

fn run_concurrent_misses(
    cache: Arc<ResilientCache<String>>,
    threads: usize,
    pause: LoaderPause,
) -> u32 {
    let loads = Arc::new(AtomicU32::new(0));
    let start = Arc::new(Barrier::new(threads));
    let in_flight = Arc::new(Barrier::new(threads));
    let pause = Arc::new(pause);

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let loads = Arc::clone(&loads);
            let start = Arc::clone(&start);
            let in_flight = Arc::clone(&in_flight);
            let pause = Arc::clone(&pause);
            thread::spawn(move || {
                start.wait();
                cache
                    .get_or_load("transactions", "txn-1", || {
                        loads.fetch_add(1, Ordering::SeqCst);
                        match *pause {
                            LoaderPause::Sleep(d) => thread::sleep(d),
                            LoaderPause::AllInFlight => {
                                in_flight.wait();
                            }
                        }
                        Ok::<_, Error>(Some("loaded".to_string()))
                    })
                    .unwrap()
            })
        })
        .collect();

    for h in handles {
        assert_eq!(h.join().unwrap().as_deref(), Some("loaded"));
    }
    loads.load(Ordering::SeqCst)
}

#[test]
fn test_concurrent_misses_each_run_the_loader() {
    let cache = Arc::new(ResilientCache::new(CacheConfig::default()));
    // Only completes if no caller is serialized behind another's load.
    let loads = run_concurrent_misses(Arc::clone(&cache), 8, LoaderPause::AllInFlight);

    assert_eq!(loads, 8);
    let stats = cache.cache_statistics("transactions");
    assert_eq!((stats.total, stats.hits, stats.misses), (8, 0, 8));
    assert_eq!(
        cache.get("transactions", "txn-1").unwrap(),
        Some(CacheEntry::plain(Some("loaded".to_string())))
    );
}

#[test]
fn test_single_flight_loads_exactly_once() {
    let cache = Arc::new(ResilientCache::new(
        CacheConfig::default().with_single_flight(true),
    ));
    let loads = run_concurrent_misses(
        Arc::clone(&cache),
        8,
        LoaderPause::Sleep(Duration::from_millis(20)),
    );

    assert_eq!(loads, 1);
    let stats = cache.cache_statistics("transactions");
    assert_eq!((stats.hits, stats.misses), (7, 1));
}

#[test]
fn test_versioned_updates_keep_highest_version() {
    let cache: Arc<ResilientCache<u64>> = Arc::new(ResilientCache::new(CacheConfig::default()));
    let accepted = Arc::new(AtomicU32::new(0));

    let handles: Vec<_> = (0..8u64)
        .map(|t| {
            let cache = Arc::clone(&cache);
            let accepted = Arc::clone(&accepted);
            thread::spawn(move || {
                for i in 0..50u64 {
                    let version = i * 8 + t;
                    if cache
                        .atomic_update_with_version("transactionStats", "acct-1", version, version)
                        .unwrap()
                    {
                        accepted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(
        cache.get("transactionStats", "acct-1").unwrap(),
        Some(CacheEntry::versioned(399, 399))
    );
    assert!(accepted.load(Ordering::SeqCst) >= 1);
}

#[test]
fn test_atomic_updates_on_different_caches_do_not_collide() {
    let cache: Arc<ResilientCache<String>> = Arc::new(ResilientCache::new(CacheConfig::default()));
    let handles: Vec<_> = ["transactions", "transactionStats", "transactionLocks"]
        .into_iter()
        .map(|name| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..100 {
                    cache.atomic_update(name, "shared-key", format!("{name}-{i}")).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    for name in cache.cache_names() {
        let entry = cache.get(&name, "shared-key").unwrap().unwrap();
        assert_eq!(entry.value, Some(format!("{name}-99")));
    }
}
