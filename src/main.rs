//! Ember Cache demo
//!
//! Walks a small cache through puts, evictions, miss-fill and expiry against
//! an in-memory backing store. Configuration comes from the `EMBER_*`
//! environment variables; `RUST_LOG` controls log output.

use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ember_cache::{BackingStore, Cache, CacheConfig, MemoryStore};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ember_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Ember Cache demo");

    let config = CacheConfig::from_env();
    info!(
        "Configuration loaded: max_size={}, ttl_ms={}, refresh_ms={}",
        config.max_size, config.ttl_ms, config.refresh_ms
    );

    let store = Arc::new(MemoryStore::new());
    store
        .save(&"seeded".to_string(), &"from the backing store".to_string())
        .context("seeding backing store")?;

    let cache: Cache<String, String> =
        Cache::with_expiry_listener(config, store.clone(), |key: &String| {
            info!(%key, "Entry expired");
        })
        .context("creating cache")?;

    for i in 0..3 {
        cache.put(format!("key{}", i), format!("value{}", i))?;
    }
    info!(size = cache.size(), "Initial writes done");

    let seeded = cache.get(&"seeded".to_string())?;
    info!(?seeded, "Miss filled from backing store");

    let key0 = cache.get(&"key0".to_string())?;
    info!(?key0, "Read back");

    let ttl = cache.config().ttl();
    if let Some(ttl) = ttl.filter(|ttl| *ttl <= Duration::from_secs(5)) {
        info!(?ttl, "Waiting for entries to expire");
        sleep(ttl + Duration::from_millis(200));
    }

    let stats = cache.stats();
    info!(
        "Stats: hits={}, misses={}, evictions={}, expirations={}, loads={}, entries={}, hit_rate={:.2}",
        stats.hits,
        stats.misses,
        stats.evictions,
        stats.expirations,
        stats.loads,
        stats.total_entries,
        stats.hit_rate()
    );
    info!(persisted = store.len(), "Backing store size");

    cache.shutdown();
    info!("Demo complete");
    Ok(())
}
