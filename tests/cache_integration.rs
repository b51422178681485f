//! The search cache wired into full research runs, plus store-level
//! behaviour that needs a real database file.

mod common;

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;

use common::{fast_retry, hit, settings, FakeModel, FakeSearch};
use deep_research::cache::{CacheManager, ManualClock};
use deep_research::config::CacheConfig;
use deep_research::orchestrator::{Orchestrator, ResearchRequest};
use deep_research::progress::NoProgress;

fn cache_config(tmp: &TempDir, ttl_secs: u64, max_entries: usize) -> CacheConfig {
    CacheConfig {
        path: tmp.path().join("research-cache.sqlite"),
        ttl_secs,
        max_entries,
        ..CacheConfig::default()
    }
}

fn clock_2026() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap(),
    ))
}

fn single_query(query: &str) -> ResearchRequest {
    ResearchRequest {
        approved_queries: Some(vec![query.to_string()]),
        max_waves: Some(1),
        ..ResearchRequest::new("Climate policy")
    }
}

async fn run_once(search: &Arc<FakeSearch>, cache: &Arc<CacheManager>, query: &str) {
    let orchestrator = Orchestrator::new(
        search.clone(),
        Arc::new(FakeModel::new(&[])),
        settings(),
    )
    .with_retry(fast_retry())
    .with_cache(cache.clone());
    let outcome = orchestrator
        .run(single_query(query), &NoProgress)
        .await
        .unwrap();
    assert_eq!(outcome.report.sources.len(), 2);
}

fn climate_search(query: &str) -> Arc<FakeSearch> {
    Arc::new(FakeSearch::new().with(
        query,
        vec![
            hit(
                "EU emissions trading reform",
                "https://climate.example.eu/ets-2023",
                "The 2023 reform tightened the emissions cap",
                Some("2023-05-16"),
            ),
            hit(
                "US Inflation Reduction Act",
                "https://energy.example.gov/ira",
                "Tax credits for clean energy deployment",
                Some("2023-08-16"),
            ),
        ],
    ))
}

#[tokio::test]
async fn test_repeat_run_is_served_from_cache_until_ttl() {
    let tmp = TempDir::new().unwrap();
    let clock = clock_2026();
    let cache = Arc::new(
        CacheManager::open_with_clock(&cache_config(&tmp, 3600, 100), clock.clone())
            .await
            .unwrap(),
    );
    let query = "climate policy 2023";
    let search = climate_search(query);

    run_once(&search, &cache, query).await;
    assert_eq!(search.call_count(), 1);

    run_once(&search, &cache, query).await;
    assert_eq!(search.call_count(), 1);

    clock.advance_secs(3600);
    run_once(&search, &cache, query).await;
    assert_eq!(search.call_count(), 2);

    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.l1_hits, 1);
    assert_eq!(stats.writes, 2);
}

#[tokio::test]
async fn test_cache_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let clock = clock_2026();
    let config = cache_config(&tmp, 3600, 100);
    let query = "climate policy 2023";
    let search = climate_search(query);

    {
        let cache = Arc::new(
            CacheManager::open_with_clock(&config, clock.clone())
                .await
                .unwrap(),
        );
        run_once(&search, &cache, query).await;
        cache.close().await;
    }

    clock.advance_secs(60);
    let cache = Arc::new(
        CacheManager::open_with_clock(&config, clock.clone())
            .await
            .unwrap(),
    );
    run_once(&search, &cache, query).await;

    assert_eq!(search.call_count(), 1);
    assert_eq!(cache.stats().await.unwrap().l2_hits, 1);
}

#[tokio::test]
async fn test_time_sensitive_query_always_searches() {
    let tmp = TempDir::new().unwrap();
    let cache = Arc::new(
        CacheManager::open_with_clock(&cache_config(&tmp, 3600, 100), clock_2026())
            .await
            .unwrap(),
    );
    let query = "latest climate policy news";
    let search = climate_search(query);

    run_once(&search, &cache, query).await;
    run_once(&search, &cache, query).await;

    assert_eq!(search.call_count(), 2);
    assert!(cache.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_lru_keeps_most_recent_entries() {
    let tmp = TempDir::new().unwrap();
    let clock = clock_2026();
    let cache = CacheManager::open_with_clock(&cache_config(&tmp, 86_400, 5), clock.clone())
        .await
        .unwrap();

    let hits = vec![hit("Result", "https://example.org/r", "snippet", None)];
    for i in 0..8 {
        cache
            .set(&format!("renewable subsidy study {}", i), &hits, None)
            .await
            .unwrap();
        clock.advance_secs(1);
    }

    assert_eq!(cache.len().await.unwrap(), 5);
    cache.clear_l1();
    for i in 0..3 {
        let q = format!("renewable subsidy study {}", i);
        assert!(cache.get(&q).await.unwrap().is_none(), "{} should be evicted", q);
    }
    for i in 3..8 {
        let q = format!("renewable subsidy study {}", i);
        assert!(cache.get(&q).await.unwrap().is_some(), "{} should be cached", q);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_get_and_set() {
    let tmp = TempDir::new().unwrap();
    let cache = Arc::new(
        CacheManager::open_with_clock(&cache_config(&tmp, 3600, 100), clock_2026())
            .await
            .unwrap(),
    );

    let mut handles = Vec::new();
    for i in 0..16 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            let query = format!("carbon border tax analysis {}", i);
            let hits = vec![hit(
                &format!("Analysis {}", i),
                &format!("https://example.org/cbam/{}", i),
                "snippet",
                None,
            )];
            cache.set(&query, &hits, Some("summary")).await.unwrap();
            let got = cache.get(&query).await.unwrap().unwrap();
            assert_eq!(got.results, hits);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(cache.len().await.unwrap(), 16);
    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.writes, 16);
    assert_eq!(stats.l1_hits + stats.l2_hits, 16);
}
