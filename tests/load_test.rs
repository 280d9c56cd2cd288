//! Load testing for the data access gateway.

use std::sync::Arc;
use std::time::{Duration, Instant};

use foundation_gateway::cache::ShardedCache;
use foundation_gateway::datetime::SystemClock;
use serde_json::json;

mod common;

use common::{gateway_with, test_config, ScriptedDatabase};

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    let index = ((sorted.len() as f64 * p) as usize).min(sorted.len() - 1);
    sorted[index]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_load_respects_concurrency_limit() {
    let documents: Vec<_> = (0..50).map(|i| (format!("sku-{}", i), json!({"id": i}))).collect();
    let db = Arc::new(ScriptedDatabase::slow(Duration::from_millis(2)));
    let mut config = test_config(8, 5, Duration::from_secs(5));
    // Short TTL keeps a steady stream of misses reaching the database.
    config.cache.default_ttl_ms = 1;
    let (gateway, clock) = gateway_with(db.clone(), &config);

    for (key, doc) in &documents {
        gateway.write(key, doc.clone()).await.unwrap();
    }

    let concurrency = 32;
    let requests_per_task = 25;
    let total_requests = concurrency * requests_per_task;
    let start = Instant::now();

    let tasks: Vec<_> = (0..concurrency)
        .map(|task| {
            let gateway = gateway.clone();
            let clock = clock.clone();
            tokio::spawn(async move {
                let mut latencies = Vec::with_capacity(requests_per_task);
                for i in 0..requests_per_task {
                    let key = format!("sku-{}", (task * 7 + i) % 50);
                    let req_start = Instant::now();
                    let doc = gateway.read(&key).await.unwrap();
                    latencies.push(req_start.elapsed());
                    assert_eq!(doc["id"], json!((task * 7 + i) % 50));
                    clock.advance(Duration::from_millis(1));
                }
                latencies
            })
        })
        .collect();

    let mut all_latencies = Vec::new();
    for task in tasks {
        all_latencies.extend(task.await.unwrap());
    }
    let duration = start.elapsed();

    all_latencies.sort();
    println!("\n--- Load Test Results ---");
    println!("Total Requests: {}", total_requests);
    println!("Concurrency:    {}", concurrency);
    println!("Total Duration: {:?}", duration);
    println!("Database Calls: {}", db.calls());
    println!("Peak DB Calls:  {}", db.peak_in_flight());
    println!("P50 Latency:    {:?}", percentile(&all_latencies, 0.50));
    println!("P99 Latency:    {:?}", percentile(&all_latencies, 0.99));
    println!("-------------------------\n");

    assert_eq!(all_latencies.len(), total_requests);
    assert!(db.peak_in_flight() <= 8, "peak {}", db.peak_in_flight());

    let limiter = gateway.limiter().snapshot();
    assert_eq!(limiter.in_flight, 0);
    assert_eq!(limiter.waiting, 0);
    assert_eq!(limiter.issued_total, limiter.released_total);
    assert_eq!(limiter.timeouts_total, 0);
}

#[test]
fn test_cache_get_latency() {
    let cache = ShardedCache::with_capacity(10_000, 16, Arc::new(SystemClock));
    for i in 0..5_000 {
        cache
            .put(
                format!("sku-{}", i),
                json!({"id": i, "name": "desk lamp", "tags": ["home", "office"]}),
                Duration::from_secs(60),
            )
            .unwrap();
    }

    let mut latencies = Vec::with_capacity(20_000);
    for i in 0..20_000 {
        let key = format!("sku-{}", (i * 31) % 5_000);
        let start = Instant::now();
        let hit = cache.get(&key);
        latencies.push(start.elapsed());
        assert!(hit.is_some());
    }
    latencies.sort();

    let p50 = percentile(&latencies, 0.50);
    println!("Cache get P50: {:?}, P99: {:?}", p50, percentile(&latencies, 0.99));
    assert!(p50 < Duration::from_millis(1), "median get took {:?}", p50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_and_readers_converge() {
    let db = Arc::new(ScriptedDatabase::healthy());
    let (gateway, _clock) = gateway_with(db.clone(), &test_config(16, 5, Duration::from_secs(5)));

    let writers: Vec<_> = (0..8)
        .map(|w| {
            let gateway = gateway.clone();
            tokio::spawn(async move {
                for v in 0..20 {
                    gateway
                        .write(&format!("counter-{}", w), json!({"value": v}))
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    let readers: Vec<_> = (0..8)
        .map(|r| {
            let gateway = gateway.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    // Early reads may race the first write.
                    let _ = gateway.read(&format!("counter-{}", r)).await;
                }
            })
        })
        .collect();

    for task in writers.into_iter().chain(readers) {
        task.await.unwrap();
    }

    // Reads that raced a write must not have re-cached an older value.
    for w in 0..8 {
        let doc = gateway.read(&format!("counter-{}", w)).await.unwrap();
        assert_eq!(doc, json!({"value": 19}));
    }
    assert_eq!(gateway.limiter().snapshot().in_flight, 0);
}
