//! Racing claimants never start the same job twice.
//!
//! Claims are raced on one in-memory store, on several SQLite pools sharing a
//! database file, and between two schedulers ticking on one table.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{config, document, RecordingHooks, ScriptedSampler};
use futures::future::join_all;
use prometheus_admission::builders::AdmissionServiceBuilder;
use prometheus_admission::core::{CostTier, JobId, JobState, JobStore, TierFilter};
use prometheus_admission::infra::{InMemoryJobStore, SqliteJobStore};

const JOBS: usize = 40;
const CLAIMANTS: usize = 8;

// ============================================================================
// Helpers
// ============================================================================

async fn seed(store: &dyn JobStore, n: usize) -> Vec<JobId> {
    let mut ids = Vec::with_capacity(n);
    for _ in 0..n {
        let job = store
            .enqueue(document(3).with_tier(CostTier::Default))
            .await
            .unwrap();
        ids.push(job.id);
    }
    ids
}

/// Claim until the queue is empty, returning everything this claimant got.
async fn drain(store: Arc<dyn JobStore>) -> Vec<JobId> {
    let mut claimed = Vec::new();
    while let Some(job) = store.claim_next(TierFilter::Any).await.unwrap() {
        assert_eq!(job.state, JobState::Running);
        assert!(job.started_at_ms.is_some());
        claimed.push(job.id);
        tokio::task::yield_now().await;
    }
    claimed
}

async fn race(stores: Vec<Arc<dyn JobStore>>) -> Vec<JobId> {
    let tasks = (0..CLAIMANTS)
        .map(|i| tokio::spawn(drain(Arc::clone(&stores[i % stores.len()]))));
    join_all(tasks)
        .await
        .into_iter()
        .flat_map(Result::unwrap)
        .collect()
}

fn assert_claimed_once(claimed: &[JobId], seeded: &[JobId]) {
    let unique: HashSet<JobId> = claimed.iter().copied().collect();
    assert_eq!(unique.len(), claimed.len(), "a job was claimed twice");
    assert_eq!(unique, seeded.iter().copied().collect::<HashSet<_>>());
}

// ============================================================================
// Stores
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn in_memory_claims_are_exclusive() {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let seeded = seed(store.as_ref(), JOBS).await;

    let claimed = race(vec![Arc::clone(&store)]).await;
    assert_claimed_once(&claimed, &seeded);
    assert_eq!(store.counts().await.unwrap().running, JOBS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sqlite_claims_are_exclusive_across_pools() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("jobs.db").display());

    let first = SqliteJobStore::connect(&url, 2).await.unwrap();
    first.migrate().await.unwrap();
    let mut stores: Vec<Arc<dyn JobStore>> = vec![Arc::new(first)];
    for _ in 0..3 {
        let store = SqliteJobStore::connect(&url, 2).await.unwrap();
        stores.push(Arc::new(store));
    }
    let seeded = seed(stores[0].as_ref(), JOBS).await;

    let claimed = race(stores.clone()).await;
    assert_claimed_once(&claimed, &seeded);

    let counts = stores[3].counts().await.unwrap();
    assert_eq!(counts.running, JOBS);
    assert_eq!(counts.queued, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deleted_jobs_are_never_claimed() {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let seeded = seed(store.as_ref(), 4).await;
    assert!(store.delete(seeded[0]).await.unwrap());

    let claimed = drain(Arc::clone(&store)).await;
    assert_eq!(claimed, seeded[1..].to_vec());
}

// ============================================================================
// Schedulers
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_schedulers_respect_the_heavy_cap() {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    for _ in 0..6 {
        store
            .enqueue(document(500).with_tier(CostTier::Heavy))
            .await
            .unwrap();
    }

    let mut services = Vec::new();
    let mut hooks = Vec::new();
    for _ in 0..2 {
        let recorder = RecordingHooks::new();
        hooks.push(Arc::clone(&recorder));
        let service = AdmissionServiceBuilder::new(config(6, 1), recorder)
            .with_store(Arc::clone(&store))
            .with_sampler(ScriptedSampler::new(0))
            .without_lock()
            .build()
            .await
            .unwrap();
        services.push(Arc::new(service));
    }

    for _ in 0..5 {
        let a = Arc::clone(&services[0]);
        let b = Arc::clone(&services[1]);
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.tick_once().await }),
            tokio::spawn(async move { b.tick_once().await }),
        );
        ra.unwrap().unwrap();
        rb.unwrap().unwrap();

        let counts = store.counts().await.unwrap();
        assert!(counts.running_by_tier.heavy <= 1);
        assert_eq!(counts.running + counts.queued, 6);
    }

    // Two claimants can both back off in the same round; a lone tick settles it.
    services[0].tick_once().await.unwrap();
    assert_eq!(store.counts().await.unwrap().running_by_tier.heavy, 1);

    let started: Vec<JobId> = hooks.iter().flat_map(|h| h.started()).collect();
    let unique: HashSet<JobId> = started.iter().copied().collect();
    assert_eq!(unique.len(), started.len(), "a job was started twice");
    assert_eq!(started.len(), 1);
}
