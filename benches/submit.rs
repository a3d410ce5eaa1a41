//! Performance benchmarks for a3s-audit
//!
//! Run with: cargo bench

use a3s_audit::provider::memory::MemoryEventStore;
use a3s_audit::types::{AuditEntry, ChunkProcessed, EventData};
use a3s_audit::{AuditService, SessionRequest, Subscriber};
use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;

fn chunk(index: u32) -> EventData {
    EventData::ChunkProcessed(ChunkProcessed {
        chunk_index: index,
        input_words: 480,
        output_words: 510,
        target_words: 500,
        within_tolerance: true,
        claims_addressed: Some(vec!["c1".to_string(), "c2".to_string()]),
        violations: None,
    })
}

fn bench_entry_serialization(c: &mut Criterion) {
    let entry = AuditEntry::new("bench-session", 42, chunk(3));

    c.bench_function("AuditEntry serialize", |b| {
        b.iter(|| serde_json::to_vec(&entry).unwrap());
    });

    let bytes = serde_json::to_vec(&entry).unwrap();
    c.bench_function("AuditEntry deserialize", |b| {
        b.iter(|| serde_json::from_slice::<AuditEntry>(&bytes).unwrap());
    });
}

fn bench_submit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let service = Arc::new(AuditService::with_store(MemoryEventStore::new()));
    let session_id = rt.block_on(async {
        service
            .start_session(SessionRequest::new("bench", "reconstruction"))
            .await
            .unwrap()
    });

    c.bench_function("submit_event (memory, no subscribers)", |b| {
        b.to_async(&rt).iter(|| {
            let service = service.clone();
            let session_id = session_id.clone();
            async move { service.submit_event(&session_id, chunk(0)).await.unwrap() }
        });
    });
}

fn bench_submit_throughput(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("submit_throughput");
    for subscribers in [0usize, 4, 16] {
        group.bench_function(format!("100 events, {} subscribers", subscribers), |b| {
            b.to_async(&rt).iter(|| async move {
                let service = Arc::new(AuditService::with_store(MemoryEventStore::new()));
                let session_id = service
                    .start_session(SessionRequest::new("bench", "reconstruction"))
                    .await
                    .unwrap();

                let mut receivers = Vec::new();
                for _ in 0..subscribers {
                    let (subscriber, rx) = Subscriber::channel(256);
                    service.subscribe(&session_id, subscriber).await.unwrap();
                    receivers.push(rx);
                }

                for i in 0..100 {
                    service.submit_event(&session_id, chunk(i)).await.unwrap();
                }
                receivers
            });
        });
    }
    group.finish();
}

fn bench_concurrent_sessions(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("8 sessions x 50 events (concurrent)", |b| {
        b.to_async(&rt).iter(|| async {
            let service = Arc::new(AuditService::with_store(MemoryEventStore::new()));
            let mut handles = Vec::new();
            for s in 0..8 {
                let service = service.clone();
                handles.push(tokio::spawn(async move {
                    let id = service
                        .start_session(SessionRequest::new(format!("user-{}", s), "reconstruction"))
                        .await
                        .unwrap();
                    for i in 0..50 {
                        service.submit_event(&id, chunk(i)).await.unwrap();
                    }
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }
        });
    });
}

criterion_group!(
    benches,
    bench_entry_serialization,
    bench_submit,
    bench_submit_throughput,
    bench_concurrent_sessions,
);
criterion_main!(benches);
