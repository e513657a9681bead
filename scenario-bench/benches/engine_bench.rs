//! Scenario engine benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use scenario_core::{
    ConversationKey, EngineConfig, MemoryLockStore, NamedState, ScenarioEngine, StateRef,
};
use scenario_journal::FsyncPolicy;
use scenario_storage::JournalHistoryStore;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;

// Fresh conversation per iteration where the history must start clean
static CHAT_COUNTER: AtomicI64 = AtomicI64::new(0);

fn next_key() -> ConversationKey {
    let id = CHAT_COUNTER.fetch_add(1, Ordering::Relaxed);
    ConversationKey::new(id, id)
}

fn setup_dialog(engine: &ScenarioEngine) {
    let initial: StateRef = NamedState::initial("Initial").into_ref();
    let menu = NamedState::new("Menu").into_ref();
    let detail = NamedState::new("Detail").into_ref();

    engine.set_initial_state(initial.clone()).unwrap();
    engine.add_transition(&initial, "start", &menu, None).unwrap();
    engine.add_transition(&menu, "select", &detail, None).unwrap();
    engine.add_transition(&detail, "menu", &menu, None).unwrap();
}

fn create_memory_engine() -> ScenarioEngine {
    let engine = ScenarioEngine::in_memory(EngineConfig::default());
    setup_dialog(&engine);
    engine
}

fn create_journal_engine(policy: FsyncPolicy) -> (TempDir, ScenarioEngine) {
    let dir = TempDir::new().unwrap();
    let store = JournalHistoryStore::open(dir.path().join("h.journal"), policy, 10_000).unwrap();
    let engine = ScenarioEngine::new(
        EngineConfig::default(),
        Arc::new(store),
        Arc::new(MemoryLockStore::new()),
    );
    setup_dialog(&engine);
    (dir, engine)
}

fn bench_next_transition(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("engine_next_transition");
    group.throughput(Throughput::Elements(1));

    let engine = create_memory_engine();
    group.bench_function("memory", |b| {
        b.to_async(&rt).iter(|| async {
            let key = next_key();
            black_box(
                engine
                    .execute_next_transition(key, "start", None, Value::Null)
                    .await
                    .unwrap(),
            )
        });
    });

    for (name, policy) in [
        ("journal_no_fsync", FsyncPolicy::Never),
        ("journal_fsync_every_100", FsyncPolicy::EveryN(100)),
    ] {
        let (_dir, engine) = create_journal_engine(policy);
        group.bench_function(name, |b| {
            b.to_async(&rt).iter(|| async {
                let key = next_key();
                black_box(
                    engine
                        .execute_next_transition(key, "start", None, Value::Null)
                        .await
                        .unwrap(),
                )
            });
        });
    }

    group.finish();
}

fn bench_menu_loop(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("engine_menu_loop");
    group.throughput(Throughput::Elements(2));

    // Menu -> Detail -> Menu truncates back to the same depth every round
    let engine = create_memory_engine();
    let key = next_key();
    rt.block_on(engine.execute_next_transition(key, "start", None, Value::Null))
        .unwrap();

    group.bench_function("select_then_menu", |b| {
        b.to_async(&rt).iter(|| async {
            engine
                .execute_next_transition(key, "select", None, Value::Null)
                .await
                .unwrap();
            black_box(
                engine
                    .execute_next_transition(key, "menu", None, Value::Null)
                    .await
                    .unwrap(),
            )
        });
    });

    group.bench_function("select_then_back", |b| {
        b.to_async(&rt).iter(|| async {
            engine
                .execute_next_transition(key, "select", None, Value::Null)
                .await
                .unwrap();
            black_box(
                engine
                    .execute_back_transition(key, Value::Null)
                    .await
                    .unwrap(),
            )
        });
    });

    group.finish();
}

fn bench_conversations(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("engine_conversations");

    for count in [10, 100, 1000] {
        let engine = create_memory_engine();
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.to_async(&rt).iter(|| async {
                for _ in 0..count {
                    let key = next_key();
                    black_box(engine.get_current_state(key).await.unwrap());
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_next_transition,
    bench_menu_loop,
    bench_conversations,
);

criterion_main!(benches);
