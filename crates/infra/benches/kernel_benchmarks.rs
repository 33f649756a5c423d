use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use polity_analytics::{Thresholds, assess, gini, in_degree};
use polity_budget::{ActivateBudget, AdjustAllocations, AllocationChange, CreateBudget, FlexClass, ItemSpec};
use polity_core::{ActorId, BudgetId, CommandId, ManualClock, MandateId, TickId};
use polity_infra::event_store::{EventStore, InMemoryEventStore, UncommittedEvent};
use polity_infra::projections::{ProjectionEngine, governance_registry};
use polity_infra::triggers::{STREAM_TYPE, SystemEvent, TickRecorded, system_stream};
use polity_infra::{Kernel, KernelConfig};
use polity_mandates::{MandateChartered, MandateEvent, mandate_stream};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn store() -> InMemoryEventStore {
    InMemoryEventStore::new(governance_registry().unwrap())
}

fn setup_budget() -> (Kernel<InMemoryEventStore>, Arc<ManualClock>, BudgetId, ActorId) {
    let clock = Arc::new(ManualClock::new(t0()));
    let kernel = Kernel::new(Arc::new(store()), clock.clone(), KernelConfig::default()).unwrap();
    let steward = ActorId::new();
    let budget_id = BudgetId::new();
    kernel
        .create_budget(
            CreateBudget {
                budget_id,
                name: "Bench".to_string(),
                steward,
                scope: "budget:bench".to_string(),
                total: Decimal::from(2_000_000),
                items: vec![
                    ItemSpec {
                        key: "a".to_string(),
                        amount: Decimal::from(1_000_000),
                        flex_class: FlexClass::Flexible,
                    },
                    ItemSpec {
                        key: "b".to_string(),
                        amount: Decimal::from(1_000_000),
                        flex_class: FlexClass::Flexible,
                    },
                ],
            },
            CommandId::new(),
            Some(steward),
        )
        .unwrap();
    kernel
        .activate_budget(ActivateBudget { budget_id }, CommandId::new(), Some(steward))
        .unwrap();
    (kernel, clock, budget_id, steward)
}

fn swing(budget_id: BudgetId, i: i64) -> AdjustAllocations {
    // Alternate direction so the allocation oscillates instead of draining.
    let delta = if i % 2 == 0 { Decimal::from(1_000) } else { Decimal::from(-1_000) };
    AdjustAllocations {
        budget_id,
        changes: vec![
            AllocationChange {
                key: "a".to_string(),
                delta,
            },
            AllocationChange {
                key: "b".to_string(),
                delta: -delta,
            },
        ],
        memo: None,
    }
}

fn tick_marker(at: DateTime<Utc>) -> SystemEvent {
    SystemEvent::TickRecorded(TickRecorded {
        tick_id: TickId::new(),
        gini: 0.0,
        max_in_degree: 0,
        active_edges: 0,
        active_mandates: 0,
        overdue_mandates: 0,
        occurred_at: at,
    })
}

fn bench_command_execution_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_execution_latency");

    group.bench_function("adjust_allocations_with_history", |b| {
        let (kernel, clock, budget_id, steward) = setup_budget();
        for i in 0..100 {
            clock.advance(Duration::seconds(1));
            kernel.adjust_allocations(swing(budget_id, i), CommandId::new(), Some(steward)).unwrap();
        }

        let mut i = 100;
        b.iter(|| {
            clock.advance(Duration::seconds(1));
            i += 1;
            black_box(
                kernel
                    .adjust_allocations(swing(budget_id, i), CommandId::new(), Some(steward))
                    .unwrap(),
            );
        });
    });

    group.finish();
}

fn bench_event_append_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_append_throughput");

    for batch_size in [1usize, 10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch_size), batch_size, |b, &size| {
            let store = store();
            let stream = system_stream();
            let mut version = 0u64;
            b.iter(|| {
                let command_id = CommandId::new();
                let batch: Vec<UncommittedEvent> = (0..size)
                    .map(|_| {
                        UncommittedEvent::from_typed(&stream, STREAM_TYPE, command_id, None, &tick_marker(t0())).unwrap()
                    })
                    .collect();
                let committed = store.append(&stream, version, batch).unwrap();
                version += committed.len() as u64;
                black_box(committed);
            });
        });
    }

    group.finish();
}

fn bench_projection_rebuild_speed(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection_rebuild_speed");

    for event_count in [100usize, 1_000, 10_000].iter() {
        let store = store();
        for i in 0..*event_count {
            let id = MandateId::new();
            let at = t0() + Duration::seconds(i as i64);
            let ev = MandateEvent::Chartered(MandateChartered {
                mandate_id: id,
                title: format!("office-{i}"),
                holder: ActorId::new(),
                review_interval_days: 90,
                next_checkpoint_at: at + Duration::days(90),
                occurred_at: at,
            });
            let stream = mandate_stream(id);
            let uncommitted =
                UncommittedEvent::from_typed(&stream, polity_mandates::STREAM_TYPE, CommandId::new(), None, &ev).unwrap();
            store.append(&stream, 0, vec![uncommitted]).unwrap();
        }

        group.throughput(Throughput::Elements(*event_count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(event_count), event_count, |b, _| {
            let mut engine = ProjectionEngine::new();
            b.iter(|| black_box(engine.rebuild(&store).unwrap()));
        });
    }

    group.finish();
}

fn bench_concentration(c: &mut Criterion) {
    let mut group = c.benchmark_group("concentration");
    let thresholds = Thresholds::default();

    for actors in [100usize, 1_000, 10_000].iter() {
        let nodes: Vec<ActorId> = (0..*actors).map(|_| ActorId::new()).collect();
        // Each actor delegates to one of a handful of hubs.
        let edges: Vec<(ActorId, ActorId)> = nodes
            .iter()
            .enumerate()
            .skip(10)
            .map(|(i, n)| (*n, nodes[i % 10]))
            .collect();

        group.throughput(Throughput::Elements(edges.len() as u64));
        group.bench_with_input(BenchmarkId::new("assess", actors), &edges, |b, edges| {
            b.iter(|| {
                let degrees = in_degree(edges.iter().copied());
                black_box(assess(&degrees, &thresholds))
            });
        });

        let values: Vec<u64> = (0..*actors as u64).map(|i| i % 37).collect();
        group.bench_with_input(BenchmarkId::new("gini", actors), &values, |b, values| {
            b.iter(|| black_box(gini(values)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_command_execution_latency,
    bench_event_append_throughput,
    bench_projection_rebuild_speed,
    bench_concentration
);
criterion_main!(benches);
