//! Interception overhead benchmarks.
//!
//! - Outermost crossing: context creation, four events, teardown
//! - Re-entrant crossings: the cost of being suppressed
//! - Fan-out: publishing to a growing number of listeners
//!
//! Run with: `cargo bench -p tripwire-runtime`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use tripwire_core::{
    BoundaryKind, Direction, Event, Listener, ListenerError, Protocol, RequestEvent,
    TransactionContexts,
};
use tripwire_runtime::{Instrumentation, ResponseDetails};

struct Discard;

impl Listener for Discard {
    fn listen(&self, event: &Event) -> Result<(), ListenerError> {
        black_box(event.sequence());
        Ok(())
    }
}

fn instrumentation(listeners: usize) -> Instrumentation {
    let instrumentation = Instrumentation::builder()
        .contexts(Arc::new(TransactionContexts::new()))
        .build();
    for _ in 0..listeners {
        instrumentation.add_listener(Arc::new(Discard));
    }
    instrumentation
}

fn crossing(instrumentation: &Instrumentation, kind: BoundaryKind, depth: usize) -> u32 {
    instrumentation
        .intercept(
            kind,
            || RequestEvent::new(Protocol::Http, Direction::Inbound, "bench").with_target("/"),
            || {
                if depth > 1 {
                    Ok::<_, ListenerError>(crossing(instrumentation, kind, depth - 1))
                } else {
                    Ok(1)
                }
            },
            |_| ResponseDetails::new().with_status(200),
        )
        .expect("crossing succeeds")
}

fn bench_outermost(c: &mut Criterion) {
    let mut group = c.benchmark_group("outermost");
    group.throughput(Throughput::Elements(1));

    let instrumentation = instrumentation(1);
    group.bench_function("service", |b| {
        b.iter(|| crossing(black_box(&instrumentation), BoundaryKind::SERVICE, 1));
    });
    group.bench_function("http_client", |b| {
        b.iter(|| crossing(black_box(&instrumentation), BoundaryKind::HTTP_CLIENT, 1));
    });

    group.finish();
}

fn bench_reentrant(c: &mut Criterion) {
    let mut group = c.benchmark_group("reentrant");
    let instrumentation = instrumentation(1);

    for depth in [1, 4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter(|| crossing(&instrumentation, BoundaryKind::SERVICE, depth));
        });
    }

    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");

    for listeners in [0, 1, 8, 32] {
        let instrumentation = instrumentation(listeners);
        group.bench_with_input(
            BenchmarkId::from_parameter(listeners),
            &listeners,
            |b, _| {
                b.iter(|| crossing(&instrumentation, BoundaryKind::SERVICE, 1));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_outermost, bench_reentrant, bench_fan_out);
criterion_main!(benches);
