use criterion::{criterion_group, criterion_main, Criterion, BenchmarkId, Throughput};
use diagram_pool::{
    MemorySample, PoolConfig, PoolController, TaskExecutor, TaskOptions, TaskRequest, WorkerId, WorkerPool,
};
use std::hint::black_box;

fn create_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .enable_all()
        .build()
        .unwrap()
}

struct LineCounter;

impl TaskExecutor for LineCounter {
    type Output = usize;
    type Error = String;

    fn execute(&mut self, request: &TaskRequest) -> Result<usize, String> {
        Ok(match request {
            TaskRequest::Parse { code, .. } | TaskRequest::Validate { code } => code.lines().count(),
            TaskRequest::BatchParse { codes, .. } => codes.iter().map(|c| c.lines().count()).sum(),
        })
    }
}

fn build_pool(rt: &tokio::runtime::Runtime, config: PoolConfig) -> WorkerPool<usize> {
    rt.block_on(PoolController::initialize_with_probe(
        config,
        |_: WorkerId| Ok::<_, String>(LineCounter),
        || None::<MemorySample>,
    ))
    .unwrap()
}

const DIAGRAM: &str = "@startuml\nA -> B : request\nB --> A : response\n@enduml";

// Benchmark 1: накладные расходы submit -> результат
fn bench_submit_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_overhead");

    for size in [100, 1000, 10000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("parse", size), &size, |b, &size| {
            let rt = create_runtime();
            let pool = build_pool(&rt, PoolConfig::new(4, 8, 20_000));

            b.to_async(&rt).iter(|| {
                let pool = &pool;
                async move {
                    let handles: Vec<_> = (0..size)
                        .map(|_| pool.submit(TaskRequest::parse(DIAGRAM), TaskOptions::default()))
                        .collect();
                    for handle in handles {
                        black_box(handle.await.unwrap());
                    }
                }
            });
            rt.block_on(pool.shutdown());
        });
    }

    group.finish();
}

// Benchmark 2: масштабирование по числу воркеров
fn bench_worker_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("worker_scaling");
    group.sample_size(20);

    let tasks = 5000;
    group.throughput(Throughput::Elements(tasks as u64));

    for workers in [1, 2, 4, 8] {
        if workers <= num_cpus::get() * 2 {
            group.bench_with_input(BenchmarkId::new("workers", workers), &workers, |b, &workers| {
                let rt = create_runtime();
                let pool = build_pool(&rt, PoolConfig::new(workers, workers, tasks));

                b.to_async(&rt).iter(|| {
                    let pool = &pool;
                    async move {
                        let handles: Vec<_> = (0..tasks)
                            .map(|_| pool.submit(TaskRequest::validate_code(DIAGRAM), TaskOptions::default()))
                            .collect();
                        for handle in handles {
                            black_box(handle.await.unwrap());
                        }
                    }
                });
                rt.block_on(pool.shutdown());
            });
        }
    }

    group.finish();
}

// Benchmark 3: латентность высокоприоритетной задачи под нагрузкой
fn bench_priority_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_latency");
    group.sample_size(20);

    group.bench_function("high_behind_1000_normal", |b| {
        let rt = create_runtime();
        let pool = build_pool(&rt, PoolConfig::new(2, 2, 5_000));

        b.to_async(&rt).iter(|| {
            let pool = &pool;
            async move {
                let background: Vec<_> = (0..1000)
                    .map(|_| pool.submit(TaskRequest::parse(DIAGRAM), TaskOptions::default()))
                    .collect();

                let handle = pool.submit(TaskRequest::parse(DIAGRAM), TaskOptions::high());
                black_box(handle.await.unwrap());

                for h in background {
                    let _ = h.await;
                }
            }
        });
        rt.block_on(pool.shutdown());
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_submit_overhead,
    bench_worker_scaling,
    bench_priority_latency,
);

criterion_main!(benches);
