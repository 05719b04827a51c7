use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use taskpool::{join_all_async, Config as PoolConfig, Executor, Task};
use std::{hint::black_box, time::Duration};

fn create_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .enable_all()
        .build()
        .unwrap()
}

// Benchmark 1: Submit overhead
fn bench_submit_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_overhead");

    for size in [100, 1000, 10000] {
        group.throughput(Throughput::Elements(size as u64));

        for (name, config) in [("cpu_bound", PoolConfig::cpu_bound()), ("io_bound", PoolConfig::io_bound())] {
            let executor = Executor::with_config(config).unwrap();
            group.bench_with_input(BenchmarkId::new(name, size), &size, |b, &size| {
                b.iter(|| {
                    let futures: Vec<_> = (0..size)
                        .map(|i| executor.submit(move || Ok(black_box(i))).unwrap())
                        .collect();
                    for future in futures {
                        black_box(future.get(None).unwrap());
                    }
                });
            });
            executor.shutdown();
        }
    }

    group.finish();
}

// Benchmark 2: Blocking work across pool sizes
fn bench_pool_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_sizes");
    group.sample_size(10);

    for max in [Some(1), Some(4), Some(16), None] {
        let label = max.map_or("on_demand".to_string(), |m| m.to_string());
        let executor = Executor::new(max, Duration::from_secs(5), None).unwrap();
        group.bench_function(BenchmarkId::new("sleep_200us_x64", label), |b| {
            b.iter(|| {
                let futures: Vec<_> = (0..64)
                    .map(|i| {
                        executor
                            .submit(move || {
                                std::thread::sleep(Duration::from_micros(200));
                                Ok(i)
                            })
                            .unwrap()
                    })
                    .collect();
                for future in futures {
                    black_box(future.get(None).unwrap());
                }
            });
        });
        executor.shutdown();
    }

    group.finish();
}

// Benchmark 3: Continuation chains
fn bench_then_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("then_chain");
    let executor = Executor::with_config(PoolConfig::cpu_bound()).unwrap();

    for depth in [1, 10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter(|| {
                let task = Task::new(|| Ok(0_u64));
                for _ in 0..depth {
                    task.then(|x| Ok(x + 1)).unwrap();
                }
                let future = executor.submit_task(task).unwrap();
                black_box(future.get(None).unwrap());
            });
        });
    }

    group.finish();
    executor.shutdown();
}

// Benchmark 4: Async retrieval
fn bench_async_join(c: &mut Criterion) {
    let rt = create_runtime();
    let executor = Executor::with_config(PoolConfig::io_bound()).unwrap();

    c.bench_function("join_all_async_1000", |b| {
        b.to_async(&rt).iter(|| {
            let futures: Vec<_> = (0..1000)
                .map(|i| executor.submit(move || Ok(i)).unwrap())
                .collect();
            async move {
                black_box(join_all_async(&futures).await);
            }
        });
    });

    executor.shutdown();
}

criterion_group!(
    benches,
    bench_submit_overhead,
    bench_pool_sizes,
    bench_then_chain,
    bench_async_join
);
criterion_main!(benches);
