#[cfg(test)]
mod tests {
    use diagram_pool::{
        ErrorKind,
        MemorySample,
        PoolConfig,
        PoolController,
        TaskExecutor,
        TaskOptions,
        TaskRequest,
        WorkerId,
        WorkerPool,
    };
    use std::{
        future::Future,
        thread,
        time::{Duration, Instant},
    };

    async fn measure<F, Fut, T>(name: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let start = Instant::now();
        let result = f().await;
        let elapsed = start.elapsed();
        println!("✓ {}: {:?}", name, elapsed);
        result
    }

    /// Считает строки диаграммы; `sleep:N` имитирует тяжёлый разбор
    struct LineCounter;

    impl TaskExecutor for LineCounter {
        type Output = usize;
        type Error = String;

        fn execute(&mut self, request: &TaskRequest) -> Result<usize, String> {
            let count = |code: &str| -> usize {
                if let Some(ms) = code.strip_prefix("sleep:").and_then(|ms| ms.parse().ok()) {
                    thread::sleep(Duration::from_millis(ms));
                }
                code.lines().count()
            };
            Ok(match request {
                TaskRequest::Parse { code, .. } | TaskRequest::Validate { code } => count(code),
                TaskRequest::BatchParse { codes, .. } => codes.iter().map(|c| count(c)).sum(),
            })
        }
    }

    async fn pool(config: PoolConfig) -> WorkerPool<usize> {
        PoolController::initialize_with_probe(
            config,
            |_: WorkerId| Ok::<_, String>(LineCounter),
            || None::<MemorySample>,
        )
        .await
        .unwrap()
    }

    fn diagram(i: usize) -> String {
        format!("@startuml\nA -> B : {i}\nB --> A\n@enduml")
    }

    #[tokio::test]
    async fn load_test_1_many_fast_tasks() {
        println!("\n=== LOAD TEST 1: 10k быстрых задач ===");
        let pool = pool(PoolConfig::new(4, 8, 10_000)).await;

        let results = measure("10k parse tasks", || async {
            let handles: Vec<_> = (0..10_000)
                .map(|i| pool.submit(TaskRequest::parse(diagram(i)), TaskOptions::default()))
                .collect();
            let mut out = Vec::with_capacity(handles.len());
            for handle in handles {
                out.push(handle.await);
            }
            out
        })
        .await;

        assert!(results.iter().all(|r| r == &Ok(4)));
        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.tasks_completed, 10_000);
        assert_eq!(stats.tasks_failed, 0);
        assert_eq!(stats.queue_length, 0);
        assert!(stats.pool_size <= 8);
        println!("  Воркеров: {}, среднее время: {:.4}ms", stats.pool_size, stats.average_task_time_ms);

        let report = pool.performance_report().await.unwrap().unwrap();
        // журнал хранит только последние записи
        assert_eq!(report.total_tasks, 1000);
        assert!((report.success_rate - 100.0).abs() < 1e-9);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn load_test_2_mixed_priorities() {
        println!("\n=== LOAD TEST 2: смешанные приоритеты ===");
        let pool = pool(PoolConfig::new(2, 4, 5_000)).await;

        let handles: Vec<_> = (0..2_000)
            .map(|i| {
                let options = if i % 4 == 0 { TaskOptions::high() } else { TaskOptions::default() };
                let request = if i % 100 == 0 {
                    TaskRequest::batch_parse([diagram(i), diagram(i + 1)])
                } else {
                    TaskRequest::validate_code(diagram(i))
                };
                pool.submit(request, options)
            })
            .collect();

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, 1_980 * 4 + 20 * 8);
        println!("  ✓ Строк обработано: {}", total);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn load_test_3_bounds_hold_across_bursts() {
        println!("\n=== LOAD TEST 3: всплески нагрузки ===");
        let pool = pool(PoolConfig::new(2, 6, 1_000)).await;

        for burst in 0..3 {
            let handles: Vec<_> = (0..60)
                .map(|_| pool.submit(TaskRequest::parse("sleep:5"), TaskOptions::default()))
                .collect();

            let stats = pool.stats().await.unwrap();
            assert!(stats.pool_size >= 2 && stats.pool_size <= 6);
            println!("  Всплеск {}: воркеров {}, очередь {}", burst, stats.pool_size, stats.queue_length);

            for handle in handles {
                assert!(handle.await.is_ok());
            }
            for _ in 0..6 {
                pool.run_health_check().await.unwrap();
            }
            assert_eq!(pool.stats().await.unwrap().pool_size, 2);
        }
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn load_test_4_overload_rejects() {
        println!("\n=== LOAD TEST 4: перегрузка очереди ===");
        let pool = pool(PoolConfig::new(1, 2, 50).with_adaptive_pooling(false)).await;

        let handles: Vec<_> = (0..500)
            .map(|_| pool.submit(TaskRequest::parse("sleep:1"), TaskOptions::default()))
            .collect();

        let mut ok = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await {
                Ok(_) => ok += 1,
                Err(e) => {
                    assert_eq!(e.kind(), ErrorKind::Capacity);
                    rejected += 1;
                }
            }
        }
        assert!(rejected > 0);
        assert_eq!(ok + rejected, 500);

        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.tasks_completed, ok as u64);
        assert_eq!(stats.tasks_queued, ok as u64);
        println!("  Выполнено: {}, отклонено: {}", ok, rejected);
        pool.shutdown().await;
    }
}
