use diagram_pool::{PoolConfig, PoolController, TaskExecutor, TaskOptions, TaskRequest, WorkerId};
use tokio::runtime::Builder;
use tracing_subscriber::EnvFilter;
use std::time::Instant;


/// Простейший валидатор: проверяет парность @startuml/@enduml
struct MarkerValidator;

impl MarkerValidator {
    fn check(code: &str) -> Result<usize, String> {
        let lines: Vec<&str> = code.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        match (lines.first(), lines.last()) {
            (Some(&"@startuml"), Some(&"@enduml")) => Ok(lines.len().saturating_sub(2)),
            _ => Err("diagram must be wrapped in @startuml/@enduml".to_string()),
        }
    }
}

impl TaskExecutor for MarkerValidator {
    type Output = usize;
    type Error = String;

    fn execute(&mut self, request: &TaskRequest) -> Result<usize, String> {
        match request {
            TaskRequest::Parse { code, .. } | TaskRequest::Validate { code } => Self::check(code),
            TaskRequest::BatchParse { codes, .. } => codes.iter().map(|c| Self::check(c)).sum(),
        }
    }
}


fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let rt = Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    rt.block_on(async {
        let now = Instant::now();
        let pool = match PoolController::initialize(
            PoolConfig::new(2, 4, 1000),
            |_: WorkerId| Ok::<_, String>(MarkerValidator),
        )
        .await
        {
            Ok(pool) => pool,
            Err(e) => {
                eprintln!("failed to start pool: {e}");
                return;
            }
        };

        let handles: Vec<_> = (0..1_000)
            .map(|i| {
                let code = format!("@startuml\nA -> B : message {i}\n@enduml");
                let options = if i % 10 == 0 { TaskOptions::high() } else { TaskOptions::default() };
                pool.submit(TaskRequest::validate_code(code), options)
            })
            .collect();

        let mut statements = 0;
        for handle in handles {
            match handle.await {
                Ok(n) => statements += n,
                Err(e) => eprintln!("task failed: {e}"),
            }
        }

        if let Ok(stats) = pool.stats().await {
            println!(
                "statements: {statements}, pool: {}, completed: {}, avg: {:.3}ms",
                stats.pool_size, stats.tasks_completed, stats.average_task_time_ms
            );
        }
        pool.shutdown().await;
        println!("elapsed: {:?}", now.elapsed());
    });
}
