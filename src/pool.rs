use super::{
    config::PoolConfig,
    errors::{PoolError, PoolResult},
    handle::TaskHandle,
    memory::{MemoryGuard, MemoryProbe, SysinfoProbe},
    model::{
        PerformanceReport,
        PoolStats,
        TaskId,
        TaskKind,
        TaskOptions,
        TaskRequest,
        WorkerId,
    },
    monitor::PerformanceMonitor,
    queue::{Responder, Task, TaskQueue},
    worker::{
        select_idle,
        select_least_recent_idle,
        ExecutionWorker,
        ExecutorFactory,
        OutputOf,
        TaskExecutor,
        WorkerEvent,
        WorkerRecord,
    },
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
    time::{Duration, Instant},
};
use futures::StreamExt;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::{
    sync::CancellationToken,
    time::{delay_queue, DelayQueue},
};
use tracing::{debug, error, info, warn};


const EXPAND_UTILIZATION_PCT: f64 = 80.0;
const EXPAND_QUEUE_LENGTH: usize = 5;
const SHRINK_UTILIZATION_PCT: f64 = 20.0;
const AVERAGE_ALPHA: f64 = 0.1;
const REPLENISH_BACKOFF_MIN: Duration = Duration::from_millis(100);


pub type WorkerPool<T> = Arc<PoolController<T>>;

enum Command<T> {
    Submit(Task<T>),
    Stats(oneshot::Sender<PoolStats>),
    HealthCheck(oneshot::Sender<()>),
    Report(oneshot::Sender<Option<PerformanceReport>>),
}


/// Публичный handle пула. Всё состояние принадлежит координатору,
/// handle только отправляет ему команды
pub struct PoolController<T> {
    commands: mpsc::UnboundedSender<Command<T>>,
    /// Submit-команды, ещё не прочитанные координатором
    in_transit: Arc<AtomicUsize>,
    /// Больше этого координатор не смог бы принять разом: очередь плюс все воркеры
    transit_limit: usize,
    max_queue_length: usize,
    shutdown_token: CancellationToken,
    next_task_id: AtomicU64,
    default_timeout: Duration,
    coordinator: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> PoolController<T> {
    /// Поднимает `baseline_size` воркеров параллельно и ждёт готовности каждого.
    /// Частичный пул не принимается: если хотя бы один воркер не стартовал, останавливаются все
    pub async fn initialize<F>(config: PoolConfig, factory: F) -> PoolResult<WorkerPool<T>>
    where
        F: ExecutorFactory,
        F::Executor: TaskExecutor<Output = T>,
    {
        let probe = SysinfoProbe::new(config.memory_limit_bytes);
        Self::initialize_with_probe(config, factory, probe).await
    }

    pub async fn initialize_with_probe<F, P>(
        config: PoolConfig,
        factory: F,
        probe: P,
    ) -> PoolResult<WorkerPool<T>>
    where
        F: ExecutorFactory,
        F::Executor: TaskExecutor<Output = T>,
        P: MemoryProbe,
    {
        config.validate()?;

        let factory = Arc::new(factory);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut workers = Vec::with_capacity(config.baseline_size);

        for n in 0..config.baseline_size {
            match ExecutionWorker::spawn(WorkerId(n as u64), Arc::clone(&factory), events_tx.clone()) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    workers.into_iter().for_each(ExecutionWorker::terminate);
                    return Err(e);
                }
            }
        }

        if let Err(message) = await_startup(&mut events_rx, workers.len()).await {
            error!(%message, "worker pool initialization failed");
            workers.into_iter().for_each(ExecutionWorker::terminate);
            return Err(PoolError::Initialization(message));
        }

        info!(
            size = workers.len(),
            max = config.max_pool_size,
            max_queue = config.max_queue_length,
            "worker pool initialized"
        );

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let shutdown_token = CancellationToken::new();
        let default_timeout = config.default_timeout();
        let in_transit = Arc::new(AtomicUsize::new(0));
        let max_queue_length = config.max_queue_length;
        let transit_limit = config.max_queue_length + config.max_pool_size;

        let records = workers
            .into_iter()
            .map(|worker| {
                let mut record = WorkerRecord::new(worker);
                record.mark_ready();
                record
            })
            .collect();

        let coordinator = Coordinator {
            next_worker_id: config.baseline_size as u64,
            records,
            queue: TaskQueue::new(config.max_queue_length),
            in_flight: HashMap::new(),
            timers: DelayQueue::new(),
            monitor: PerformanceMonitor::new(config.monitor_capacity),
            memory: MemoryGuard::new(probe, config.memory_threshold),
            counters: Counters::default(),
            replenish_at: None,
            replenish_backoff: REPLENISH_BACKOFF_MIN,
            in_transit: Arc::clone(&in_transit),
            factory,
            events: events_tx,
            config,
        };
        let join = tokio::spawn(coordinator.run(commands_rx, events_rx, shutdown_token.clone()));

        Ok(Arc::new(PoolController {
            commands: commands_tx,
            in_transit,
            transit_limit,
            max_queue_length,
            shutdown_token,
            next_task_id: AtomicU64::new(0),
            default_timeout,
            coordinator: Mutex::new(Some(join)),
        }))
    }

    /// Ставит задачу в очередь. Не блокирует: все ошибки, включая переполнение
    /// очереди, приходят через возвращённый handle
    pub fn submit(&self, request: TaskRequest, options: TaskOptions) -> TaskHandle<T> {
        let id = TaskId(self.next_task_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        let handle = TaskHandle::new(id, rx);

        if let Err(e) = request.validate().and_then(|_| options.validate()) {
            let _ = tx.send(Err(e));
            return handle;
        }
        if self.shutdown_token.is_cancelled() {
            let _ = tx.send(Err(PoolError::Shutdown));
            return handle;
        }

        // точная проверка ёмкости делается координатором; здесь только
        // не даём неразобранным командам копиться без границы
        if self.in_transit.fetch_add(1, Ordering::AcqRel) >= self.transit_limit {
            self.in_transit.fetch_sub(1, Ordering::AcqRel);
            warn!(task = %id, in_transit = self.transit_limit, "submission rejected before reaching coordinator");
            let _ = tx.send(Err(PoolError::Capacity { capacity: self.max_queue_length }));
            return handle;
        }

        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let task = Task::new(id, request, options.priority, timeout, tx);
        if let Err(mpsc::error::SendError(Command::Submit(task))) = self.commands.send(Command::Submit(task)) {
            self.in_transit.fetch_sub(1, Ordering::AcqRel);
            task.reject(PoolError::Shutdown);
        }
        handle
    }

    pub async fn stats(&self) -> PoolResult<PoolStats> {
        self.request(Command::Stats).await
    }

    /// Внеочередной тик здоровья: тот же код, что и у периодического таймера
    pub async fn run_health_check(&self) -> PoolResult<()> {
        self.request(Command::HealthCheck).await
    }

    pub async fn performance_report(&self) -> PoolResult<Option<PerformanceReport>> {
        self.request(Command::Report).await
    }

    async fn request<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Command<T>) -> PoolResult<R> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).map_err(|_| PoolError::Shutdown)?;
        rx.await.map_err(|_| PoolError::Shutdown)
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Идемпотентно: повторный вызов ничего не делает
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        let coordinator = self.coordinator.lock().ok().and_then(|mut guard| guard.take());
        if let Some(join) = coordinator {
            if let Err(e) = join.await {
                error!(error = %e, "pool coordinator terminated abnormally");
            }
        }
    }

    /// Мониторинг статистики с callback
    /// ВАЖНО: Вызовите token.cancel() для остановки мониторинга и освобождения пула
    pub fn start_monitoring<C>(self: &Arc<Self>, interval: Duration, callback: C) -> CancellationToken
    where
        C: Fn(PoolStats) + Send + 'static,
    {
        let pool = Arc::clone(self);
        let token = CancellationToken::new();
        let token_clone = token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        match pool.stats().await {
                            Ok(stats) => callback(stats),
                            Err(_) => break,
                        }
                    }
                    _ = token_clone.cancelled() => break,
                }
            }
            drop(pool);
        });

        token
    }

    pub fn stop_monitoring(token: CancellationToken) {
        token.cancel();
    }
}


/// Ждёт `Ready` от `count` только что запущенных воркеров.
/// Первый же сбой старта прерывает ожидание
async fn await_startup<T>(events: &mut mpsc::UnboundedReceiver<WorkerEvent<T>>, count: usize) -> Result<(), String> {
    let mut pending = count;
    while pending > 0 {
        match events.recv().await {
            Some(WorkerEvent::Ready { worker }) => {
                debug!(worker = %worker, "worker ready");
                pending -= 1;
            }
            Some(WorkerEvent::Fault { worker, message, .. }) => return Err(format!("{worker}: {message}")),
            Some(WorkerEvent::Completed { .. }) => {}
            None => return Err("worker events channel closed during startup".to_string()),
        }
    }
    Ok(())
}


struct InFlight<T> {
    kind: TaskKind,
    worker: WorkerId,
    responder: Responder<T>,
    started: Instant,
    timeout: Duration,
    timer: delay_queue::Key,
}

#[derive(Default)]
struct Counters {
    queued: u64,
    completed: u64,
    failed: u64,
    average_task_time_ms: f64,
    utilization_pct: f64,
}

/// Координатор: единственный владелец очереди, записей о воркерах и таймеров.
/// Команды, события воркеров и тики обрабатываются строго по одному,
/// поэтому блокировки не нужны
struct Coordinator<F: ExecutorFactory> {
    config: PoolConfig,
    factory: Arc<F>,
    events: mpsc::UnboundedSender<WorkerEvent<OutputOf<F>>>,
    records: Vec<WorkerRecord>,
    queue: TaskQueue<OutputOf<F>>,
    in_flight: HashMap<TaskId, InFlight<OutputOf<F>>>,
    timers: DelayQueue<TaskId>,
    monitor: PerformanceMonitor,
    memory: MemoryGuard,
    counters: Counters,
    next_worker_id: u64,
    /// Когда повторить добор пула до baseline после неудачного старта воркера.
    /// Пока взведено, пул не расширяется
    replenish_at: Option<time::Instant>,
    replenish_backoff: Duration,
    in_transit: Arc<AtomicUsize>,
}

impl<F: ExecutorFactory> Coordinator<F> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command<OutputOf<F>>>,
        mut events: mpsc::UnboundedReceiver<WorkerEvent<OutputOf<F>>>,
        shutdown: CancellationToken,
    ) {
        let health_every = self.config.health_interval();
        let report_every = self.config.report_interval();
        let mut health = time::interval_at(time::Instant::now() + health_every, health_every);
        let mut report = time::interval_at(time::Instant::now() + report_every, report_every);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);
        report.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    // все handle пула отброшены
                    None => break,
                },
                Some(event) = events.recv() => self.handle_event(event),
                Some(expired) = self.timers.next() => self.handle_timeout(expired.into_inner()),
                _ = time::sleep_until(self.replenish_at.unwrap_or_else(time::Instant::now)),
                    if self.replenish_at.is_some() => {
                    self.replenish();
                    self.dispatch();
                }
                _ = health.tick() => self.health_tick(),
                _ = report.tick() => self.log_report(),
            }
        }

        commands.close();
        while let Ok(command) = commands.try_recv() {
            if let Command::Submit(task) = command {
                self.in_transit.fetch_sub(1, Ordering::AcqRel);
                task.reject(PoolError::Shutdown);
            }
        }
        self.shutdown();
    }

    fn handle_command(&mut self, command: Command<OutputOf<F>>) {
        match command {
            Command::Submit(task) => {
                self.in_transit.fetch_sub(1, Ordering::AcqRel);
                self.enqueue(task);
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
            Command::HealthCheck(reply) => {
                self.health_tick();
                let _ = reply.send(());
            }
            Command::Report(reply) => {
                let _ = reply.send(self.monitor.report());
            }
        }
    }

    fn handle_event(&mut self, event: WorkerEvent<OutputOf<F>>) {
        match event {
            WorkerEvent::Ready { worker } => self.mark_ready(worker),
            WorkerEvent::Completed { worker, task, outcome } => self.complete(worker, task, outcome),
            WorkerEvent::Fault { worker, message, during_startup } => {
                self.fault(worker, message, during_startup);
                self.dispatch();
            }
        }
    }

    fn enqueue(&mut self, task: Task<OutputOf<F>>) {
        let id = task.id;
        match self.queue.push(task) {
            Ok(()) => {
                self.counters.queued += 1;
                debug!(task = %id, queue_len = self.queue.len(), "task queued");
                self.dispatch();
            }
            Err((task, err)) => {
                warn!(task = %id, capacity = self.config.max_queue_length, "task queue is full");
                task.reject(err);
            }
        }
    }

    /// Раздаёт задачи свободным воркерам, пока очередь не опустеет
    /// или не кончатся готовые воркеры. Новый воркер получит задачу,
    /// когда пришлёт `Ready`
    fn dispatch(&mut self) {
        while !self.queue.is_empty() {
            let Some(idx) = select_idle(&self.records) else {
                if self.config.adaptive_pooling && self.can_expand() {
                    self.expand();
                }
                break;
            };
            let Some(task) = self.queue.pop() else { break };
            self.start(idx, task);
        }
        self.refresh_utilization();
    }

    fn start(&mut self, idx: usize, task: Task<OutputOf<F>>) {
        let (id, kind, timeout, waited) = (task.id, task.kind(), task.timeout, task.created_at.elapsed());
        let (request, responder) = task.into_parts();

        let record = &mut self.records[idx];
        let worker = record.id();
        record.assign(id);

        let timer = self.timers.insert(id, timeout);
        self.in_flight.insert(id, InFlight {
            kind,
            worker,
            responder,
            started: Instant::now(),
            timeout,
            timer,
        });
        debug!(task = %id, worker = %worker, %kind, waited = ?waited, "task dispatched");

        if self.records[idx].worker.send(id, request).is_err() {
            self.fault(worker, "worker is unreachable".to_string(), false);
        }
    }

    fn mark_ready(&mut self, worker: WorkerId) {
        let Some(idx) = self.position(worker) else {
            debug!(worker = %worker, "ready signal from retired worker ignored");
            return;
        };
        self.records[idx].mark_ready();
        self.replenish_backoff = REPLENISH_BACKOFF_MIN;
        debug!(worker = %worker, age = ?self.records[idx].created_at.elapsed(), "worker ready");
        self.dispatch();
    }

    fn complete(&mut self, worker: WorkerId, task: TaskId, outcome: Result<OutputOf<F>, String>) {
        let current = self.in_flight.get(&task).is_some_and(|f| f.worker == worker);
        if !current {
            // задача уже отклонена по таймауту или сбою, воркер заменён
            debug!(task = %task, worker = %worker, "ignoring late result");
            return;
        }
        let Some(flight) = self.in_flight.remove(&task) else { return };
        self.timers.remove(&flight.timer);

        let duration = flight.started.elapsed();
        let success = outcome.is_ok();
        self.monitor.record(task, flight.kind, worker, duration, success);
        self.record_outcome(duration, success);

        if let Some(record) = self.records.iter_mut().find(|r| r.id() == worker) {
            record.release();
        }
        debug!(task = %task, worker = %worker, ?duration, success, "task completed");

        flight.responder.send(outcome.map_err(PoolError::Task));
        self.dispatch();
    }

    fn handle_timeout(&mut self, task: TaskId) {
        let Some(flight) = self.in_flight.remove(&task) else { return };
        warn!(task = %task, worker = %flight.worker, timeout = ?flight.timeout, "task timed out, replacing worker");

        self.monitor.record(task, flight.kind, flight.worker, flight.started.elapsed(), false);
        self.record_outcome(flight.started.elapsed(), false);
        self.replace_worker(flight.worker);

        flight.responder.send(Err(PoolError::Timeout { task, timeout: flight.timeout }));
        self.dispatch();
    }

    /// Сбой воркера: его задача (если есть) отклоняется, сам воркер заменяется.
    /// Если воркер не смог стартовать, слот освобождается и добор планируется с задержкой
    fn fault(&mut self, worker: WorkerId, message: String, during_startup: bool) {
        let Some(idx) = self.position(worker) else {
            debug!(worker = %worker, "fault from retired worker ignored");
            return;
        };
        warn!(worker = %worker, %message, during_startup, "worker fault");

        if let Some(task) = self.records[idx].current.take() {
            if let Some(flight) = self.in_flight.remove(&task) {
                self.timers.remove(&flight.timer);
                let duration = flight.started.elapsed();
                self.monitor.record(task, flight.kind, worker, duration, false);
                self.record_outcome(duration, false);
                flight.responder.send(Err(PoolError::WorkerFault { worker, message: message.clone() }));
            }
        }

        if during_startup {
            let record = self.records.remove(idx);
            record.worker.terminate();
            error!(worker = %worker, pool_size = self.records.len(), "worker failed to start, slot dropped");
            self.schedule_replenish();
        } else {
            self.replace_worker(worker);
        }
    }

    /// Новый воркер под новой записью в том же слоте пула
    fn replace_worker(&mut self, worker: WorkerId) {
        let Some(idx) = self.position(worker) else { return };
        match self.provision() {
            Some(fresh) => {
                let replacement = fresh.id();
                let old = std::mem::replace(&mut self.records[idx], fresh);
                old.worker.terminate();
                info!(old = %worker, new = %replacement, "worker replaced");
            }
            None => {
                let old = self.records.remove(idx);
                old.worker.terminate();
                error!(worker = %worker, pool_size = self.records.len(), "failed to replace worker");
                self.schedule_replenish();
            }
        }
    }

    /// Пауза в создании воркеров с экспоненциальной задержкой (не дольше интервала
    /// тика здоровья). По её окончании пул добирается до baseline
    fn schedule_replenish(&mut self) {
        if self.replenish_at.is_some() {
            return;
        }
        let delay = self.replenish_backoff;
        self.replenish_at = Some(time::Instant::now() + delay);
        self.replenish_backoff = (delay * 2).min(self.config.health_interval());
        warn!(retry_in = ?delay, pool_size = self.records.len(), "worker provisioning paused");
    }

    fn replenish(&mut self) {
        self.replenish_at = None;
        while self.records.len() < self.config.baseline_size {
            let Some(record) = self.provision() else {
                self.schedule_replenish();
                break;
            };
            info!(worker = %record.id(), "pool replenished toward baseline");
            self.records.push(record);
        }
    }

    fn provision(&mut self) -> Option<WorkerRecord> {
        let id = WorkerId(self.next_worker_id);
        self.next_worker_id += 1;
        match ExecutionWorker::spawn(id, Arc::clone(&self.factory), self.events.clone()) {
            // задачи воркер получит только после события Ready
            Ok(worker) => Some(WorkerRecord::new(worker)),
            Err(e) => {
                error!(worker = %id, error = %e, "failed to provision worker");
                None
            }
        }
    }

    fn can_expand(&mut self) -> bool {
        self.replenish_at.is_none()
            && self.records.len() < self.config.max_pool_size
            && self.queue.len() > self.records.len()
            && self.memory.is_available()
    }

    fn expand(&mut self) -> bool {
        match self.provision() {
            Some(record) => {
                let id = record.id();
                self.records.push(record);
                info!(worker = %id, pool_size = self.records.len(), queue_len = self.queue.len(), "pool expanded");
                true
            }
            None => false,
        }
    }

    fn shrink(&mut self) {
        if self.records.len() <= self.config.baseline_size {
            return;
        }
        if let Some(idx) = select_least_recent_idle(&self.records) {
            let record = self.records.remove(idx);
            info!(
                worker = %record.id(),
                age = ?record.created_at.elapsed(),
                tasks = record.task_count,
                pool_size = self.records.len(),
                "pool shrunk"
            );
            record.worker.terminate();
        }
    }

    fn health_tick(&mut self) {
        if self.records.len() < self.config.baseline_size {
            self.replenish();
        }

        self.refresh_utilization();
        let utilization = self.counters.utilization_pct;
        let queue_len = self.queue.len();
        debug!(pool_size = self.records.len(), queue_len, utilization, "health check");

        if self.config.adaptive_pooling {
            if utilization > EXPAND_UTILIZATION_PCT && queue_len > EXPAND_QUEUE_LENGTH && self.can_expand() {
                self.expand();
            }
            if utilization < SHRINK_UTILIZATION_PCT && queue_len == 0 {
                self.shrink();
            }
        }
        self.dispatch();
    }

    fn record_outcome(&mut self, duration: Duration, success: bool) {
        let counters = &mut self.counters;
        counters.completed += 1;
        if !success {
            counters.failed += 1;
            return;
        }
        let ms = duration.as_secs_f64() * 1000.0;
        // первая успешная задача задаёт стартовое значение среднего
        counters.average_task_time_ms = if counters.completed - counters.failed == 1 {
            ms
        } else {
            counters.average_task_time_ms * (1.0 - AVERAGE_ALPHA) + ms * AVERAGE_ALPHA
        };
    }

    fn refresh_utilization(&mut self) {
        let busy = self.busy_workers();
        self.counters.utilization_pct = if self.records.is_empty() {
            0.0
        } else {
            busy as f64 / self.records.len() as f64 * 100.0
        };
    }

    #[inline]
    fn busy_workers(&self) -> usize {
        self.records.iter().filter(|r| r.is_busy()).count()
    }

    #[inline]
    fn position(&self, worker: WorkerId) -> Option<usize> {
        self.records.iter().position(|r| r.id() == worker)
    }

    fn stats(&mut self) -> PoolStats {
        self.refresh_utilization();
        PoolStats {
            pool_size: self.records.len(),
            baseline_size: self.config.baseline_size,
            max_pool_size: self.config.max_pool_size,
            queue_length: self.queue.len(),
            busy_workers: self.busy_workers(),
            tasks_queued: self.counters.queued,
            tasks_completed: self.counters.completed,
            tasks_failed: self.counters.failed,
            average_task_time_ms: self.counters.average_task_time_ms,
            pool_utilization_pct: self.counters.utilization_pct,
            memory: self.memory.stats(),
            performance: self.monitor.report(),
        }
    }

    fn log_report(&mut self) {
        let stats = self.stats();
        info!(
            pool_size = stats.pool_size,
            queue_length = stats.queue_length,
            tasks_completed = stats.tasks_completed,
            tasks_failed = stats.tasks_failed,
            utilization = %format_args!("{:.1}%", stats.pool_utilization_pct),
            avg_task_ms = %format_args!("{:.2}", stats.average_task_time_ms),
            memory_pct = %format_args!("{:.1}", stats.memory.usage_pct),
            success_rate = ?stats.performance.as_ref().map(|p| p.success_rate),
            "performance report"
        );
    }

    fn shutdown(&mut self) {
        let queued = self.queue.len();
        let in_flight = self.in_flight.len();

        for task in self.queue.drain() {
            task.reject(PoolError::Shutdown);
        }
        for (_, flight) in self.in_flight.drain() {
            flight.responder.send(Err(PoolError::Shutdown));
        }
        self.timers.clear();
        for record in self.records.drain(..) {
            record.worker.terminate();
        }
        info!(queued, in_flight, "worker pool shut down");
    }
}
