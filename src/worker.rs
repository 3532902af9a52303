use super::{
    errors::{PoolError, PoolResult},
    model::{TaskId, TaskRequest, WorkerId},
};
use crossbeam::channel::{self, Sender};
use std::{
    any::Any,
    fmt::Display,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread,
    time::Instant,
};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;


/// Логика, выполняемая внутри воркера (парсер/валидатор диаграмм).
/// Живёт только на потоке своего воркера, поэтому `Send` не требуется
pub trait TaskExecutor: 'static {
    type Output: Send + 'static;
    type Error: Display;

    fn execute(&mut self, request: &TaskRequest) -> Result<Self::Output, Self::Error>;
}

/// Создаёт по исполнителю на каждый воркер; вызывается на потоке воркера
pub trait ExecutorFactory: Send + Sync + 'static {
    type Executor: TaskExecutor;

    fn create(&self, worker: WorkerId) -> Result<Self::Executor, String>;
}

impl<F, E, Cause> ExecutorFactory for F
where
    F: Fn(WorkerId) -> Result<E, Cause> + Send + Sync + 'static,
    E: TaskExecutor,
    Cause: Display,
{
    type Executor = E;

    fn create(&self, worker: WorkerId) -> Result<E, String> {
        self(worker).map_err(|e| e.to_string())
    }
}

pub type OutputOf<F> = <<F as ExecutorFactory>::Executor as TaskExecutor>::Output;


pub(crate) struct WorkerRequest {
    pub task: TaskId,
    pub request: TaskRequest,
}

/// Сообщения от воркеров координатору
pub(crate) enum WorkerEvent<T> {
    /// Исполнитель создан, воркер может принимать задачи
    Ready {
        worker: WorkerId,
    },
    Completed {
        worker: WorkerId,
        task: TaskId,
        outcome: Result<T, String>,
    },
    /// Сбой, не привязанный к ответу на задачу: паника или ошибка старта
    Fault {
        worker: WorkerId,
        message: String,
        during_startup: bool,
    },
}


/// Изолированный воркер: собственный OS-поток, собственный исполнитель,
/// общение только сообщениями
pub(crate) struct ExecutionWorker {
    id: WorkerId,
    inbox: Sender<WorkerRequest>,
}

impl ExecutionWorker {
    /// Запускает поток воркера. Исход старта приходит событием:
    /// `Ready` либо `Fault { during_startup: true }`
    pub fn spawn<F>(
        id: WorkerId,
        factory: Arc<F>,
        events: UnboundedSender<WorkerEvent<OutputOf<F>>>,
    ) -> PoolResult<Self>
    where
        F: ExecutorFactory,
    {
        let (inbox, requests) = channel::unbounded::<WorkerRequest>();

        thread::Builder::new()
            .name(format!("diagram-{id}"))
            .spawn(move || {
                let created = panic::catch_unwind(AssertUnwindSafe(|| factory.create(id)))
                    .unwrap_or_else(|payload| Err(panic_message(payload.as_ref())));
                let mut executor = match created {
                    Ok(executor) => executor,
                    Err(message) => {
                        let _ = events.send(WorkerEvent::Fault { worker: id, message, during_startup: true });
                        return;
                    }
                };
                if events.send(WorkerEvent::Ready { worker: id }).is_err() {
                    return;
                }

                // канал закрывается при terminate(): поток выходит после текущей задачи
                for WorkerRequest { task, request } in requests.iter() {
                    let started = Instant::now();
                    let event = match panic::catch_unwind(AssertUnwindSafe(|| executor.execute(&request))) {
                        Ok(result) => WorkerEvent::Completed {
                            worker: id,
                            task,
                            outcome: result.map_err(|e| e.to_string()),
                        },
                        Err(payload) => {
                            let _ = events.send(WorkerEvent::Fault {
                                worker: id,
                                message: panic_message(payload.as_ref()),
                                during_startup: false,
                            });
                            return;
                        }
                    };
                    debug!(worker = %id, task = %task, elapsed = ?started.elapsed(), "task executed");
                    if events.send(event).is_err() {
                        return;
                    }
                }
            })
            .map_err(|e| PoolError::Initialization(format!("failed to spawn {id}: {e}")))?;

        Ok(Self { id, inbox })
    }

    #[inline]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Ошибка означает, что поток воркера уже завершился
    pub fn send(&self, task: TaskId, request: TaskRequest) -> Result<(), ()> {
        self.inbox.send(WorkerRequest { task, request }).map_err(|_| ())
    }

    /// Воркеру больше не доверяют. Поток не прерывается принудительно:
    /// он завершится, дочитав закрытый канал, а его поздние ответы игнорируются
    pub fn terminate(self) {
        debug!(worker = %self.id, "worker terminated");
        drop(self.inbox);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}


/// Учётная запись координатора об одном воркере.
/// Пока исполнитель не создан, воркер занимает слот, но задач не получает
pub(crate) struct WorkerRecord {
    pub worker: ExecutionWorker,
    pub ready: bool,
    /// Задача, выполняющаяся сейчас; Some <=> воркер занят
    pub current: Option<TaskId>,
    pub task_count: u64,
    pub created_at: Instant,
    pub last_used_at: Instant,
}

impl WorkerRecord {
    pub fn new(worker: ExecutionWorker) -> Self {
        let now = Instant::now();
        Self {
            worker,
            ready: false,
            current: None,
            task_count: 0,
            created_at: now,
            last_used_at: now,
        }
    }

    #[inline]
    pub fn id(&self) -> WorkerId {
        self.worker.id()
    }

    #[inline]
    pub fn is_busy(&self) -> bool {
        self.current.is_some()
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.ready && self.current.is_none()
    }

    pub fn mark_ready(&mut self) {
        self.ready = true;
        self.last_used_at = Instant::now();
    }

    pub fn assign(&mut self, task: TaskId) {
        self.current = Some(task);
        self.task_count += 1;
        self.last_used_at = Instant::now();
    }

    pub fn release(&mut self) {
        self.current = None;
        self.last_used_at = Instant::now();
    }
}

/// Свободный воркер с наименьшим числом задач, при равенстве - дольше всех простаивавший
pub(crate) fn select_idle(records: &[WorkerRecord]) -> Option<usize> {
    records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_idle())
        .min_by_key(|(_, r)| (r.task_count, r.last_used_at))
        .map(|(idx, _)| idx)
}

/// Кандидат на удаление при сжатии: свободный и дольше всех не использованный
pub(crate) fn select_least_recent_idle(records: &[WorkerRecord]) -> Option<usize> {
    records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_idle())
        .min_by_key(|(_, r)| r.last_used_at)
        .map(|(idx, _)| idx)
}
