use super::{
    errors::{PoolError, PoolResult},
    model::{Priority, TaskId, TaskKind, TaskRequest},
};
use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};
use tokio::sync::oneshot;


/// Задача, принятая координатором. Канал ответа потребляется при разрешении,
/// поэтому задача разрешается не более одного раза
pub(crate) struct Task<T> {
    pub id: TaskId,
    pub request: TaskRequest,
    pub priority: Priority,
    pub created_at: Instant,
    pub timeout: Duration,
    responder: oneshot::Sender<PoolResult<T>>,
}

impl<T> Task<T> {
    pub fn new(
        id: TaskId,
        request: TaskRequest,
        priority: Priority,
        timeout: Duration,
        responder: oneshot::Sender<PoolResult<T>>,
    ) -> Self {
        Self {
            id,
            request,
            priority,
            created_at: Instant::now(),
            timeout,
            responder,
        }
    }

    #[inline]
    pub fn kind(&self) -> TaskKind {
        self.request.kind()
    }

    /// Отделяет запрос для воркера от канала ответа
    pub fn into_parts(self) -> (TaskRequest, Responder<T>) {
        (self.request, Responder(self.responder))
    }

    pub fn reject(self, error: PoolError) {
        Responder(self.responder).send(Err(error));
    }
}

pub(crate) struct Responder<T>(oneshot::Sender<PoolResult<T>>);

impl<T> Responder<T> {
    pub fn send(self, result: PoolResult<T>) {
        // вызывающий мог уже бросить handle
        let _ = self.0.send(result);
    }
}


/// Ограниченная очередь с двумя полосами приоритета, FIFO внутри каждой
pub(crate) struct TaskQueue<T> {
    high: VecDeque<Task<T>>,
    normal: VecDeque<Task<T>>,
    capacity: usize,
}

impl<T> TaskQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            high: VecDeque::new(),
            normal: VecDeque::new(),
            capacity,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.high.len() + self.normal.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.normal.is_empty()
    }

    /// При переполнении задача возвращается вызывающему вместе с ошибкой
    pub fn push(&mut self, task: Task<T>) -> Result<(), (Task<T>, PoolError)> {
        if self.len() >= self.capacity {
            let capacity = self.capacity;
            return Err((task, PoolError::Capacity { capacity }));
        }
        match task.priority {
            Priority::High => self.high.push_back(task),
            Priority::Normal => self.normal.push_back(task),
        }
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Task<T>> {
        self.high.pop_front().or_else(|| self.normal.pop_front())
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Task<T>> + '_ {
        self.high.drain(..).chain(self.normal.drain(..))
    }
}
