use super::{
    errors::{PoolError, PoolResult},
    model::TaskId,
};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll}
};
use tokio::sync::oneshot;


/// Handle на результат задачи. Разрешается ровно один раз:
/// значением воркера или ошибкой (capacity, timeout, fault, shutdown).
/// После того как результат забран, `try_result` возвращает None,
/// а повторный poll - `Err(PoolError::Shutdown)`
#[must_use = "the task result is only observable through its handle"]
pub struct TaskHandle<T> {
    id: TaskId,
    /// None после выдачи результата
    receiver: Option<oneshot::Receiver<PoolResult<T>>>,
}

impl<T> TaskHandle<T> {

    pub(crate) fn new
    (
        id: TaskId,
        receiver: oneshot::Receiver<PoolResult<T>>,
    ) -> Self {
        Self {
            id,
            receiver: Some(receiver),
        }
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Неблокирующая проверка: None пока задача не разрешена
    /// или если результат уже был выдан
    pub fn try_result(&mut self) -> Option<PoolResult<T>> {
        let result = match self.receiver.as_mut()?.try_recv() {
            Ok(result) => result,
            Err(oneshot::error::TryRecvError::Empty) => return None,
            Err(oneshot::error::TryRecvError::Closed) => Err(PoolError::Shutdown),
        };
        self.receiver = None;
        Some(result)
    }

    /// Результат уже выдан через `try_result` или `await`
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.receiver.is_none()
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = PoolResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(receiver) = this.receiver.as_mut() else {
            return Poll::Ready(Err(PoolError::Shutdown));
        };
        match Pin::new(receiver).poll(cx) {
            // координатор пропал, не разрешив задачу: трактуем как остановку
            Poll::Ready(res) => {
                this.receiver = None;
                Poll::Ready(res.unwrap_or(Err(PoolError::Shutdown)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn result_is_handed_out_once() {
        let (tx, rx) = oneshot::channel();
        let mut handle = TaskHandle::new(TaskId(1), rx);
        assert!(handle.try_result().is_none());
        assert!(!handle.is_finished());

        let _ = tx.send(Ok(7u32));
        assert_eq!(handle.try_result(), Some(Ok(7)));
        assert!(handle.is_finished());
        assert_eq!(handle.try_result(), None);
        assert_eq!((&mut handle).await, Err(PoolError::Shutdown));
    }

    #[tokio::test]
    async fn dropped_sender_reads_as_shutdown() {
        let (tx, rx) = oneshot::channel::<PoolResult<u32>>();
        let handle = TaskHandle::new(TaskId(2), rx);
        drop(tx);
        assert_eq!(handle.await, Err(PoolError::Shutdown));
    }
}
