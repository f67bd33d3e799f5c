use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use timer_core::{TimerError, TimerResult};

/// 有界任务工作池
///
/// 用信号量限制同时运行的任务体数量。许可以 owned 形式发放,
/// 随任务体进入子任务, 任务体结束时自动归还; 等待许可的句柄
/// 本身就是有界队列, 每个句柄最多挂起一次提交, 不会积压。
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity.max(1))),
            capacity: capacity.max(1),
        }
    }

    /// 等待一个执行许可; 工作池关闭后返回错误
    pub async fn acquire(&self) -> TimerResult<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TimerError::Internal("工作池已关闭".to_string()))
    }

    /// 关闭工作池, 令所有等待中的许可请求立即失败
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
