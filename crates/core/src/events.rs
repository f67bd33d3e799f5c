//! 调度生命周期事件与类型化观察者
//!
//! 每类事件有独立的观察者trait, 注册方只实现自己关心的回调, 不需要
//! 带着一组空方法的大接口。观察者的错误会被记录并隔离, 永远不会
//! 中断调度主流程。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::warn;

use crate::errors::TimerResult;
use crate::models::{ClusterView, NodeAddress};

/// 集群视图变更事件
#[derive(Debug, Clone)]
pub struct ViewChangedEvent {
    pub view: Arc<ClusterView>,
    pub joined: Vec<NodeAddress>,
    pub left: Vec<NodeAddress>,
    /// 本节点在此次视图中获得主节点身份
    pub gained_mastership: bool,
    /// 本节点在此次视图中失去主节点身份
    pub lost_mastership: bool,
}

/// 任务触发前事件
#[derive(Debug, Clone)]
pub struct BeforeTaskEvent {
    pub task_name: String,
    pub scheduled_at: DateTime<Utc>,
    pub fired_at: DateTime<Utc>,
}

/// 任务结束后事件, 无论成功失败都会发出
#[derive(Debug, Clone)]
pub struct AfterTaskEvent {
    pub task_name: String,
    pub scheduled_at: DateTime<Utc>,
    pub fired_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: bool,
    pub error: Option<String>,
}

#[async_trait]
pub trait ViewChangedObserver: Send + Sync {
    async fn on_view_changed(&self, event: &ViewChangedEvent) -> TimerResult<()>;
}

#[async_trait]
pub trait BeforeTaskObserver: Send + Sync {
    async fn on_before_task(&self, event: &BeforeTaskEvent) -> TimerResult<()>;
}

#[async_trait]
pub trait AfterTaskObserver: Send + Sync {
    async fn on_after_task(&self, event: &AfterTaskEvent) -> TimerResult<()>;
}

/// 观察者注册凭据, 用于注销
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// 事件分发模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// 按注册顺序逐个等待观察者完成, 顺序确定
    Blocking,
    /// 每个观察者在独立任务中执行, 慢观察者不会拖慢调度
    Spawned,
}

/// 类型化事件分发器
pub struct EventNotifier {
    mode: DispatchMode,
    next_id: AtomicU64,
    view_observers: RwLock<Vec<(ObserverId, Arc<dyn ViewChangedObserver>)>>,
    before_observers: RwLock<Vec<(ObserverId, Arc<dyn BeforeTaskObserver>)>>,
    after_observers: RwLock<Vec<(ObserverId, Arc<dyn AfterTaskObserver>)>>,
}

impl EventNotifier {
    pub fn new(mode: DispatchMode) -> Self {
        Self {
            mode,
            next_id: AtomicU64::new(1),
            view_observers: RwLock::new(Vec::new()),
            before_observers: RwLock::new(Vec::new()),
            after_observers: RwLock::new(Vec::new()),
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    fn allocate_id(&self) -> ObserverId {
        ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub async fn add_view_observer(&self, observer: Arc<dyn ViewChangedObserver>) -> ObserverId {
        let id = self.allocate_id();
        self.view_observers.write().await.push((id, observer));
        id
    }

    pub async fn add_before_task_observer(
        &self,
        observer: Arc<dyn BeforeTaskObserver>,
    ) -> ObserverId {
        let id = self.allocate_id();
        self.before_observers.write().await.push((id, observer));
        id
    }

    pub async fn add_after_task_observer(
        &self,
        observer: Arc<dyn AfterTaskObserver>,
    ) -> ObserverId {
        let id = self.allocate_id();
        self.after_observers.write().await.push((id, observer));
        id
    }

    pub async fn remove_view_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.view_observers.write().await;
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    pub async fn remove_before_task_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.before_observers.write().await;
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    pub async fn remove_after_task_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.after_observers.write().await;
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    pub async fn notify_view_changed(&self, event: ViewChangedEvent) {
        let observers: Vec<_> = self
            .view_observers
            .read()
            .await
            .iter()
            .map(|(_, o)| o.clone())
            .collect();
        match self.mode {
            DispatchMode::Blocking => {
                for observer in observers {
                    if let Err(e) = observer.on_view_changed(&event).await {
                        warn!("视图变更观察者执行失败: {}", e);
                    }
                }
            }
            DispatchMode::Spawned => {
                let event = Arc::new(event);
                for observer in observers {
                    let event = event.clone();
                    tokio::spawn(async move {
                        if let Err(e) = observer.on_view_changed(&event).await {
                            warn!("视图变更观察者执行失败: {}", e);
                        }
                    });
                }
            }
        }
    }

    pub async fn notify_before_task(&self, event: BeforeTaskEvent) {
        let observers: Vec<_> = self
            .before_observers
            .read()
            .await
            .iter()
            .map(|(_, o)| o.clone())
            .collect();
        match self.mode {
            DispatchMode::Blocking => {
                for observer in observers {
                    if let Err(e) = observer.on_before_task(&event).await {
                        warn!("任务前置观察者执行失败: {}", e);
                    }
                }
            }
            DispatchMode::Spawned => {
                let event = Arc::new(event);
                for observer in observers {
                    let event = event.clone();
                    tokio::spawn(async move {
                        if let Err(e) = observer.on_before_task(&event).await {
                            warn!("任务前置观察者执行失败: {}", e);
                        }
                    });
                }
            }
        }
    }

    pub async fn notify_after_task(&self, event: AfterTaskEvent) {
        let observers: Vec<_> = self
            .after_observers
            .read()
            .await
            .iter()
            .map(|(_, o)| o.clone())
            .collect();
        match self.mode {
            DispatchMode::Blocking => {
                for observer in observers {
                    if let Err(e) = observer.on_after_task(&event).await {
                        warn!("任务后置观察者执行失败: {}", e);
                    }
                }
            }
            DispatchMode::Spawned => {
                let event = Arc::new(event);
                for observer in observers {
                    let event = event.clone();
                    tokio::spawn(async move {
                        if let Err(e) = observer.on_after_task(&event).await {
                            warn!("任务后置观察者执行失败: {}", e);
                        }
                    });
                }
            }
        }
    }
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new(DispatchMode::Blocking)
    }
}

#[cfg(test)]
mod events_tests {
    use super::*;
    use crate::errors::TimerError;
    use std::sync::atomic::AtomicUsize;

    struct CountingObserver {
        before: AtomicUsize,
        after: AtomicUsize,
    }

    #[async_trait]
    impl BeforeTaskObserver for CountingObserver {
        async fn on_before_task(&self, _event: &BeforeTaskEvent) -> TimerResult<()> {
            self.before.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl AfterTaskObserver for CountingObserver {
        async fn on_after_task(&self, _event: &AfterTaskEvent) -> TimerResult<()> {
            self.after.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingObserver;

    #[async_trait]
    impl BeforeTaskObserver for FailingObserver {
        async fn on_before_task(&self, _event: &BeforeTaskEvent) -> TimerResult<()> {
            Err(TimerError::Internal("观察者故障".to_string()))
        }
    }

    fn before_event() -> BeforeTaskEvent {
        BeforeTaskEvent {
            task_name: "demo".to_string(),
            scheduled_at: Utc::now(),
            fired_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_blocking_dispatch_reaches_all_observers() {
        let notifier = EventNotifier::new(DispatchMode::Blocking);
        let observer = Arc::new(CountingObserver {
            before: AtomicUsize::new(0),
            after: AtomicUsize::new(0),
        });
        notifier.add_before_task_observer(observer.clone()).await;
        notifier.add_before_task_observer(observer.clone()).await;

        notifier.notify_before_task(before_event()).await;
        assert_eq!(observer.before.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failing_observer_does_not_block_others() {
        let notifier = EventNotifier::new(DispatchMode::Blocking);
        let counting = Arc::new(CountingObserver {
            before: AtomicUsize::new(0),
            after: AtomicUsize::new(0),
        });
        notifier.add_before_task_observer(Arc::new(FailingObserver)).await;
        notifier.add_before_task_observer(counting.clone()).await;

        notifier.notify_before_task(before_event()).await;
        assert_eq!(counting.before.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_removed_observer_stops_receiving() {
        let notifier = EventNotifier::new(DispatchMode::Blocking);
        let observer = Arc::new(CountingObserver {
            before: AtomicUsize::new(0),
            after: AtomicUsize::new(0),
        });
        let id = notifier.add_before_task_observer(observer.clone()).await;
        notifier.notify_before_task(before_event()).await;

        assert!(notifier.remove_before_task_observer(id).await);
        assert!(!notifier.remove_before_task_observer(id).await);
        notifier.notify_before_task(before_event()).await;
        assert_eq!(observer.before.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_spawned_dispatch_eventually_delivers() {
        let notifier = EventNotifier::new(DispatchMode::Spawned);
        let observer = Arc::new(CountingObserver {
            before: AtomicUsize::new(0),
            after: AtomicUsize::new(0),
        });
        notifier.add_before_task_observer(observer.clone()).await;
        notifier.notify_before_task(before_event()).await;

        for _ in 0..50 {
            if observer.before.load(Ordering::SeqCst) == 1 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("观察者未在期限内收到事件");
    }
}
