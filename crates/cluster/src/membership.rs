use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use timer_core::{
    ClusterView, EventNotifier, MembershipState, NodeAddress, TimerError, TimerResult,
    ViewChangedEvent,
};

use crate::election::MasterElectionPolicy;
use crate::transport::{GroupTransport, ViewEvent};

/// 视图变更处理器
///
/// 与观察者不同, 处理器在视图循环内被依次等待: 上一个视图的处理
/// 完全结束之前, 下一个视图不会开始投递。任务协调器靠这一点保证
/// "回调返回前任务已停止"。
#[async_trait]
pub trait ViewChangeHandler: Send + Sync {
    async fn on_view_change(&self, event: &ViewChangedEvent) -> TimerResult<()>;
}

struct Lifecycle {
    phase: MembershipState,
    /// 关闭后不允许重新连接
    closed: bool,
    view_loop: Option<JoinHandle<()>>,
}

/// 集群成员关系
///
/// 包装组传输层, 把原始成员列表转换为带主节点身份的视图快照。
/// 视图处理由单个循环任务串行执行, 视图路径上不持有任何锁;
/// 互斥锁只保护 connect/shutdown 的生命周期转换。
pub struct ClusterMembership {
    group_name: String,
    transport: Arc<dyn GroupTransport>,
    policy: Arc<dyn MasterElectionPolicy>,
    notifier: Arc<EventNotifier>,
    handlers: Arc<RwLock<Vec<Arc<dyn ViewChangeHandler>>>>,
    lifecycle: Mutex<Lifecycle>,
    view_tx: Arc<watch::Sender<Option<Arc<ClusterView>>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ClusterMembership {
    pub fn new(
        group_name: impl Into<String>,
        transport: Arc<dyn GroupTransport>,
        policy: Arc<dyn MasterElectionPolicy>,
        notifier: Arc<EventNotifier>,
    ) -> Self {
        let (view_tx, _) = watch::channel(None);
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            group_name: group_name.into(),
            transport,
            policy,
            notifier,
            handlers: Arc::new(RwLock::new(Vec::new())),
            lifecycle: Mutex::new(Lifecycle {
                phase: MembershipState::Disconnected,
                closed: false,
                view_loop: None,
            }),
            view_tx: Arc::new(view_tx),
            shutdown_tx,
        }
    }

    /// 注册视图变更处理器, 应在 `connect` 之前完成以免错过首个视图
    pub async fn register_handler(&self, handler: Arc<dyn ViewChangeHandler>) {
        self.handlers.write().await.push(handler);
    }

    /// 加入集群组并等待首个视图安装完成
    ///
    /// 返回时本节点已经出现在成员列表中, 主节点身份已可查询。
    /// 重复调用返回 `AlreadyConnected`; 关闭后的实例不可重新连接。
    pub async fn connect(&self) -> TimerResult<()> {
        {
            let mut lifecycle = self.lifecycle.lock().await;
            if lifecycle.closed {
                return Err(TimerError::MembershipConnection(
                    "成员关系已关闭, 不支持重新连接".to_string(),
                ));
            }
            if lifecycle.phase != MembershipState::Disconnected {
                return Err(TimerError::AlreadyConnected);
            }
            lifecycle.phase = MembershipState::Connecting;

            let events = match self.transport.join(&self.group_name).await {
                Ok(rx) => rx,
                Err(e) => {
                    lifecycle.phase = MembershipState::Disconnected;
                    return Err(TimerError::MembershipConnection(format!(
                        "加入组 '{}' 失败: {e}",
                        self.group_name
                    )));
                }
            };

            lifecycle.view_loop = Some(self.spawn_view_loop(events));
            lifecycle.phase = MembershipState::Connected;
            info!(
                "节点 {} 已连接到组 '{}'",
                self.transport.local_address(),
                self.group_name
            );
        }

        // 阻塞到首个视图安装完成
        let mut view_rx = self.view_tx.subscribe();
        view_rx
            .wait_for(|view| view.is_some())
            .await
            .map_err(|_| TimerError::MembershipConnection("视图通道意外关闭".to_string()))?;
        Ok(())
    }

    /// 离开集群组并停止视图循环; 未连接时为空操作
    pub async fn shutdown(&self) -> TimerResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.phase != MembershipState::Connected {
            lifecycle.closed = true;
            return Ok(());
        }

        let _ = self.shutdown_tx.send(());
        if let Some(handle) = lifecycle.view_loop.take() {
            if let Err(e) = handle.await {
                warn!("视图循环退出异常: {}", e);
            }
        }
        if let Err(e) = self.transport.leave().await {
            warn!("离开组 '{}' 失败: {}", self.group_name, e);
        }
        let _ = self.view_tx.send(None);
        lifecycle.phase = MembershipState::Disconnected;
        lifecycle.closed = true;
        info!(
            "节点 {} 已离开组 '{}'",
            self.transport.local_address(),
            self.group_name
        );
        Ok(())
    }

    /// 当前视图快照; 未连接或已关闭时为 `None`
    pub fn current_view(&self) -> Option<Arc<ClusterView>> {
        self.view_tx.borrow().clone()
    }

    /// 本节点当前是否为主节点
    pub fn is_master(&self) -> bool {
        self.current_view().map(|v| v.is_master()).unwrap_or(false)
    }

    pub fn members(&self) -> Vec<NodeAddress> {
        self.current_view()
            .map(|v| v.members.clone())
            .unwrap_or_default()
    }

    pub fn local_address(&self) -> NodeAddress {
        self.transport.local_address()
    }

    pub async fn state(&self) -> MembershipState {
        self.lifecycle.lock().await.phase
    }

    /// 订阅视图快照变化, 供需要自行等待视图的组件使用
    pub fn subscribe_views(&self) -> watch::Receiver<Option<Arc<ClusterView>>> {
        self.view_tx.subscribe()
    }

    fn spawn_view_loop(&self, mut events: mpsc::UnboundedReceiver<ViewEvent>) -> JoinHandle<()> {
        let view_loop = ViewLoop {
            group: self.group_name.clone(),
            local: self.transport.local_address(),
            policy: self.policy.clone(),
            notifier: self.notifier.clone(),
            handlers: self.handlers.clone(),
            view_tx: self.view_tx.clone(),
        };
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut previous: Option<Arc<ClusterView>> = None;
            loop {
                tokio::select! {
                    maybe_event = events.recv() => match maybe_event {
                        Some(event) => view_loop.install_view(event, &mut previous).await,
                        None => {
                            warn!("组 '{}' 的视图通道已关闭, 视图循环退出", view_loop.group);
                            break;
                        }
                    },
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }
}

/// 视图循环的工作状态, 整体移交给循环任务
struct ViewLoop {
    group: String,
    local: NodeAddress,
    policy: Arc<dyn MasterElectionPolicy>,
    notifier: Arc<EventNotifier>,
    handlers: Arc<RwLock<Vec<Arc<dyn ViewChangeHandler>>>>,
    view_tx: Arc<watch::Sender<Option<Arc<ClusterView>>>>,
}

impl ViewLoop {
    /// 处理一个视图事件: 选举、发布快照、投递处理器与观察者
    async fn install_view(&self, event: ViewEvent, previous: &mut Option<Arc<ClusterView>>) {
        if event.members.is_empty() {
            warn!(
                "组 '{}' 收到空成员视图 gen={}, 跳过",
                self.group, event.generation
            );
            return;
        }

        let master = match self.policy.elect(&event.members) {
            Ok(master) => master,
            Err(e) => {
                error!("视图 gen={} 选举失败: {}", event.generation, e);
                return;
            }
        };

        let view = Arc::new(ClusterView {
            generation: event.generation,
            members: event.members,
            master,
            local: self.local.clone(),
        });
        let was_master = previous.as_ref().map(|v| v.is_master()).unwrap_or(false);
        let is_master = view.is_master();
        let (joined, left) = view.member_changes(previous.as_deref());

        info!(
            "组 '{}' 安装视图 gen={}: 成员数={}, 主节点={}, 本节点身份={}",
            self.group,
            view.generation,
            view.member_count(),
            view.master,
            if is_master { "master" } else { "standby" }
        );

        // 快照先行: 处理器回调中即可读到最新视图
        let _ = self.view_tx.send(Some(view.clone()));
        *previous = Some(view.clone());

        let changed = ViewChangedEvent {
            view,
            joined,
            left,
            gained_mastership: is_master && !was_master,
            lost_mastership: was_master && !is_master,
        };

        let registered: Vec<_> = self.handlers.read().await.iter().cloned().collect();
        for handler in registered {
            if let Err(e) = handler.on_view_change(&changed).await {
                error!("视图变更处理器执行失败: {}", e);
            }
        }
        self.notifier.notify_view_changed(changed).await;
    }
}
