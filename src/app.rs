use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use timer_cluster::{
    ClusterMembership, InMemoryGroupRegistry, LowestAddressPolicy, MasterElectionPolicy,
    PriorityPolicy,
};
use timer_config::AppConfig;
use timer_core::{ClusterView, EventNotifier, MembershipState, NodeAddress};
use timer_engine::{
    CoordinatorStatus, ExecutorRegistry, LoggingObserver, TaskCoordinator, WorkerPool,
};

/// 应用状态快照, 可序列化供外部查询
#[derive(Debug, Clone, Serialize)]
pub struct AppStatus {
    pub node: NodeAddress,
    pub group: String,
    pub state: MembershipState,
    pub started_at: DateTime<Utc>,
    pub view: Option<ClusterView>,
    pub coordinator: CoordinatorStatus,
}

/// 主应用程序
///
/// 组装成员关系、任务协调器与事件通知: 协调器以视图变更处理器的
/// 身份挂在成员关系上, 主节点身份的得失直接驱动任务启停。
pub struct Application {
    config: AppConfig,
    node: NodeAddress,
    membership: Arc<ClusterMembership>,
    coordinator: Arc<TaskCoordinator>,
    started_at: DateTime<Utc>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let node = config.cluster.resolve_node_address();
        info!("初始化应用程序: 节点={}, 组={}", node, config.cluster.group);

        // 启动期校验全部启用任务引用的执行器都已注册
        let executors = Arc::new(ExecutorRegistry::with_defaults());
        for task in &config.tasks {
            if task.is_enabled() {
                executors
                    .resolve(&task.executor)
                    .with_context(|| format!("任务 '{}' 引用的执行器不可用", task.name))?;
            }
        }

        let notifier = Arc::new(EventNotifier::new(config.engine.event_dispatch_mode()));
        let logging = Arc::new(LoggingObserver::new());
        notifier.add_view_observer(logging.clone()).await;
        notifier.add_before_task_observer(logging.clone()).await;
        notifier.add_after_task_observer(logging).await;

        let pool = Arc::new(WorkerPool::new(config.engine.worker_pool_size));
        let coordinator = Arc::new(TaskCoordinator::new(
            config.tasks.clone(),
            executors,
            pool,
            notifier.clone(),
        ));

        let registry = InMemoryGroupRegistry::new();
        let transport = Arc::new(registry.transport(node.clone()));
        let membership = Arc::new(ClusterMembership::new(
            &config.cluster.group,
            transport,
            build_election_policy(&config),
            notifier,
        ));
        // 处理器必须先于connect注册, 首个视图才能驱动任务装载
        membership.register_handler(coordinator.clone()).await;

        Ok(Self {
            config,
            node,
            membership,
            coordinator,
            started_at: Utc::now(),
        })
    }

    /// 加入集群组; 返回时本节点已拿到首个非空视图
    pub async fn start(&self) -> Result<()> {
        info!("连接集群组 '{}'", self.config.cluster.group);
        self.membership.connect().await.context("连接集群组失败")?;
        if let Some(view) = self.membership.current_view() {
            info!("集群连接就绪: gen={}, 主节点={}", view.generation, view.master);
        }
        Ok(())
    }

    /// 运行到收到关闭信号为止
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.start().await?;
        match serde_json::to_string(&self.status().await) {
            Ok(snapshot) => info!("启动状态: {snapshot}"),
            Err(e) => warn!("状态序列化失败: {e}"),
        }

        let _ = shutdown_rx.recv().await;
        info!("应用收到关闭信号");
        self.shutdown().await
    }

    /// 有序停机: 先停任务调度, 再退出集群组
    pub async fn shutdown(&self) -> Result<()> {
        self.coordinator
            .shutdown(self.config.engine.shutdown_timeout())
            .await
            .context("任务协调器停机失败")?;
        self.membership.shutdown().await.context("退出集群组失败")?;
        info!("应用已停止");
        Ok(())
    }

    pub async fn status(&self) -> AppStatus {
        let view = self.membership.current_view().map(|v| (*v).clone());
        AppStatus {
            node: self.node.clone(),
            group: self.config.cluster.group.clone(),
            state: self.membership.state().await,
            started_at: self.started_at,
            view,
            coordinator: self.coordinator.status().await,
        }
    }
}

fn build_election_policy(config: &AppConfig) -> Arc<dyn MasterElectionPolicy> {
    if config.cluster.election_policy == "priority" {
        Arc::new(PriorityPolicy::new(config.cluster.priorities.clone()))
    } else {
        Arc::new(LowestAddressPolicy::new())
    }
}

#[cfg(test)]
mod app_tests {
    use super::*;
    use timer_core::TaskDefinition;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.cluster.group = "app-test".to_string();
        config.cluster.node_address = Some("app-node-1".to_string());
        config
    }

    #[tokio::test]
    async fn test_application_lifecycle() {
        let app = Application::new(test_config()).await.unwrap();
        app.start().await.unwrap();

        let status = app.status().await;
        assert_eq!(status.state, MembershipState::Connected);
        let view = status.view.expect("连接后应有视图");
        assert!(view.is_master());
        assert_eq!(view.member_count(), 1);

        app.shutdown().await.unwrap();
        assert_eq!(app.status().await.state, MembershipState::Disconnected);
    }

    #[tokio::test]
    async fn test_unknown_executor_fails_startup() {
        let mut config = test_config();
        config.tasks = vec![TaskDefinition::new("ghost", "0 * * * * ?").with_executor("missing")];
        assert!(Application::new(config).await.is_err());
    }

    #[tokio::test]
    async fn test_status_serializes_to_json() {
        let app = Application::new(test_config()).await.unwrap();
        let rendered = serde_json::to_string(&app.status().await).unwrap();
        assert!(rendered.contains("app-node-1"));
        assert!(rendered.contains("DISCONNECTED"));
    }
}
