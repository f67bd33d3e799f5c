use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use timer_cluster::ViewChangeHandler;
use timer_core::{EventNotifier, TaskDefinition, TimerResult, ViewChangedEvent};

use crate::executors::ExecutorRegistry;
use crate::handle::RecurrentTaskHandle;
use crate::pool::WorkerPool;

#[derive(Debug, Default)]
struct CoordinatorState {
    scheduling_active: bool,
    shut_down: bool,
    handles: HashMap<String, Arc<RecurrentTaskHandle>>,
}

/// 协调器状态快照
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub scheduling_active: bool,
    pub live_task_count: usize,
    pub tasks: Vec<TaskSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub name: String,
    pub next_fire: Option<DateTime<Utc>>,
}

/// 任务协调器
///
/// 以视图变更处理器的身份挂在成员关系上, 把主节点身份的边沿转换
/// 成任务集合的整体启停: 刚成为主节点时装载全部任务, 失去主节点
/// 身份时在回调返回前取消全部任务。重复的同身份视图是空操作。
pub struct TaskCoordinator {
    tasks: Vec<TaskDefinition>,
    executors: Arc<ExecutorRegistry>,
    pool: Arc<WorkerPool>,
    notifier: Arc<EventNotifier>,
    state: Mutex<CoordinatorState>,
}

impl TaskCoordinator {
    pub fn new(
        tasks: Vec<TaskDefinition>,
        executors: Arc<ExecutorRegistry>,
        pool: Arc<WorkerPool>,
        notifier: Arc<EventNotifier>,
    ) -> Self {
        Self {
            tasks,
            executors,
            pool,
            notifier,
            state: Mutex::new(CoordinatorState::default()),
        }
    }

    /// 装载全部启用的任务; 单个任务装载失败不影响其他任务
    async fn start_all(&self, state: &mut CoordinatorState) {
        for task in &self.tasks {
            if !task.is_enabled() {
                info!("任务 '{}' 已禁用, 跳过装载", task.name);
                continue;
            }
            let executor = match self.executors.resolve(&task.executor) {
                Ok(executor) => executor,
                Err(e) => {
                    error!("任务 '{}' 装载失败: {}", task.name, e);
                    continue;
                }
            };
            match RecurrentTaskHandle::arm(
                task.clone(),
                executor,
                self.pool.clone(),
                self.notifier.clone(),
            ) {
                Ok(handle) => {
                    state.handles.insert(task.name.clone(), handle);
                }
                Err(e) => {
                    error!("任务 '{}' 装载失败: {}", task.name, e);
                }
            }
        }
        info!("本节点开始调度, 共装载 {} 个任务", state.handles.len());
    }

    /// 取消并清空全部句柄
    ///
    /// 取消是边沿语义: 返回时句柄已不可能再触发新执行, 进行中的
    /// 任务体自行结束且不再重排。
    fn stop_all(state: &mut CoordinatorState) {
        for handle in state.handles.values() {
            handle.cancel();
        }
        let stopped = state.handles.len();
        state.handles.clear();
        state.scheduling_active = false;
        info!("本节点停止调度, 已取消 {} 个任务", stopped);
    }

    /// 有期限的停机: 取消全部任务, 排空循环, 超时后强制终止
    pub async fn shutdown(&self, timeout: Duration) -> TimerResult<()> {
        let handles: Vec<Arc<RecurrentTaskHandle>> = {
            let mut state = self.state.lock().await;
            if state.shut_down {
                return Ok(());
            }
            state.shut_down = true;
            state.scheduling_active = false;
            state.handles.drain().map(|(_, h)| h).collect()
        };

        for handle in &handles {
            handle.cancel();
        }
        self.pool.close();

        let drain = join_all(handles.iter().map(|handle| handle.join()));
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("任务循环未在 {:?} 内排空, 强制终止剩余循环", timeout);
            for handle in &handles {
                handle.abort();
            }
        }
        info!("任务协调器已停机");
        Ok(())
    }

    pub async fn status(&self) -> CoordinatorStatus {
        let state = self.state.lock().await;
        let mut tasks: Vec<TaskSnapshot> = state
            .handles
            .values()
            .map(|handle| TaskSnapshot {
                name: handle.task_name().to_string(),
                next_fire: handle.next_fire(),
            })
            .collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        CoordinatorStatus {
            scheduling_active: state.scheduling_active,
            live_task_count: tasks.len(),
            tasks,
        }
    }

    /// 当前是否处于调度状态, 供测试与状态查询使用
    pub async fn is_scheduling(&self) -> bool {
        self.state.lock().await.scheduling_active
    }
}

#[async_trait]
impl ViewChangeHandler for TaskCoordinator {
    async fn on_view_change(&self, event: &ViewChangedEvent) -> TimerResult<()> {
        let mut state = self.state.lock().await;
        if state.shut_down {
            return Ok(());
        }

        let is_master = event.view.is_master();
        if is_master && !state.scheduling_active {
            info!(
                "视图 gen={}: 本节点当选主节点, 启动任务调度",
                event.view.generation
            );
            self.start_all(&mut state).await;
            state.scheduling_active = true;
        } else if !is_master && state.scheduling_active {
            info!(
                "视图 gen={}: 本节点失去主节点身份, 停止任务调度",
                event.view.generation
            );
            Self::stop_all(&mut state);
        }
        Ok(())
    }
}
