use async_trait::async_trait;
use tracing::{info, warn};

use timer_core::{
    AfterTaskEvent, AfterTaskObserver, BeforeTaskEvent, BeforeTaskObserver, TimerResult,
    ViewChangedEvent, ViewChangedObserver,
};

/// 日志观察者
///
/// 把视图变更与任务前后事件写入结构化日志, 同时实现全部三类
/// 观察者trait, 可整体挂到事件通知器上。
pub struct LoggingObserver;

impl LoggingObserver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoggingObserver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ViewChangedObserver for LoggingObserver {
    async fn on_view_changed(&self, event: &ViewChangedEvent) -> TimerResult<()> {
        info!(
            "集群视图变更: gen={}, 成员数={}, 主节点={}, 加入={:?}, 离开={:?}",
            event.view.generation,
            event.view.member_count(),
            event.view.master,
            event.joined,
            event.left
        );
        if event.gained_mastership {
            info!("本节点当选主节点");
        }
        if event.lost_mastership {
            info!("本节点失去主节点身份");
        }
        Ok(())
    }
}

#[async_trait]
impl BeforeTaskObserver for LoggingObserver {
    async fn on_before_task(&self, event: &BeforeTaskEvent) -> TimerResult<()> {
        info!(
            "任务 '{}' 开始执行: 计划时刻={}, 实际触发={}",
            event.task_name, event.scheduled_at, event.fired_at
        );
        Ok(())
    }
}

#[async_trait]
impl AfterTaskObserver for LoggingObserver {
    async fn on_after_task(&self, event: &AfterTaskEvent) -> TimerResult<()> {
        let elapsed_ms = (event.finished_at - event.fired_at).num_milliseconds();
        if event.succeeded {
            info!("任务 '{}' 执行成功: 耗时={}ms", event.task_name, elapsed_ms);
        } else {
            warn!(
                "任务 '{}' 执行失败: 耗时={}ms, 原因: {}",
                event.task_name,
                elapsed_ms,
                event.error.as_deref().unwrap_or("未知")
            );
        }
        Ok(())
    }
}
