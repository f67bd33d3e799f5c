use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use timer_core::{
    parse_offset, AfterTaskEvent, BeforeTaskEvent, EventNotifier, ScheduleExpression,
    TaskDefinition, TaskExecutor, TimerResult,
};

use crate::pool::WorkerPool;

/// 单个周期任务的自重排定时句柄
///
/// armed 之后由一个循环任务驱动: 推导下一次触发时间, 睡到点,
/// 执行任务体, 再从"现在"推导下一次。错过的触发不会补偿, 每轮
/// 至多产生一次执行。取消是协作式的: 设置标志并打断当前睡眠,
/// 进行中的任务体自行结束且不再重排。`abort` 是强制通道, 供
/// 停机排空超时后终止残余循环连同进行中的任务体。
#[derive(Debug)]
pub struct RecurrentTaskHandle {
    task: TaskDefinition,
    cancelled: AtomicBool,
    cancel_notify: Notify,
    next_fire: RwLock<Option<DateTime<Utc>>>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
    // join 会消费 loop_task, 强制终止走这两个独立保存的终止句柄
    loop_abort: Mutex<Option<AbortHandle>>,
    body_abort: Mutex<Option<AbortHandle>>,
}

impl RecurrentTaskHandle {
    /// 解析调度并启动循环任务
    ///
    /// 表达式或时区非法时立即失败, 不会留下半启动的句柄。
    pub fn arm(
        task: TaskDefinition,
        executor: Arc<dyn TaskExecutor>,
        pool: Arc<WorkerPool>,
        notifier: Arc<EventNotifier>,
    ) -> TimerResult<Arc<Self>> {
        let expr = ScheduleExpression::parse(&task.schedule)?;
        let tz = parse_offset(&task.timezone)?;

        let handle = Arc::new(Self {
            task,
            cancelled: AtomicBool::new(false),
            cancel_notify: Notify::new(),
            next_fire: RwLock::new(None),
            loop_task: Mutex::new(None),
            loop_abort: Mutex::new(None),
            body_abort: Mutex::new(None),
        });

        let loop_task = tokio::spawn(run_loop(handle.clone(), expr, tz, executor, pool, notifier));
        if let Ok(mut slot) = handle.loop_abort.lock() {
            *slot = Some(loop_task.abort_handle());
        }
        if let Ok(mut slot) = handle.loop_task.lock() {
            *slot = Some(loop_task);
        }
        info!("任务 '{}' 已装载, 调度: {}", handle.task.name, handle.task.schedule);
        Ok(handle)
    }

    /// 协作式取消: 此后句柄不会再触发任何执行
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel_notify.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn task_name(&self) -> &str {
        &self.task.name
    }

    /// 下一次计划触发时间; 终止后为 `None`
    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.next_fire.read().ok().and_then(|guard| *guard)
    }

    /// 等待循环任务退出, 用于有期限的停机排空
    pub async fn join(&self) {
        let taken = self.loop_task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = taken {
            let _ = task.await;
        }
    }

    /// 强制终止: 停机排空超时后的最后手段
    ///
    /// 终止调度循环连同进行中的任务体。不依赖 `join` 已消费的
    /// 循环句柄, 排空超时后调用依然生效。
    pub fn abort(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Ok(slot) = self.loop_abort.lock() {
            if let Some(loop_abort) = slot.as_ref() {
                loop_abort.abort();
            }
        }
        if let Ok(slot) = self.body_abort.lock() {
            if let Some(body_abort) = slot.as_ref() {
                body_abort.abort();
            }
        }
        self.set_next_fire(None);
    }

    fn set_next_fire(&self, at: Option<DateTime<Utc>>) {
        if let Ok(mut guard) = self.next_fire.write() {
            *guard = at;
        }
    }
}

async fn run_loop(
    handle: Arc<RecurrentTaskHandle>,
    expr: ScheduleExpression,
    tz: FixedOffset,
    executor: Arc<dyn TaskExecutor>,
    pool: Arc<WorkerPool>,
    notifier: Arc<EventNotifier>,
) {
    let task_name = handle.task.name.clone();
    loop {
        if handle.is_cancelled() {
            break;
        }

        // 每轮都从当前时刻重新推导, 错过的触发不补偿
        let scheduled_at = match expr.next_after(Utc::now(), tz) {
            Ok(Some(at)) => at,
            Ok(None) => {
                warn!("任务 '{}' 不再有后续触发时间, 循环终止", task_name);
                break;
            }
            Err(e) => {
                error!("任务 '{}' 推导触发时间失败: {}, 循环终止", task_name, e);
                break;
            }
        };
        handle.set_next_fire(Some(scheduled_at));

        let wait = (scheduled_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = handle.cancel_notify.notified() => break,
        }
        if handle.is_cancelled() {
            break;
        }

        // 限流: 拿到工作池许可才开始执行
        let permit = tokio::select! {
            permit = pool.acquire() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
            _ = handle.cancel_notify.notified() => break,
        };
        if handle.is_cancelled() {
            break;
        }

        let fired_at = Utc::now();
        notifier
            .notify_before_task(BeforeTaskEvent {
                task_name: task_name.clone(),
                scheduled_at,
                fired_at,
            })
            .await;

        // 任务体跑在独立子任务里, panic 被限制在子任务内
        let body_task = handle.task.clone();
        let body_executor = executor.clone();
        let body = tokio::spawn(async move {
            let _permit = permit;
            body_executor.execute(&body_task).await
        });
        if let Ok(mut slot) = handle.body_abort.lock() {
            *slot = Some(body.abort_handle());
        }

        let outcome = body.await;
        if let Ok(mut slot) = handle.body_abort.lock() {
            slot.take();
        }

        let (succeeded, error) = match outcome {
            Ok(Ok(())) => {
                debug!("任务 '{}' 执行成功", task_name);
                (true, None)
            }
            Ok(Err(e)) => {
                // 任务体自身的失败是预期内的, 基础设施错误才升级
                if e.is_task_failure() {
                    warn!("任务 '{}' 执行失败: {}", task_name, e);
                } else {
                    error!("任务 '{}' 执行失败: {}", task_name, e);
                }
                (false, Some(e.to_string()))
            }
            Err(e) => {
                if e.is_cancelled() {
                    debug!("任务 '{}' 的任务体已被强制终止", task_name);
                    break;
                }
                error!("任务 '{}' 的任务体发生panic: {}", task_name, e);
                (false, Some(format!("任务体异常终止: {e}")))
            }
        };

        notifier
            .notify_after_task(AfterTaskEvent {
                task_name: task_name.clone(),
                scheduled_at,
                fired_at,
                finished_at: Utc::now(),
                succeeded,
                error,
            })
            .await;
    }
    handle.set_next_fire(None);
    debug!("任务 '{}' 的调度循环已退出", task_name);
}
