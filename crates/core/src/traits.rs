use async_trait::async_trait;

use crate::errors::TimerResult;
use crate::models::TaskDefinition;

/// 任务执行器接口
///
/// 执行器按名称注册, 任务定义通过 `executor` 字段选择执行器。
/// 执行失败返回 `TaskExecution` 错误, 由调度侧记录并隔离。
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// 执行器名称, 与任务定义中的 `executor` 字段对应
    fn name(&self) -> &str;

    /// 执行一次任务体
    async fn execute(&self, task: &TaskDefinition) -> TimerResult<()>;
}
