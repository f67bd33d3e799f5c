use thiserror::Error;

/// 定时器统一错误类型定义
#[derive(Debug, Error)]
pub enum TimerError {
    #[error("无效的调度表达式: {field}字段 - {message}")]
    ScheduleParse { field: String, message: String },

    #[error("调度表达式在限定范围内无法命中时间点: {expr}")]
    ScheduleOverflow { expr: String },

    #[error("集群连接错误: {0}")]
    MembershipConnection(String),

    #[error("节点已连接到集群组")]
    AlreadyConnected,

    #[error("节点尚未连接到集群组")]
    NotConnected,

    #[error("成员列表为空, 无法选举主节点")]
    EmptyMemberList,

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("执行器未注册: {name}")]
    ExecutorNotFound { name: String },

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl TimerError {
    /// 调度表达式相关错误的构造辅助
    pub fn schedule_parse(field: impl Into<String>, message: impl Into<String>) -> Self {
        TimerError::ScheduleParse {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 错误是否源于任务体本身(可被隔离, 不影响调度循环)
    pub fn is_task_failure(&self) -> bool {
        matches!(self, TimerError::TaskExecution(_))
    }
}

/// 统一的Result类型
pub type TimerResult<T> = std::result::Result<T, TimerError>;
