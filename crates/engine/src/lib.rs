//! 任务调度引擎
//!
//! 在成为主节点的节点上装载周期任务, 在失去主节点身份时把任务
//! 整体取消。每个任务由一个自重排句柄驱动, 执行体跑在有界工作
//! 池里, 任务前后事件通过事件通知器对外发布。

pub mod coordinator;
pub mod executors;
pub mod handle;
pub mod observers;
pub mod pool;

pub use coordinator::{CoordinatorStatus, TaskCoordinator, TaskSnapshot};
pub use executors::{ExecutorRegistry, HttpExecutor, ShellExecutor};
pub use handle::RecurrentTaskHandle;
pub use observers::LoggingObserver;
pub use pool::WorkerPool;
