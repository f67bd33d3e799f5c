use async_trait::async_trait;
use tokio::sync::mpsc;

use timer_core::{NodeAddress, TimerResult};

/// 传输层推送的成员视图事件
///
/// 事件只描述"现在组里有谁", 不携带任何角色信息; 主节点身份由
/// 每个节点独立从成员列表推导。
#[derive(Debug, Clone)]
pub struct ViewEvent {
    /// 单调递增的视图代数
    pub generation: u64,
    /// 当前组内全部成员
    pub members: Vec<NodeAddress>,
}

/// 组成员传输层接口
///
/// 封装具体的组通信协议。实现方负责成员探活与视图推送, 并保证:
/// 视图按代数递增的顺序投递, 同一事件通道内不会乱序。
#[async_trait]
pub trait GroupTransport: Send + Sync {
    /// 传输层为本节点分配的地址
    fn local_address(&self) -> NodeAddress;

    /// 加入指定组, 返回视图事件通道
    ///
    /// 加入成功后通道内至少会出现一个包含本节点的视图。
    async fn join(&self, group: &str) -> TimerResult<mpsc::UnboundedReceiver<ViewEvent>>;

    /// 优雅离开当前组
    ///
    /// 未加入任何组时属于生命周期误用, 返回 `NotConnected`。
    async fn leave(&self) -> TimerResult<()>;
}
