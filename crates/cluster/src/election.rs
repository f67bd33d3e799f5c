use tracing::debug;

use timer_core::{NodeAddress, TimerError, TimerResult};

/// 主节点选举策略
///
/// 选举必须是成员列表的纯函数: 同一组成员(无论顺序)在任何节点上
/// 都要推导出同一个主节点, 集群不需要为选举做任何额外通信。
pub trait MasterElectionPolicy: Send + Sync {
    /// 从成员列表中选出主节点
    fn elect(&self, members: &[NodeAddress]) -> TimerResult<NodeAddress>;

    /// 策略名称
    fn name(&self) -> &str;
}

/// 默认策略: 地址字典序最小者为主节点
pub struct LowestAddressPolicy;

impl LowestAddressPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LowestAddressPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterElectionPolicy for LowestAddressPolicy {
    fn elect(&self, members: &[NodeAddress]) -> TimerResult<NodeAddress> {
        let master = members
            .iter()
            .min()
            .cloned()
            .ok_or(TimerError::EmptyMemberList)?;
        debug!("最小地址策略选出主节点: {}", master);
        Ok(master)
    }

    fn name(&self) -> &str {
        "LowestAddress"
    }
}

/// 优先级策略: 按配置顺序命中的第一个地址为主节点
///
/// 配置列表中没有任何成员在线时退回最小地址策略。
pub struct PriorityPolicy {
    priorities: Vec<NodeAddress>,
}

impl PriorityPolicy {
    pub fn new(priorities: Vec<String>) -> Self {
        Self {
            priorities: priorities.into_iter().map(NodeAddress::new).collect(),
        }
    }
}

impl MasterElectionPolicy for PriorityPolicy {
    fn elect(&self, members: &[NodeAddress]) -> TimerResult<NodeAddress> {
        if members.is_empty() {
            return Err(TimerError::EmptyMemberList);
        }
        for candidate in &self.priorities {
            if members.contains(candidate) {
                debug!("优先级策略选出主节点: {}", candidate);
                return Ok(candidate.clone());
            }
        }
        LowestAddressPolicy.elect(members)
    }

    fn name(&self) -> &str {
        "Priority"
    }
}
