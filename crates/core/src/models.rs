use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 集群节点地址
///
/// 地址的字典序是主节点选举的全序基础: 相同的成员列表在任何节点上
/// 都会推导出相同的最小地址。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddress(String);

impl NodeAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        NodeAddress(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeAddress {
    fn from(s: &str) -> Self {
        NodeAddress(s.to_string())
    }
}

/// 集群成员关系生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipState {
    #[serde(rename = "DISCONNECTED")]
    Disconnected,
    #[serde(rename = "CONNECTING")]
    Connecting,
    #[serde(rename = "CONNECTED")]
    Connected,
}

/// 某一时刻的集群视图快照
///
/// 视图是不可变的: 每次成员变更都会产生一个全新的快照, 读取方
/// 永远不会看到半更新状态。`generation` 单调递增, 晚到的视图
/// 严格覆盖早到的视图。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterView {
    pub generation: u64,
    pub members: Vec<NodeAddress>,
    pub master: NodeAddress,
    pub local: NodeAddress,
}

impl ClusterView {
    /// 本节点是否为当前主节点
    pub fn is_master(&self) -> bool {
        self.master == self.local
    }

    pub fn contains(&self, addr: &NodeAddress) -> bool {
        self.members.contains(addr)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// 与上一视图相比新加入/离开的成员
    pub fn member_changes(
        &self,
        previous: Option<&ClusterView>,
    ) -> (Vec<NodeAddress>, Vec<NodeAddress>) {
        let old: &[NodeAddress] = previous.map(|v| v.members.as_slice()).unwrap_or(&[]);
        let joined = self
            .members
            .iter()
            .filter(|m| !old.contains(m))
            .cloned()
            .collect();
        let left = old
            .iter()
            .filter(|m| !self.members.contains(m))
            .cloned()
            .collect();
        (joined, left)
    }
}

/// 周期任务定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    pub schedule: String, // 六字段调度表达式
    #[serde(default = "default_timezone")]
    pub timezone: String, // UTC偏移, 如 "UTC" / "+08:00"
    #[serde(default = "default_executor")]
    pub executor: String, // 执行器名称
    #[serde(default)]
    pub properties: HashMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_executor() -> String {
    "shell".to_string()
}

fn default_enabled() -> bool {
    true
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>, schedule: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schedule: schedule.into(),
            timezone: default_timezone(),
            executor: default_executor(),
            properties: HashMap::new(),
            enabled: true,
        }
    }

    pub fn with_executor(mut self, executor: impl Into<String>) -> Self {
        self.executor = executor.into();
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn entity_description(&self) -> String {
        format!(
            "任务 '{}' (调度: {}, 执行器: {})",
            self.name, self.schedule, self.executor
        )
    }
}
