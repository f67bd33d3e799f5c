use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use timer_core::{NodeAddress, TimerError, TimerResult};

use crate::transport::{GroupTransport, ViewEvent};

/// 进程内组注册表
///
/// 在单进程内模拟组通信: 同一注册表上的多个传输端点共享成员视图,
/// 任何加入/离开都会向所有在组成员广播新视图。适用于嵌入式部署
/// 和测试场景, 真实的网络协议栈通过实现 `GroupTransport` 接入。
#[derive(Clone, Default)]
pub struct InMemoryGroupRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    groups: HashMap<String, GroupState>,
}

struct GroupState {
    generation: u64,
    /// 按加入顺序排列的成员
    members: Vec<NodeAddress>,
    subscribers: HashMap<NodeAddress, mpsc::UnboundedSender<ViewEvent>>,
}

impl GroupState {
    fn new() -> Self {
        Self {
            generation: 0,
            members: Vec::new(),
            subscribers: HashMap::new(),
        }
    }

    /// 产生下一代视图并广播给所有订阅者
    fn install_view(&mut self, group: &str) {
        self.generation += 1;
        let event = ViewEvent {
            generation: self.generation,
            members: self.members.clone(),
        };
        debug!(
            "组 '{}' 安装视图 gen={}, 成员数={}",
            group,
            event.generation,
            event.members.len()
        );
        self.subscribers.retain(|addr, sender| {
            if sender.send(event.clone()).is_err() {
                warn!("成员 {} 的视图通道已关闭, 移除订阅", addr);
                false
            } else {
                true
            }
        });
    }
}

impl InMemoryGroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为指定地址创建挂在本注册表上的传输端点
    pub fn transport(&self, addr: impl Into<NodeAddress>) -> InMemoryGroupTransport {
        InMemoryGroupTransport {
            registry: self.clone(),
            local: addr.into(),
            joined_group: Mutex::new(None),
        }
    }

    async fn join(
        &self,
        group: &str,
        addr: &NodeAddress,
    ) -> TimerResult<mpsc::UnboundedReceiver<ViewEvent>> {
        let mut inner = self.inner.lock().await;
        let state = inner
            .groups
            .entry(group.to_string())
            .or_insert_with(GroupState::new);
        if state.members.contains(addr) {
            return Err(TimerError::MembershipConnection(format!(
                "地址 {addr} 已在组 '{group}' 中"
            )));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.members.push(addr.clone());
        state.subscribers.insert(addr.clone(), tx);
        info!("节点 {} 加入组 '{}'", addr, group);
        state.install_view(group);
        Ok(rx)
    }

    async fn leave(&self, group: &str, addr: &NodeAddress) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner.groups.get_mut(group) {
            let was_member = state.members.iter().any(|m| m == addr);
            state.members.retain(|m| m != addr);
            state.subscribers.remove(addr);
            if was_member {
                info!("节点 {} 离开组 '{}'", addr, group);
                state.install_view(group);
            }
        }
    }

    /// 模拟成员崩溃: 不经过优雅离组直接从视图中剔除
    pub async fn fail(&self, group: &str, addr: &NodeAddress) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner.groups.get_mut(group) {
            let was_member = state.members.iter().any(|m| m == addr);
            state.members.retain(|m| m != addr);
            state.subscribers.remove(addr);
            if was_member {
                warn!("节点 {} 从组 '{}' 中失联", addr, group);
                state.install_view(group);
            }
        }
    }

    /// 当前组成员快照, 供测试断言
    pub async fn members(&self, group: &str) -> Vec<NodeAddress> {
        let inner = self.inner.lock().await;
        inner
            .groups
            .get(group)
            .map(|s| s.members.clone())
            .unwrap_or_default()
    }
}

/// 挂在进程内注册表上的传输端点
pub struct InMemoryGroupTransport {
    registry: InMemoryGroupRegistry,
    local: NodeAddress,
    joined_group: Mutex<Option<String>>,
}

#[async_trait]
impl GroupTransport for InMemoryGroupTransport {
    fn local_address(&self) -> NodeAddress {
        self.local.clone()
    }

    async fn join(&self, group: &str) -> TimerResult<mpsc::UnboundedReceiver<ViewEvent>> {
        let rx = self.registry.join(group, &self.local).await?;
        *self.joined_group.lock().await = Some(group.to_string());
        Ok(rx)
    }

    async fn leave(&self) -> TimerResult<()> {
        let group = self
            .joined_group
            .lock()
            .await
            .take()
            .ok_or(TimerError::NotConnected)?;
        self.registry.leave(&group, &self.local).await;
        Ok(())
    }
}
