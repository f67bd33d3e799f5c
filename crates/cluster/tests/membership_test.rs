#[cfg(test)]
mod membership_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::{mpsc, Mutex};

    use timer_cluster::{
        ClusterMembership, GroupTransport, InMemoryGroupRegistry, LowestAddressPolicy,
        MasterElectionPolicy, ViewChangeHandler, ViewEvent,
    };
    use timer_core::{
        ClusterView, DispatchMode, EventNotifier, MembershipState, NodeAddress, TimerError,
        TimerResult, ViewChangedEvent,
    };

    fn build_membership(
        registry: &InMemoryGroupRegistry,
        addr: &str,
        group: &str,
    ) -> ClusterMembership {
        ClusterMembership::new(
            group,
            Arc::new(registry.transport(addr)),
            Arc::new(LowestAddressPolicy::new()),
            Arc::new(EventNotifier::new(DispatchMode::Blocking)),
        )
    }

    async fn wait_for_generation(membership: &ClusterMembership, generation: u64) -> Arc<ClusterView> {
        let mut rx = membership.subscribe_views();
        let view = rx
            .wait_for(|v| {
                v.as_ref()
                    .map(|view| view.generation >= generation)
                    .unwrap_or(false)
            })
            .await
            .unwrap();
        view.clone().unwrap()
    }

    #[tokio::test]
    async fn test_single_node_is_its_own_master() {
        let registry = InMemoryGroupRegistry::new();
        let membership = build_membership(&registry, "node-a:7800", "prod");

        membership.connect().await.unwrap();
        assert_eq!(membership.state().await, MembershipState::Connected);
        assert!(membership.is_master());
        assert_eq!(membership.members(), vec![NodeAddress::from("node-a:7800")]);

        membership.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_lowest_address_wins_with_two_nodes() {
        let registry = InMemoryGroupRegistry::new();
        let a = build_membership(&registry, "node-a:7800", "prod");
        let b = build_membership(&registry, "node-b:7800", "prod");

        a.connect().await.unwrap();
        b.connect().await.unwrap();
        wait_for_generation(&a, 2).await;
        wait_for_generation(&b, 2).await;

        assert!(a.is_master());
        assert!(!b.is_master());
        assert_eq!(a.members().len(), 2);

        a.shutdown().await.unwrap();
        b.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_master_departure_promotes_standby() {
        let registry = InMemoryGroupRegistry::new();
        let a = build_membership(&registry, "node-a:7800", "prod");
        let b = build_membership(&registry, "node-b:7800", "prod");

        a.connect().await.unwrap();
        b.connect().await.unwrap();
        wait_for_generation(&b, 2).await;
        assert!(!b.is_master());

        a.shutdown().await.unwrap();
        let view = wait_for_generation(&b, 3).await;
        assert!(b.is_master());
        assert_eq!(view.members, vec![NodeAddress::from("node-b:7800")]);

        b.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_crash_detection_promotes_standby() {
        let registry = InMemoryGroupRegistry::new();
        let a = build_membership(&registry, "node-a:7800", "prod");
        let b = build_membership(&registry, "node-b:7800", "prod");

        a.connect().await.unwrap();
        b.connect().await.unwrap();
        wait_for_generation(&b, 2).await;

        // 崩溃: 不经过优雅离组
        registry.fail("prod", &NodeAddress::from("node-a:7800")).await;
        wait_for_generation(&b, 3).await;
        assert!(b.is_master());

        a.shutdown().await.unwrap();
        b.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_no_split_brain_during_churn() {
        let registry = InMemoryGroupRegistry::new();
        let memberships: Vec<ClusterMembership> = ["n1:7800", "n2:7800", "n3:7800"]
            .iter()
            .map(|addr| build_membership(&registry, addr, "prod"))
            .collect();

        for m in &memberships {
            m.connect().await.unwrap();
        }
        for m in &memberships {
            wait_for_generation(m, 3).await;
        }
        let masters = memberships.iter().filter(|m| m.is_master()).count();
        assert_eq!(masters, 1);
        assert!(memberships[0].is_master());

        // 主节点下线后, 剩余节点恰好一个接任
        memberships[0].shutdown().await.unwrap();
        for m in &memberships[1..] {
            wait_for_generation(m, 4).await;
        }
        let masters = memberships[1..].iter().filter(|m| m.is_master()).count();
        assert_eq!(masters, 1);
        assert!(memberships[1].is_master());

        for m in &memberships[1..] {
            m.shutdown().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let registry = InMemoryGroupRegistry::new();
        let membership = build_membership(&registry, "node-a:7800", "prod");

        membership.connect().await.unwrap();
        let err = membership.connect().await.unwrap_err();
        assert!(matches!(err, TimerError::AlreadyConnected));

        membership.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_clears_view_and_blocks_reconnect() {
        let registry = InMemoryGroupRegistry::new();
        let membership = build_membership(&registry, "node-a:7800", "prod");

        membership.connect().await.unwrap();
        membership.shutdown().await.unwrap();

        assert_eq!(membership.state().await, MembershipState::Disconnected);
        assert!(membership.current_view().is_none());
        assert!(!membership.is_master());
        assert!(membership.members().is_empty());
        assert!(registry.members("prod").await.is_empty());

        // 关闭后不可重新连接
        assert!(membership.connect().await.is_err());
        // 重复关闭是空操作
        membership.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_before_connect_is_noop() {
        let registry = InMemoryGroupRegistry::new();
        let membership = build_membership(&registry, "node-a:7800", "prod");
        membership.shutdown().await.unwrap();
        assert_eq!(membership.state().await, MembershipState::Disconnected);
        assert!(membership.current_view().is_none());
    }

    struct RecordingHandler {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ViewChangeHandler for RecordingHandler {
        async fn on_view_change(&self, event: &ViewChangedEvent) -> TimerResult<()> {
            let mut log = self.log.lock().await;
            log.push(format!(
                "{}:gen{}:gained={}:lost={}",
                self.label, event.view.generation, event.gained_mastership, event.lost_mastership
            ));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_handlers_run_in_registration_order() {
        let registry = InMemoryGroupRegistry::new();
        let membership = build_membership(&registry, "node-a:7800", "prod");
        let log = Arc::new(Mutex::new(Vec::new()));

        membership
            .register_handler(Arc::new(RecordingHandler {
                label: "first",
                log: log.clone(),
            }))
            .await;
        membership
            .register_handler(Arc::new(RecordingHandler {
                label: "second",
                log: log.clone(),
            }))
            .await;

        membership.connect().await.unwrap();
        for _ in 0..50 {
            if log.lock().await.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let entries = log.lock().await.clone();
        assert_eq!(
            entries,
            vec![
                "first:gen1:gained=true:lost=false",
                "second:gen1:gained=true:lost=false"
            ]
        );

        membership.shutdown().await.unwrap();
    }

    /// 手工喂视图事件的传输桩
    struct ScriptedTransport {
        local: NodeAddress,
        queued: Mutex<Option<mpsc::UnboundedReceiver<ViewEvent>>>,
        tx: mpsc::UnboundedSender<ViewEvent>,
    }

    impl ScriptedTransport {
        fn new(local: &str) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                local: NodeAddress::from(local),
                queued: Mutex::new(Some(rx)),
                tx,
            }
        }

        fn push(&self, generation: u64, members: &[&str]) {
            let event = ViewEvent {
                generation,
                members: members.iter().map(|m| NodeAddress::from(*m)).collect(),
            };
            self.tx.send(event).unwrap();
        }
    }

    #[async_trait]
    impl GroupTransport for ScriptedTransport {
        fn local_address(&self) -> NodeAddress {
            self.local.clone()
        }

        async fn join(&self, _group: &str) -> TimerResult<mpsc::UnboundedReceiver<ViewEvent>> {
            self.queued
                .lock()
                .await
                .take()
                .ok_or_else(|| TimerError::MembershipConnection("重复加入".to_string()))
        }

        async fn leave(&self) -> TimerResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_empty_views_are_skipped() {
        let transport = Arc::new(ScriptedTransport::new("node-a"));
        transport.push(1, &[]);
        transport.push(2, &["node-a"]);

        let membership = ClusterMembership::new(
            "prod",
            transport.clone(),
            Arc::new(LowestAddressPolicy::new()),
            Arc::new(EventNotifier::new(DispatchMode::Blocking)),
        );

        // 空视图被跳过, connect 直到第2代视图才返回
        membership.connect().await.unwrap();
        let view = membership.current_view().unwrap();
        assert_eq!(view.generation, 2);
        assert!(membership.is_master());

        membership.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_mastership_transition_flags() {
        let transport = Arc::new(ScriptedTransport::new("node-b"));
        let membership = ClusterMembership::new(
            "prod",
            transport.clone(),
            Arc::new(LowestAddressPolicy::new()),
            Arc::new(EventNotifier::new(DispatchMode::Blocking)),
        );
        let log = Arc::new(Mutex::new(Vec::new()));
        membership
            .register_handler(Arc::new(RecordingHandler {
                label: "h",
                log: log.clone(),
            }))
            .await;

        transport.push(1, &["node-b"]);
        membership.connect().await.unwrap();

        // 更小地址加入, 本节点降级; 随后对方离开, 本节点重新当选
        transport.push(2, &["node-a", "node-b"]);
        transport.push(3, &["node-b"]);
        wait_for_generation(&membership, 3).await;
        for _ in 0..50 {
            if log.lock().await.len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let entries = log.lock().await.clone();
        assert_eq!(
            entries,
            vec![
                "h:gen1:gained=true:lost=false",
                "h:gen2:gained=false:lost=true",
                "h:gen3:gained=true:lost=false"
            ]
        );

        membership.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_priority_policy_through_membership() {
        let registry = InMemoryGroupRegistry::new();
        let policy: Arc<dyn MasterElectionPolicy> = Arc::new(
            timer_cluster::PriorityPolicy::new(vec!["node-z:7800".to_string()]),
        );
        let a = ClusterMembership::new(
            "prod",
            Arc::new(registry.transport("node-a:7800")),
            policy.clone(),
            Arc::new(EventNotifier::new(DispatchMode::Blocking)),
        );
        let z = ClusterMembership::new(
            "prod",
            Arc::new(registry.transport("node-z:7800")),
            policy,
            Arc::new(EventNotifier::new(DispatchMode::Blocking)),
        );

        a.connect().await.unwrap();
        z.connect().await.unwrap();
        wait_for_generation(&a, 2).await;
        wait_for_generation(&z, 2).await;

        // 配置的优先节点胜出, 而不是最小地址
        assert!(z.is_master());
        assert!(!a.is_master());

        a.shutdown().await.unwrap();
        z.shutdown().await.unwrap();
    }
}
