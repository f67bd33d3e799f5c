use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

/// 优雅关闭管理器
///
/// 信号处理线程触发一次关闭, 所有订阅方通过广播通道收到通知。
/// 关闭后的订阅立即得到已触发的接收器, 不会错过信号。
pub struct ShutdownManager {
    shutdown_tx: Arc<RwLock<Option<broadcast::Sender<()>>>>,
    closed: Arc<RwLock<bool>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx: Arc::new(RwLock::new(Some(shutdown_tx))),
            closed: Arc::new(RwLock::new(false)),
        }
    }

    /// 订阅关闭信号
    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        let shutdown_tx = self.shutdown_tx.read().await;
        match shutdown_tx.as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                // 已关闭, 返回立即可读的接收器
                let (tx, rx) = broadcast::channel(1);
                let _ = tx.send(());
                rx
            }
        }
    }

    /// 触发关闭; 重复调用是空操作
    pub async fn shutdown(&self) {
        let mut closed = self.closed.write().await;
        if *closed {
            debug!("关闭已触发过, 忽略重复请求");
            return;
        }
        *closed = true;

        // 先摘下发送端再发送: 此后的订阅走"已关闭"分支, 不会错过信号
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            debug!("向 {} 个订阅者发送关闭信号", tx.receiver_count());
            let _ = tx.send(());
        }
        info!("关闭信号已发送");
    }

    pub async fn is_shutdown(&self) -> bool {
        *self.closed.read().await
    }

    /// 阻塞到关闭被触发
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.subscribe().await;
        let _ = rx.recv().await;
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ShutdownManager {
    fn clone(&self) -> Self {
        Self {
            shutdown_tx: Arc::clone(&self.shutdown_tx),
            closed: Arc::clone(&self.closed),
        }
    }
}
