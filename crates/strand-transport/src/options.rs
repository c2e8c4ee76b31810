use std::{io, time::Duration};

use socket2::SockRef;
use tokio::net::TcpStream;

/// TCP 套接字级配置项，在每条建立或接受的连接上统一落地。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把 `TCP_NODELAY` 与 `SO_LINGER` 显式配置化，避免调用方直接操作 `socket2`；
/// - 客户端与服务端共享同一份配置语义，关闭阶段的行为保持对称。
///
/// ## 逻辑（How）
/// - `nodelay` 默认开启：请求/响应式交互的小报文不应被 Nagle 算法延迟；
/// - `linger` 为 `Some(dur)` 时通过 `SockRef::set_linger` 写入 `SO_LINGER`，
///   `None` 表示沿用内核默认策略。
///
/// ## 契约（What）
/// - **前置条件**：`apply` 调用时 `TcpStream` 已成功创建；
/// - **后置条件**：返回 `Ok(())` 时所有选项均已生效。
///
/// ## 风险与权衡（Trade-offs）
/// - `SO_LINGER` 在 Linux 上取整到秒，过小的值可能导致发送缓冲中的数据被 RST 丢弃。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocketOptions {
    nodelay: bool,
    linger: Option<Duration>,
}

impl SocketOptions {
    pub const fn new() -> Self {
        Self {
            nodelay: true,
            linger: None,
        }
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// 设置 `SO_LINGER` 超时时长。
    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    pub fn nodelay(&self) -> bool {
        self.nodelay
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger
    }

    pub(crate) fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;
        if self.linger.is_some() {
            SockRef::from(stream).set_linger(self.linger)?;
        }
        Ok(())
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self::new()
    }
}
