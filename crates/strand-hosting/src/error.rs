use std::net::SocketAddr;

use strand_transport::TransportError;
use thiserror::Error;

/// 服务端装配与生命周期错误。
#[derive(Debug, Error)]
pub enum ServerError {
    /// `start` 只能在未绑定状态下调用一次。
    #[error("server `{name}` has already been started")]
    AlreadyStarted { name: String },
    /// 服务端已停止，不能再次启动。
    #[error("server `{name}` has been stopped")]
    Stopped { name: String },
    /// 构建参数或配置文件无效。
    #[error("invalid server configuration: {0}")]
    InvalidConfig(String),
    /// 监听套接字创建失败。
    #[error("server `{name}` failed to listen on {addr}: {source}")]
    Bind {
        name: String,
        addr: SocketAddr,
        #[source]
        source: TransportError,
    },
}

impl ServerError {
    pub(crate) fn invalid(detail: impl std::fmt::Display) -> Self {
        ServerError::InvalidConfig(detail.to_string())
    }
}
