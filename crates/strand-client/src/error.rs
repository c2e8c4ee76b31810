use std::io;

use strand_transport::{Endpoint, ErrorCategory, TransportError};
use thiserror::Error;

/// 客户端交互错误。
///
/// 调用方可据此区分“网络故障，重试已耗尽”“对端拒绝（证书不受信任、材料无效）”
/// 与“处理器自身失败”三类情况。
#[derive(Debug, Error)]
pub enum ClientError {
    /// 可重试的建连失败在全部尝试后仍未成功。
    #[error("connecting to {endpoint} failed after {attempts} attempt(s): {source}")]
    Connect {
        endpoint: Endpoint,
        attempts: u32,
        #[source]
        source: TransportError,
    },
    /// 不可重试的建连失败（握手被拒、安全材料错误），或对端在握手之后拒绝了本端身份。
    #[error("connection to {endpoint} was rejected: {source}")]
    Rejected {
        endpoint: Endpoint,
        #[source]
        source: TransportError,
    },
    /// 建连成功后处理器失败；`category` 为传输层对该 IO 错误的分类（若能识别）。
    #[error("exchange with {endpoint} failed: {source}")]
    Exchange {
        endpoint: Endpoint,
        category: Option<ErrorCategory>,
        #[source]
        source: io::Error,
    },
    /// 构建参数或配置文件无效。
    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),
}

impl ClientError {
    pub(crate) fn invalid(detail: impl std::fmt::Display) -> Self {
        ClientError::InvalidConfig(detail.to_string())
    }

    /// 错误分类；纯处理器错误返回 `None`。
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            ClientError::Connect { source, .. } | ClientError::Rejected { source, .. } => {
                Some(source.category())
            }
            ClientError::Exchange { category, .. } => *category,
            ClientError::InvalidConfig(_) => Some(ErrorCategory::Configuration),
        }
    }

    /// 已进行的建连尝试次数；非重试耗尽类错误返回 `None`。
    pub fn attempts(&self) -> Option<u32> {
        match self {
            ClientError::Connect { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}
