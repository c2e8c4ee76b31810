use std::{borrow::Cow, error::Error as StdError, fmt, io};

/// 传输层错误映射模块。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 将建连、监听、握手与安全材料加载阶段的失败统一映射为带稳定错误码的 [`TransportError`]，
///   调用方无需解析底层库细节即可决定“重试 / 立即失败 / 告警”；
/// - 让客户端的重试策略只依赖 [`ErrorCategory`]，避免把“证书不受信任”误判为网络抖动。
///
/// ## 逻辑（How）
/// - [`OperationKind`] 描述一类操作的错误码与默认文案；
/// - [`TransportError::from_io`] 根据 `io::ErrorKind` 推导分类；
/// - TLS 实现可以通过 [`TransportError::new`] 指定更精确的分类（认证、完整性、安全材料）。
///
/// ## 契约（What）
/// - 所有错误都携带 `code()`，格式为 `strand.transport.<layer>.<operation>`；
/// - `is_retryable()` 仅对 [`ErrorCategory::Connection`] 与 [`ErrorCategory::Timeout`] 返回 `true`。
///
/// ## 风险与权衡（Trade-offs）
/// - 未识别的 `io::ErrorKind`（例如 DNS 解析失败）按不可重试处理，宁可尽早暴露配置问题，
///   也不在错误的主机名上反复等待超时；
/// - 本地地址不可用（`AddrInUse` / `AddrNotAvailable`）属于本机配置问题，同样不可重试。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub const BIND: OperationKind = OperationKind {
    code: "strand.transport.tcp.bind_failed",
    message: "tcp bind",
};
pub const ACCEPT: OperationKind = OperationKind {
    code: "strand.transport.tcp.accept_failed",
    message: "tcp accept",
};
pub const CONNECT: OperationKind = OperationKind {
    code: "strand.transport.tcp.connect_failed",
    message: "tcp connect",
};
pub const CONFIGURE: OperationKind = OperationKind {
    code: "strand.transport.tcp.configure_failed",
    message: "tcp configure",
};
pub const HANDSHAKE: OperationKind = OperationKind {
    code: "strand.transport.tls.handshake_failed",
    message: "tls handshake",
};
pub const MATERIAL: OperationKind = OperationKind {
    code: "strand.transport.tls.material_invalid",
    message: "tls security material",
};
pub const CONFIGURATION: OperationKind = OperationKind {
    code: "strand.transport.config_invalid",
    message: "transport configuration",
};

const TIMEOUT_CODE: &str = "strand.transport.timeout";

/// 错误的语义分类，供重试与告警策略使用。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// 瞬时网络故障：拒绝、重置、中断。
    Connection,
    /// 在给定时限内未完成。
    Timeout,
    /// 对端未通过身份认证，或拒绝了本端身份。
    Authentication,
    /// 握手报文或记录层被破坏、协议参数无法协商。
    Integrity,
    /// 证书、私钥或密钥库无法读取、解析或不受支持。
    SecurityMaterial,
    /// 配置文件或参数不合法。
    Configuration,
    /// 其他不可重试的 I/O 失败。
    NonRetryable,
}

impl ErrorCategory {
    /// 安全相关分类：认证、完整性与安全材料。
    pub fn is_security(self) -> bool {
        matches!(
            self,
            ErrorCategory::Authentication | ErrorCategory::Integrity | ErrorCategory::SecurityMaterial
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorCategory::Connection => "connection",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Integrity => "integrity",
            ErrorCategory::SecurityMaterial => "security-material",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::NonRetryable => "non-retryable",
        };
        f.write_str(label)
    }
}

/// 传输层统一错误。
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    code: &'static str,
    message: Cow<'static, str>,
    category: ErrorCategory,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl TransportError {
    /// 以指定分类构造错误。
    pub fn new(
        kind: OperationKind,
        category: ErrorCategory,
        detail: impl fmt::Display,
    ) -> Self {
        Self {
            code: kind.code,
            message: Cow::Owned(format!("{}: {}", kind.message, detail)),
            category,
            source: None,
        }
    }

    /// 将 IO 错误映射为传输错误，并附带错误分类。
    pub fn from_io(kind: OperationKind, error: io::Error) -> Self {
        let category = categorize_io_error(&error);
        Self::new(kind, category, &error).with_source(error)
    }

    /// 构造超时错误。
    pub fn timeout(kind: OperationKind) -> Self {
        Self {
            code: TIMEOUT_CODE,
            message: Cow::Owned(format!("{} timed out", kind.message)),
            category: ErrorCategory::Timeout,
            source: None,
        }
    }

    /// 附加底层错误来源。
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category,
            ErrorCategory::Connection | ErrorCategory::Timeout
        )
    }
}

/// 按 `io::ErrorKind` 推导错误分类。
pub fn categorize_io_error(error: &io::Error) -> ErrorCategory {
    use io::ErrorKind;
    match error.kind() {
        ErrorKind::TimedOut => ErrorCategory::Timeout,
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::HostUnreachable
        | ErrorKind::NetworkUnreachable
        | ErrorKind::NetworkDown
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof
        | ErrorKind::Interrupted
        | ErrorKind::WouldBlock => ErrorCategory::Connection,
        _ => ErrorCategory::NonRetryable,
    }
}
