use std::{fmt, time::Duration};

use rustls::{
    SupportedProtocolVersion,
    crypto::CryptoProvider,
    version::{TLS12, TLS13},
};
use serde::{Deserialize, Serialize};
use strand_transport::TransportError;

use crate::error::material_error;

/// 默认握手超时。
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// 唯一启用的 TLS 协议版本。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsProtocol {
    #[default]
    #[serde(rename = "TLSv1.2")]
    Tls12,
    #[serde(rename = "TLSv1.3")]
    Tls13,
}

impl TlsProtocol {
    pub fn version(self) -> &'static SupportedProtocolVersion {
        match self {
            TlsProtocol::Tls12 => &TLS12,
            TlsProtocol::Tls13 => &TLS13,
        }
    }
}

impl fmt::Display for TlsProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsProtocol::Tls12 => f.write_str("TLSv1.2"),
            TlsProtocol::Tls13 => f.write_str("TLSv1.3"),
        }
    }
}

/// 安全上下文参数：协议版本、密码套件白名单与握手超时。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 固定启用单一协议版本，而非协商区间；版本与套件都可配置，不在代码中写死；
/// - 服务端握手在工作者内执行，需要独立的超时，防止半开连接长期占用工作者。
///
/// ## 契约（What）
/// - `cipher_suites` 为空表示接受该版本下提供者支持的全部套件；
///   否则按 `rustls` 套件名（如 `TLS13_AES_128_GCM_SHA256`）匹配，忽略大小写；
/// - 过滤后没有可用套件时，构建安全上下文以安全材料错误失败。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsOptions {
    protocol: TlsProtocol,
    cipher_suites: Vec<String>,
    handshake_timeout: Duration,
}

impl TlsOptions {
    pub fn new() -> Self {
        Self {
            protocol: TlsProtocol::default(),
            cipher_suites: Vec::new(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_protocol(mut self, protocol: TlsProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_cipher_suites<I, S>(mut self, suites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cipher_suites = suites.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn protocol(&self) -> TlsProtocol {
        self.protocol
    }

    pub fn cipher_suites(&self) -> &[String] {
        &self.cipher_suites
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// 基于给定提供者派生出仅包含所选版本与套件的提供者。
    pub(crate) fn restrict(&self, base: &CryptoProvider) -> Result<CryptoProvider, TransportError> {
        let version = self.protocol.version().version;
        let mut provider = base.clone();
        provider.cipher_suites.retain(|suite| {
            suite.version().version == version
                && (self.cipher_suites.is_empty()
                    || self.cipher_suites.iter().any(|name| {
                        name.eq_ignore_ascii_case(&format!("{:?}", suite.suite()))
                    }))
        });
        if provider.cipher_suites.is_empty() {
            return Err(material_error(format!(
                "no cipher suite available for {} (requested: {:?})",
                self.protocol, self.cipher_suites
            )));
        }
        Ok(provider)
    }
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::crypto::aws_lc_rs;

    #[test]
    fn restricts_suites_to_the_selected_protocol() {
        let base = aws_lc_rs::default_provider();
        let provider = TlsOptions::new()
            .with_protocol(TlsProtocol::Tls13)
            .restrict(&base)
            .unwrap();
        assert!(!provider.cipher_suites.is_empty());
        assert!(
            provider
                .cipher_suites
                .iter()
                .all(|suite| suite.version().version == TLS13.version)
        );
    }

    #[test]
    fn honours_an_explicit_suite_list() {
        let base = aws_lc_rs::default_provider();
        let provider = TlsOptions::new()
            .with_protocol(TlsProtocol::Tls13)
            .with_cipher_suites(["tls13_aes_128_gcm_sha256"])
            .restrict(&base)
            .unwrap();
        assert_eq!(provider.cipher_suites.len(), 1);
    }

    #[test]
    fn unknown_suites_leave_nothing_to_negotiate() {
        let base = aws_lc_rs::default_provider();
        let error = TlsOptions::new()
            .with_cipher_suites(["TLS_NULL_WITH_NULL_NULL"])
            .restrict(&base)
            .unwrap_err();
        assert_eq!(
            error.category(),
            strand_transport::ErrorCategory::SecurityMaterial
        );
    }
}
