use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use strand_transport::{ErrorCategory, TransportError, error::CONFIGURATION};

use crate::{
    TlsSocketFactory,
    material::{KeyStoreOptions, MaterialSource, PemFiles, TrustMaterial},
    options::{DEFAULT_HANDSHAKE_TIMEOUT, TlsOptions, TlsProtocol},
};

/// 安全传输配置，可从 TOML 加载。
///
/// ```toml
/// require_peer_auth = true
/// protocol = "TLSv1.2"
///
/// [key_store]
/// path = "server.p12"
/// pass = "changeit"
///
/// [trust_store]
/// path = "trust.p12"
/// pass = "changeit"
/// ```
///
/// 也可以用 `[pem]` 段（`key` / `chain` / `trusted`）代替两个密钥库段，两者只能择一。
/// 相对路径以配置文件所在目录为基准解析。
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    #[serde(default)]
    pub key_store: Option<KeyStoreOptions>,
    #[serde(default)]
    pub trust_store: Option<KeyStoreOptions>,
    #[serde(default)]
    pub pem: Option<PemFiles>,
    #[serde(default = "default_require_peer_auth", alias = "client_auth")]
    pub require_peer_auth: bool,
    #[serde(default)]
    pub protocol: TlsProtocol,
    #[serde(default)]
    pub cipher_suites: Vec<String>,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

fn default_require_peer_auth() -> bool {
    true
}

fn default_handshake_timeout_ms() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64
}

impl TransportConfig {
    /// 以 PEM 来源构造配置，其余字段取默认值。
    pub fn pem(files: PemFiles) -> Self {
        Self {
            key_store: None,
            trust_store: None,
            pem: Some(files),
            require_peer_auth: default_require_peer_auth(),
            protocol: TlsProtocol::default(),
            cipher_suites: Vec::new(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, TransportError> {
        toml::from_str(raw).map_err(|err| config_error(err.message()))
    }

    /// 读取配置文件，并把相对路径解析到文件所在目录。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|err| config_error(format_args!("cannot read {}: {err}", path.display())))?;
        let mut config = Self::from_toml_str(&raw)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        Ok(config)
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        if let Some(options) = self.key_store.as_mut() {
            resolve(&mut options.path);
        }
        if let Some(options) = self.trust_store.as_mut() {
            resolve(&mut options.path);
        }
        if let Some(files) = self.pem.as_mut() {
            resolve(&mut files.key);
            resolve(&mut files.chain);
            resolve(&mut files.trusted);
        }
    }

    /// 校验来源组合：PEM 与密钥库二选一，密钥库需成对出现。
    pub fn source(&self) -> Result<MaterialSource, TransportError> {
        match (&self.pem, &self.key_store, &self.trust_store) {
            (Some(files), None, None) => Ok(MaterialSource::Pem(files.clone())),
            (None, Some(key_store), Some(trust_store)) => Ok(MaterialSource::KeyStore {
                key_store: key_store.clone(),
                trust_store: trust_store.clone(),
            }),
            (Some(_), _, _) => Err(config_error(
                "`pem` cannot be combined with `key_store`/`trust_store`",
            )),
            _ => Err(config_error(
                "either `pem` or both `key_store` and `trust_store` must be configured",
            )),
        }
    }

    pub fn material(&self) -> Result<TrustMaterial, TransportError> {
        Ok(TrustMaterial::new(self.source()?, self.require_peer_auth))
    }

    pub fn tls_options(&self) -> TlsOptions {
        TlsOptions::new()
            .with_protocol(self.protocol)
            .with_cipher_suites(self.cipher_suites.iter().cloned())
            .with_handshake_timeout(Duration::from_millis(self.handshake_timeout_ms))
    }

    /// 加载材料并构建 TLS 套接字工厂。
    pub fn socket_factory(&self) -> Result<TlsSocketFactory, TransportError> {
        TlsSocketFactory::from_material(&self.material()?, self.tls_options())
    }
}

fn config_error(detail: impl std::fmt::Display) -> TransportError {
    TransportError::new(CONFIGURATION, ErrorCategory::Configuration, detail)
}
