use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use rustls::{
    RootCertStore,
    crypto::{CryptoProvider, aws_lc_rs},
};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use serde::{Deserialize, Serialize};
use strand_transport::TransportError;
use tracing::debug;

use crate::{error, keystore, pem};

/// 默认的密钥库类型。
pub const DEFAULT_STORE_TYPE: &str = "PKCS12";

/// 密钥库文件的位置、口令与类型。
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyStoreOptions {
    pub path: PathBuf,
    #[serde(default, alias = "pass")]
    pub passphrase: String,
    #[serde(default = "default_store_type", alias = "type")]
    pub store_type: String,
}

fn default_store_type() -> String {
    DEFAULT_STORE_TYPE.to_owned()
}

impl KeyStoreOptions {
    /// 使用默认类型（`PKCS12`）描述一个密钥库文件。
    pub fn new(path: impl Into<PathBuf>, passphrase: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            passphrase: passphrase.into(),
            store_type: default_store_type(),
        }
    }

    pub fn with_store_type(mut self, store_type: impl Into<String>) -> Self {
        self.store_type = store_type.into();
        self
    }
}

impl fmt::Debug for KeyStoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStoreOptions")
            .field("path", &self.path)
            .field("passphrase", &"<redacted>")
            .field("store_type", &self.store_type)
            .finish()
    }
}

/// PEM 文件三件套：私钥、证书链与受信任证书。
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PemFiles {
    pub key: PathBuf,
    pub chain: PathBuf,
    pub trusted: PathBuf,
}

impl PemFiles {
    pub fn new(
        key: impl Into<PathBuf>,
        chain: impl Into<PathBuf>,
        trusted: impl Into<PathBuf>,
    ) -> Self {
        Self {
            key: key.into(),
            chain: chain.into(),
            trusted: trusted.into(),
        }
    }
}

/// 信任材料的来源。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MaterialSource {
    /// 从密钥库文件分别加载身份与信任锚。
    KeyStore {
        key_store: KeyStoreOptions,
        trust_store: KeyStoreOptions,
    },
    /// 从 PEM 文件构建内存中的密钥库与信任库。
    Pem(PemFiles),
}

/// 身份条目：私钥及其证书链（叶证书在前）。
#[derive(Debug)]
pub struct KeyEntry {
    key: PrivateKeyDer<'static>,
    chain: Vec<CertificateDer<'static>>,
}

impl KeyEntry {
    pub(crate) fn new(key: PrivateKeyDer<'static>, chain: Vec<CertificateDer<'static>>) -> Self {
        Self { key, chain }
    }

    pub fn key(&self) -> &PrivateKeyDer<'static> {
        &self.key
    }

    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }
}

/// 身份材料库：别名 → 私钥 + 证书链。
#[derive(Debug, Default)]
pub struct KeyStore {
    entries: BTreeMap<String, KeyEntry>,
}

impl KeyStore {
    pub(crate) fn insert(&mut self, alias: String, entry: KeyEntry) {
        self.entries.insert(alias, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, alias: &str) -> Option<&KeyEntry> {
        self.entries.get(alias)
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// 用于 TLS 的身份：按别名排序后的第一项。
    pub fn identity(&self) -> Option<(&str, &KeyEntry)> {
        self.entries
            .iter()
            .next()
            .map(|(alias, entry)| (alias.as_str(), entry))
    }
}

/// 信任材料库：别名 → 受信任证书。
#[derive(Debug, Default, Clone)]
pub struct TrustStore {
    entries: BTreeMap<String, CertificateDer<'static>>,
}

impl TrustStore {
    pub(crate) fn insert(&mut self, alias: String, certificate: CertificateDer<'static>) {
        self.entries.insert(alias, certificate);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, alias: &str) -> Option<&CertificateDer<'static>> {
        self.entries.get(alias)
    }

    pub fn certificates(&self) -> impl Iterator<Item = &CertificateDer<'static>> {
        self.entries.values()
    }

    /// 转换为 `rustls` 的根证书库；任何一张证书无法作为信任锚都会失败。
    pub fn root_store(&self) -> Result<RootCertStore, TransportError> {
        let mut roots = RootCertStore::empty();
        for (alias, certificate) in &self.entries {
            roots.add(certificate.clone()).map_err(|err| {
                error::material_error_from(format!("trusted certificate `{alias}` rejected"), err)
            })?;
        }
        Ok(roots)
    }
}

/// 信任材料提供者。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把“密钥库文件”与“PEM 文件”两种来源统一成同一对产物：身份材料库与信任材料库；
/// - 材料只加载一次，之后以 `Arc` 只读共享给所有连接。
///
/// ## 逻辑（How）
/// - `key_material`/`trust_material` 首次调用时读取并解析文件，成功结果写入 `OnceLock`；
/// - 失败不会缓存：返回安全材料错误，不产出半成品。
///
/// ## 契约（What）
/// - **前置条件**：应在单线程装配阶段首次调用（通常由 `TlsSocketFactory::from_material` 触发）；
///   并发的首次调用各自加载，只有一份结果会被保留；
/// - **后置条件**：已缓存的材料库永不修改，更换材料需要构造新的提供者。
///
/// ## 风险与权衡（Trade-offs）
/// - PEM 条目使用加密安全随机数生成的十六进制别名，别名本身没有业务含义。
pub struct TrustMaterial {
    source: MaterialSource,
    require_peer_auth: bool,
    provider: Arc<CryptoProvider>,
    key_store: OnceLock<Arc<KeyStore>>,
    trust_store: OnceLock<Arc<TrustStore>>,
}

impl TrustMaterial {
    pub fn new(source: MaterialSource, require_peer_auth: bool) -> Self {
        Self {
            source,
            require_peer_auth,
            provider: Arc::new(aws_lc_rs::default_provider()),
            key_store: OnceLock::new(),
            trust_store: OnceLock::new(),
        }
    }

    /// 密钥库文件策略。
    pub fn key_store(
        key_store: KeyStoreOptions,
        trust_store: KeyStoreOptions,
        require_peer_auth: bool,
    ) -> Self {
        Self::new(
            MaterialSource::KeyStore {
                key_store,
                trust_store,
            },
            require_peer_auth,
        )
    }

    /// PEM 文件策略。
    pub fn pem(
        key: impl AsRef<Path>,
        chain: impl AsRef<Path>,
        trusted: impl AsRef<Path>,
        require_peer_auth: bool,
    ) -> Self {
        Self::new(
            MaterialSource::Pem(PemFiles::new(
                key.as_ref(),
                chain.as_ref(),
                trusted.as_ref(),
            )),
            require_peer_auth,
        )
    }

    /// 替换用于校验私钥与生成别名的加密提供者。
    pub fn with_provider(mut self, provider: Arc<CryptoProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn source(&self) -> &MaterialSource {
        &self.source
    }

    pub fn require_peer_auth(&self) -> bool {
        self.require_peer_auth
    }

    pub fn provider(&self) -> &Arc<CryptoProvider> {
        &self.provider
    }

    /// 返回身份材料库，首次调用时加载。
    pub fn key_material(&self) -> Result<Arc<KeyStore>, TransportError> {
        if let Some(store) = self.key_store.get() {
            return Ok(Arc::clone(store));
        }
        let loaded = match &self.source {
            MaterialSource::KeyStore { key_store, .. } => {
                keystore::load_key_store(key_store, &self.provider)?
            }
            MaterialSource::Pem(files) => {
                pem::load_key_store(&files.key, &files.chain, &self.provider)?
            }
        };
        debug!(entries = loaded.len(), "key material loaded");
        let loaded = Arc::new(loaded);
        Ok(Arc::clone(self.key_store.get_or_init(|| loaded)))
    }

    /// 返回信任材料库，首次调用时加载。
    pub fn trust_material(&self) -> Result<Arc<TrustStore>, TransportError> {
        if let Some(store) = self.trust_store.get() {
            return Ok(Arc::clone(store));
        }
        let loaded = match &self.source {
            MaterialSource::KeyStore { trust_store, .. } => {
                keystore::load_trust_store(trust_store)?
            }
            MaterialSource::Pem(files) => pem::load_trust_store(&files.trusted, &self.provider)?,
        };
        debug!(entries = loaded.len(), "trust material loaded");
        let loaded = Arc::new(loaded);
        Ok(Arc::clone(self.trust_store.get_or_init(|| loaded)))
    }
}

impl fmt::Debug for TrustMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustMaterial")
            .field("source", &self.source)
            .field("require_peer_auth", &self.require_peer_auth)
            .field("key_store_loaded", &self.key_store.get().is_some())
            .field("trust_store_loaded", &self.trust_store.get().is_some())
            .finish()
    }
}

/// 以加密安全随机数生成十六进制别名。
pub(crate) fn random_alias(provider: &CryptoProvider) -> Result<String, TransportError> {
    let mut bytes = [0u8; 16];
    provider
        .secure_random
        .fill(&mut bytes)
        .map_err(|_| error::material_error("secure random source unavailable"))?;
    Ok(hex::encode(bytes))
}
