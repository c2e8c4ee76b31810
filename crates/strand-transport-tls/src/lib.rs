#![deny(unsafe_code)]
#![doc = r#"
# strand-transport-tls

## 设计动机（Why）
- **信任材料抽象**：[`TrustMaterial`] 把密钥库文件或 PEM 文件统一为“身份材料库 + 信任材料库”，
  首次使用时加载并缓存；
- **安全入口**：[`TlsSocketFactory`] 实现与明文工厂相同的两个单方法 trait，开启 TLS 只需替换工厂；
- **可判定的失败**：材料问题映射为 `SecurityMaterial`，握手被拒映射为 `Authentication`，
  与普通网络错误区分开。

## 核心契约（What）
- [`TrustMaterial::key_material`] / [`TrustMaterial::trust_material`]：幂等、缓存的材料库；
- [`TlsOptions`]：唯一启用的协议版本、可选的套件白名单与握手超时；
- [`TransportConfig`]：可从 TOML 加载的安全传输配置。

## 实现策略（How）
- 使用 `rustls` + `tokio-rustls`（`aws-lc-rs` 加密提供者）完成握手与加解密；
- PKCS#12 由 `p12-keystore` 解析，PEM 由 `rustls-pki-types` 解析；
- 安全上下文保存在 `ArcSwap` 中，支持在不中断现有连接的情况下替换材料。

## 风险与考量（Trade-offs）
- 单一协议版本是兼容性选择而非安全最佳实践，默认 `TLSv1.2`，可改为 `TLSv1.3`；
- 服务端要求客户端证书时，`TLSv1.2` 会在握手阶段拒绝不受信任的客户端；
  `TLSv1.3` 的客户端在服务端校验证书之前就已完成握手，拒绝告警要到首次读取才出现。
  [`TlsSocketFactory`] 的 `classify` 能识别这类告警，`strand-client` 会在处理器失败后读出遗留告警再分类；
- 存活探测穿过记录层进行，对端的 `close_notify` 会使连接被判定为已关闭，探测读到的明文保留给下一次读取。
"#]

mod config;
mod error;
mod factory;
mod keystore;
mod material;
mod options;
mod pem;
mod stream;
#[cfg(feature = "test-util")]
pub mod testing;

pub use config::TransportConfig;
pub use factory::TlsSocketFactory;
pub use material::{
    DEFAULT_STORE_TYPE, KeyEntry, KeyStore, KeyStoreOptions, MaterialSource, PemFiles,
    TrustMaterial, TrustStore,
};
pub use options::{DEFAULT_HANDSHAKE_TIMEOUT, TlsOptions, TlsProtocol};
pub use stream::SecureStream;
