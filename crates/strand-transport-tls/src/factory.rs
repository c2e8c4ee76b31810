use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use rustls::{ClientConfig, ServerConfig, server::WebPkiClientVerifier};
use rustls_pki_types::ServerName;
use strand_transport::{
    Accepted, ClientSocketFactory, Connection, Endpoint, ErrorCategory, Listener,
    PlainSocketFactory, ServerSocketFactory, SocketOptions, TcpAcceptor, TransportError,
    error::{CONFIGURATION, HANDSHAKE},
};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, info};

use crate::{
    SecureStream,
    error::{classify_stream_error, map_handshake_error, material_error, material_error_from},
    material::TrustMaterial,
    options::TlsOptions,
};

/// 一次构建完成的安全上下文：客户端配置与（持有身份时的）服务端配置。
#[derive(Debug)]
struct SecurityContext {
    client: Arc<ClientConfig>,
    server: Option<Arc<ServerConfig>>,
}

/// TLS 套接字工厂，同时实现客户端与服务端两侧。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 包装 [`TrustMaterial`]，产出与明文工厂形态一致的 [`Connection`]，上层无需感知加密细节；
/// - 构造时即完成安全上下文的构建，任何证书、私钥或套件问题都在装配阶段以安全材料错误暴露，
///   而不是在第一条连接上才失败。
///
/// ## 逻辑（How）
/// 1. 按 [`TlsOptions`] 裁剪加密提供者，只启用一个协议版本；
/// 2. 信任材料转为根证书库：客户端据此校验服务端，服务端在 `require_peer_auth` 时据此强制校验客户端证书；
/// 3. 身份材料的第一项作为本端证书链与私钥；
/// 4. 安全上下文存放在 [`ArcSwap`] 中，`replace_material` 可原子替换，已建立的连接不受影响。
///
/// ## 契约（What）
/// - `connect` 的超时同时覆盖 TCP 建连与握手；
/// - 服务端握手在工作者内执行，受 [`TlsOptions::handshake_timeout`] 约束；
/// - 没有身份材料时仍可作为客户端使用，但 `listen` 会以安全材料错误失败。
///
/// ## 风险与权衡（Trade-offs）
/// - 仅启用单一协议版本便于与旧对端对齐，但放弃了版本协商带来的前向兼容。
#[derive(Clone, Debug)]
pub struct TlsSocketFactory {
    context: Arc<ArcSwap<SecurityContext>>,
    plain: PlainSocketFactory,
    options: TlsOptions,
}

impl TlsSocketFactory {
    /// 基于信任材料构建工厂。
    pub fn from_material(
        material: &TrustMaterial,
        options: TlsOptions,
    ) -> Result<Self, TransportError> {
        let context = build_context(material, &options)?;
        Ok(Self {
            context: Arc::new(ArcSwap::from_pointee(context)),
            plain: PlainSocketFactory::new(),
            options,
        })
    }

    /// 设置底层 TCP 套接字选项。
    pub fn with_socket_options(mut self, options: SocketOptions) -> Self {
        self.plain = PlainSocketFactory::with_options(options);
        self
    }

    pub fn options(&self) -> &TlsOptions {
        &self.options
    }

    /// 用新的信任材料重建安全上下文，仅影响之后建立的连接。
    pub fn replace_material(&self, material: &TrustMaterial) -> Result<(), TransportError> {
        let context = build_context(material, &self.options)?;
        self.context.store(Arc::new(context));
        info!("tls security context replaced");
        Ok(())
    }
}

fn build_context(
    material: &TrustMaterial,
    options: &TlsOptions,
) -> Result<SecurityContext, TransportError> {
    let provider = Arc::new(options.restrict(material.provider())?);
    let versions = [options.protocol().version()];
    let keys = material.key_material()?;
    let roots = material.trust_material()?.root_store()?;
    let identity = keys
        .identity()
        .map(|(_, entry)| (entry.chain().to_vec(), entry.key().clone_key()));

    let client_builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(&versions)
        .map_err(|err| material_error_from("client protocol selection failed", err))?
        .with_root_certificates(roots.clone());
    let client = match &identity {
        Some((chain, key)) => client_builder
            .with_client_auth_cert(chain.clone(), key.clone_key())
            .map_err(|err| material_error_from("client identity rejected", err))?,
        None => client_builder.with_no_client_auth(),
    };

    let server = match identity {
        Some((chain, key)) => {
            let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
                .with_protocol_versions(&versions)
                .map_err(|err| material_error_from("server protocol selection failed", err))?;
            let builder = if material.require_peer_auth() {
                let verifier =
                    WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                        .build()
                        .map_err(|err| {
                            material_error_from("client certificate verifier rejected", err)
                        })?;
                builder.with_client_cert_verifier(verifier)
            } else {
                builder.with_no_client_auth()
            };
            let config = builder
                .with_single_cert(chain, key)
                .map_err(|err| material_error_from("server identity rejected", err))?;
            Some(Arc::new(config))
        }
        None => None,
    };

    debug!(
        protocol = %options.protocol(),
        require_peer_auth = material.require_peer_auth(),
        server_side = server.is_some(),
        "tls security context built"
    );
    Ok(SecurityContext {
        client: Arc::new(client),
        server,
    })
}

#[async_trait]
impl ClientSocketFactory for TlsSocketFactory {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Connection, TransportError> {
        let server_name = ServerName::try_from(endpoint.host().to_owned()).map_err(|err| {
            TransportError::new(
                CONFIGURATION,
                ErrorCategory::Configuration,
                format_args!("invalid server name `{}`: {err}", endpoint.host()),
            )
        })?;
        let connector = TlsConnector::from(Arc::clone(&self.context.load().client));
        let establish = async {
            let tcp = self.plain.open(endpoint).await?;
            connector
                .connect(server_name, tcp)
                .await
                .map_err(map_handshake_error)
        };
        let stream = tokio::time::timeout(timeout, establish)
            .await
            .map_err(|_| TransportError::timeout(HANDSHAKE))??;
        Ok(Connection::new(SecureStream::new(stream)))
    }

    fn classify(&self, error: &io::Error) -> Option<ErrorCategory> {
        classify_stream_error(error)
    }
}

#[async_trait]
impl ServerSocketFactory for TlsSocketFactory {
    async fn listen(&self, addr: SocketAddr) -> Result<Box<dyn Listener>, TransportError> {
        if self.context.load().server.is_none() {
            return Err(material_error(
                "key material is required to accept tls connections",
            ));
        }
        let tcp = self.plain.bind(addr).await?;
        Ok(Box::new(TlsListener {
            tcp,
            context: Arc::clone(&self.context),
            handshake_timeout: self.options.handshake_timeout(),
        }))
    }
}

/// TLS 监听器：接受 TCP 连接，并把握手封装为延迟执行的建立步骤。
struct TlsListener {
    tcp: TcpAcceptor,
    context: Arc<ArcSwap<SecurityContext>>,
    handshake_timeout: Duration,
}

#[async_trait]
impl Listener for TlsListener {
    async fn accept(&self) -> Result<Accepted, TransportError> {
        let (stream, peer) = self.tcp.accept_tcp().await?;
        let server = self.context.load().server.clone();
        let timeout = self.handshake_timeout;
        Ok(Accepted::new(
            peer,
            Box::pin(async move {
                let server = server.ok_or_else(|| {
                    material_error("key material is required to accept tls connections")
                })?;
                let stream = tokio::time::timeout(timeout, TlsAcceptor::from(server).accept(stream))
                    .await
                    .map_err(|_| TransportError::timeout(HANDSHAKE))?
                    .map_err(map_handshake_error)?;
                Ok(Connection::new(SecureStream::new(stream)))
            }),
        ))
    }

    fn local_addr(&self) -> SocketAddr {
        self.tcp.local_addr()
    }
}
