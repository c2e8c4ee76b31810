use std::{fmt, io, net::SocketAddr, time::Duration};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::net::{TcpListener, TcpStream};

use crate::{
    Connection, Endpoint,
    error::{self, ErrorCategory, TransportError},
    options::SocketOptions,
};

/// 客户端套接字工厂：把 `endpoint + timeout` 映射为一条已建立的连接。
#[async_trait]
pub trait ClientSocketFactory: Send + Sync + 'static {
    /// 建立连接；`timeout` 同时约束 TCP 建连与（若有）安全握手。
    async fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Connection, TransportError>;

    /// 对建连之后读写阶段出现的 IO 错误做进一步分类。
    ///
    /// 明文连接返回 `None`；TLS 实现可据此把对端发送的告警识别为认证失败。
    fn classify(&self, error: &io::Error) -> Option<ErrorCategory> {
        let _ = error;
        None
    }
}

/// 服务端套接字工厂：把监听地址映射为一个已绑定的监听器。
#[async_trait]
pub trait ServerSocketFactory: Send + Sync + 'static {
    async fn listen(&self, addr: SocketAddr) -> Result<Box<dyn Listener>, TransportError>;
}

/// 已绑定的监听器。监听器被丢弃即关闭监听套接字。
#[async_trait]
pub trait Listener: Send + Sync {
    /// 接受一个入站 TCP 连接；握手等耗时步骤推迟到 [`Accepted::establish`]。
    async fn accept(&self) -> Result<Accepted, TransportError>;

    fn local_addr(&self) -> SocketAddr;
}

/// 已接受但尚未完成建立（例如 TLS 握手）的入站连接。
///
/// 接受循环只负责拿到 TCP 套接字，握手在工作者内完成，
/// 慢速或恶意的对端因此无法阻塞后续连接的接入。
pub struct Accepted {
    peer_addr: SocketAddr,
    establish: BoxFuture<'static, Result<Connection, TransportError>>,
}

impl Accepted {
    pub fn new(
        peer_addr: SocketAddr,
        establish: BoxFuture<'static, Result<Connection, TransportError>>,
    ) -> Self {
        Self {
            peer_addr,
            establish,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub async fn establish(self) -> Result<Connection, TransportError> {
        self.establish.await
    }
}

impl fmt::Debug for Accepted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accepted")
            .field("peer_addr", &self.peer_addr)
            .finish_non_exhaustive()
    }
}

/// 明文 TCP 套接字工厂，同时实现客户端与服务端两侧。
#[derive(Clone, Debug, Default)]
pub struct PlainSocketFactory {
    options: SocketOptions,
}

impl PlainSocketFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: SocketOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SocketOptions {
        &self.options
    }

    /// 打开一条已应用套接字选项的 TCP 连接，不附加超时。
    ///
    /// 供上层（例如 TLS 工厂）把建连与握手放在同一个超时窗口内。
    pub async fn open(&self, endpoint: &Endpoint) -> Result<TcpStream, TransportError> {
        let stream = TcpStream::connect((endpoint.host(), endpoint.port()))
            .await
            .map_err(|err| TransportError::from_io(error::CONNECT, err))?;
        self.options
            .apply(&stream)
            .map_err(|err| TransportError::from_io(error::CONFIGURE, err))?;
        Ok(stream)
    }

    /// 绑定监听地址，返回可直接接受 TCP 连接的监听器。
    pub async fn bind(&self, addr: SocketAddr) -> Result<TcpAcceptor, TransportError> {
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|err| TransportError::from_io(error::BIND, err))?;
        let local_addr = inner
            .local_addr()
            .map_err(|err| TransportError::from_io(error::BIND, err))?;
        Ok(TcpAcceptor {
            inner,
            local_addr,
            options: self.options.clone(),
        })
    }
}

#[async_trait]
impl ClientSocketFactory for PlainSocketFactory {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Connection, TransportError> {
        let stream = tokio::time::timeout(timeout, self.open(endpoint))
            .await
            .map_err(|_| TransportError::timeout(error::CONNECT))??;
        Ok(Connection::new(stream))
    }
}

#[async_trait]
impl ServerSocketFactory for PlainSocketFactory {
    async fn listen(&self, addr: SocketAddr) -> Result<Box<dyn Listener>, TransportError> {
        Ok(Box::new(self.bind(addr).await?))
    }
}

/// 对 Tokio `TcpListener` 的封装：接受连接并应用默认套接字选项。
#[derive(Debug)]
pub struct TcpAcceptor {
    inner: TcpListener,
    local_addr: SocketAddr,
    options: SocketOptions,
}

impl TcpAcceptor {
    /// 接受一个入站 TCP 连接并写入套接字选项。
    pub async fn accept_tcp(&self) -> Result<(TcpStream, SocketAddr), TransportError> {
        let (stream, peer) = self
            .inner
            .accept()
            .await
            .map_err(|err| TransportError::from_io(error::ACCEPT, err))?;
        self.options
            .apply(&stream)
            .map_err(|err| TransportError::from_io(error::CONFIGURE, err))?;
        Ok((stream, peer))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Listener for TcpAcceptor {
    async fn accept(&self) -> Result<Accepted, TransportError> {
        let (stream, peer) = self.accept_tcp().await?;
        Ok(Accepted::new(
            peer,
            Box::pin(async move { Ok(Connection::new(stream)) }),
        ))
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test(flavor = "multi_thread")]
    async fn plain_factory_connects_to_its_own_listener() -> anyhow::Result<()> {
        let factory = PlainSocketFactory::new();
        let listener = factory.listen("127.0.0.1:0".parse()?).await?;
        let endpoint = Endpoint::new("127.0.0.1", listener.local_addr().port());

        let server = tokio::spawn(async move {
            let accepted = listener.accept().await?;
            let mut connection = accepted.establish().await?;
            let (mut reader, mut writer) = connection.split();
            let mut buf = [0u8; 5];
            reader.read_exact(&mut buf).await.map_err(|err| {
                TransportError::from_io(error::ACCEPT, err)
            })?;
            writer
                .write_all(&buf)
                .await
                .map_err(|err| TransportError::from_io(error::ACCEPT, err))?;
            Ok::<_, TransportError>(())
        });

        let mut connection = factory.connect(&endpoint, Duration::from_secs(5)).await?;
        let (mut reader, mut writer) = connection.split();
        writer.write_all(b"hello").await?;
        let mut echoed = [0u8; 5];
        reader.read_exact(&mut echoed).await?;
        assert_eq!(&echoed, b"hello");
        server.await??;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refused_connect_is_a_retryable_connection_error() -> anyhow::Result<()> {
        let port = {
            let unused = std::net::TcpListener::bind("127.0.0.1:0")?;
            unused.local_addr()?.port()
        };
        let error = PlainSocketFactory::new()
            .connect(&Endpoint::new("127.0.0.1", port), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_eq!(error.code(), error::CONNECT.code);
        assert!(error.is_retryable());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn binding_a_taken_port_fails_with_bind_code() -> anyhow::Result<()> {
        let factory = PlainSocketFactory::new();
        let first = factory.bind("127.0.0.1:0".parse()?).await?;
        let error = factory.bind(first.local_addr()).await.unwrap_err();
        assert_eq!(error.code(), error::BIND.code);
        Ok(())
    }
}
