use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// 服务端每条连接的原始字节流处理器。
///
/// 处理器拿到连接的输入、输出两端，返回后连接由工作者负责关闭；
/// 返回的 `io::Error` 只会被记录，不会影响其他连接。
#[async_trait]
pub trait StreamHandler: Send {
    async fn handle(
        &mut self,
        input: &mut (dyn AsyncRead + Send + Unpin),
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> io::Result<()>;
}

#[async_trait]
impl StreamHandler for Box<dyn StreamHandler> {
    async fn handle(
        &mut self,
        input: &mut (dyn AsyncRead + Send + Unpin),
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> io::Result<()> {
        (**self).handle(input, output).await
    }
}

/// 客户端一次交互的处理器，产出交互结果。
#[async_trait]
pub trait ExchangeHandler: Send {
    type Output: Send;

    async fn exchange(
        &mut self,
        input: &mut (dyn AsyncRead + Send + Unpin),
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> io::Result<Self::Output>;
}
