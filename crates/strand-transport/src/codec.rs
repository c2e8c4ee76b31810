use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// 服务端编解码契约：从输入流解码一个请求，把一个响应编码到输出流。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把“线上格式”与连接生命周期解耦：同一个编解码器既可挂在明文服务端上，也可挂在 TLS 服务端上；
/// - 每条连接获得一个独立实例（由工厂产出），编解码器可以持有按连接划分的状态。
///
/// ## 契约（What）
/// - `decode` 在读到完整请求后返回，不得读取超过一个请求的数据；
/// - `encode` 写完响应后无需 `flush`，外层适配器会统一刷新输出流；
/// - 返回的 `io::Error` 视为处理器错误：服务端记录日志并关闭该连接。
#[async_trait]
pub trait ServerCoder: Send {
    type Request: Send;
    type Response: Send + Sync;

    async fn decode(&mut self, input: &mut (dyn AsyncRead + Send + Unpin))
    -> io::Result<Self::Request>;

    async fn encode(
        &mut self,
        response: &Self::Response,
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> io::Result<()>;
}

/// 客户端编解码契约：编码一个请求，解码一个响应。
#[async_trait]
pub trait ClientCoder: Send {
    type Request: Send + Sync;
    type Response: Send;

    async fn encode(
        &mut self,
        request: &Self::Request,
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> io::Result<()>;

    async fn decode(
        &mut self,
        input: &mut (dyn AsyncRead + Send + Unpin),
    ) -> io::Result<Self::Response>;
}
