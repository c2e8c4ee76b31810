use std::{io, marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use strand_transport::{ServerCoder, StreamHandler};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// 每条连接产出一个处理器实例的工厂。
///
/// 工厂在工作者内被调用，处理器因此可以持有按连接划分的状态；
/// 无状态场景直接传入一个返回处理器的闭包即可。
pub trait HandlerFactory: Send + Sync + 'static {
    fn create(&self) -> Box<dyn StreamHandler>;
}

impl<F, H> HandlerFactory for F
where
    F: Fn() -> H + Send + Sync + 'static,
    H: StreamHandler + 'static,
{
    fn create(&self) -> Box<dyn StreamHandler> {
        Box::new(self())
    }
}

/// 请求处理器：`response = handle(request)`。
///
/// 同步闭包 `Fn(Req) -> io::Result<Resp>` 自动实现该 trait。
#[async_trait]
pub trait RequestHandler<Req, Resp>: Send + Sync + 'static
where
    Req: Send + 'static,
{
    async fn handle(&self, request: Req) -> io::Result<Resp>;
}

#[async_trait]
impl<F, Req, Resp> RequestHandler<Req, Resp> for F
where
    F: Fn(Req) -> io::Result<Resp> + Send + Sync + 'static,
    Req: Send + 'static,
{
    async fn handle(&self, request: Req) -> io::Result<Resp> {
        self(request)
    }
}

/// 把“解码 → 处理 → 编码”适配为字节流处理器，每条连接只处理一个请求。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 让业务只关心类型化的请求与响应，连接的读写与刷新由适配器统一完成。
///
/// ## 逻辑（How）
/// 1. 编解码器从输入流解码一个请求；
/// 2. 请求处理器产出响应；
/// 3. 编解码器把响应写入输出流，适配器随后 `flush`。
///
/// ## 契约（What）
/// - 任一步失败都以 `io::Error` 返回，由工作者记录日志并关闭连接；
/// - 一次调用恰好一个请求、一个响应，不做流水线。
pub struct RequestConnectionHandler<C, H> {
    coder: C,
    handler: Arc<H>,
}

impl<C, H> RequestConnectionHandler<C, H> {
    pub fn new(coder: C, handler: Arc<H>) -> Self {
        Self { coder, handler }
    }
}

#[async_trait]
impl<C, H> StreamHandler for RequestConnectionHandler<C, H>
where
    C: ServerCoder,
    C::Request: 'static,
    H: RequestHandler<C::Request, C::Response>,
{
    async fn handle(
        &mut self,
        input: &mut (dyn AsyncRead + Send + Unpin),
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> io::Result<()> {
        let request = self.coder.decode(input).await?;
        let response = self.handler.handle(request).await?;
        self.coder.encode(&response, output).await?;
        output.flush().await
    }
}

/// 请求/响应服务端的处理器工厂：编解码器工厂加一个共享的请求处理器。
pub struct RequestHandlerFactory<F, H, C> {
    coders: F,
    handler: Arc<H>,
    _coder: PhantomData<fn() -> C>,
}

impl<F, H, C> RequestHandlerFactory<F, H, C>
where
    F: Fn() -> C,
{
    pub fn new(coders: F, handler: H) -> Self {
        Self {
            coders,
            handler: Arc::new(handler),
            _coder: PhantomData,
        }
    }
}

impl<F, H, C> HandlerFactory for RequestHandlerFactory<F, H, C>
where
    F: Fn() -> C + Send + Sync + 'static,
    C: ServerCoder + 'static,
    C::Request: 'static,
    H: RequestHandler<C::Request, C::Response>,
{
    fn create(&self) -> Box<dyn StreamHandler> {
        Box::new(RequestConnectionHandler::new(
            (self.coders)(),
            Arc::clone(&self.handler),
        ))
    }
}
