use std::io;

use async_trait::async_trait;
use strand_transport::{ClientCoder, ExchangeHandler};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::{client::StreamingClient, error::ClientError};

/// 类型化的请求/响应客户端：`response = exchange(request)`。
///
/// 在一次交互内先把请求编码到输出流并刷新，再从输入流解码响应；
/// 连接策略沿用内部 [`StreamingClient`] 的设置。
#[derive(Debug)]
pub struct RequestClient<C> {
    client: StreamingClient,
    coder: C,
}

impl<C> RequestClient<C>
where
    C: ClientCoder,
{
    pub fn new(client: StreamingClient, coder: C) -> Self {
        Self { client, coder }
    }

    pub async fn exchange(&mut self, request: &C::Request) -> Result<C::Response, ClientError> {
        self.client
            .exchange(CodecExchange {
                coder: &mut self.coder,
                request,
            })
            .await
    }

    pub fn client(&self) -> &StreamingClient {
        &self.client
    }

    /// 关闭持有的长连接。
    pub async fn close(&mut self) {
        self.client.close().await;
    }

    pub fn into_inner(self) -> (StreamingClient, C) {
        (self.client, self.coder)
    }
}

struct CodecExchange<'a, C: ClientCoder> {
    coder: &'a mut C,
    request: &'a C::Request,
}

#[async_trait]
impl<'a, C> ExchangeHandler for CodecExchange<'a, C>
where
    C: ClientCoder,
{
    type Output = C::Response;

    async fn exchange(
        &mut self,
        input: &mut (dyn AsyncRead + Send + Unpin),
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> io::Result<C::Response> {
        self.coder.encode(self.request, output).await?;
        output.flush().await?;
        self.coder.decode(input).await
    }
}
