use std::{
    fmt, io,
    net::SocketAddr,
    task::{Context, Poll, Waker},
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf},
    net::TcpStream,
};
use tracing::debug;

/// 一条已建立连接的字节流，明文或加密均可。
///
/// 实现者需暴露底层 `TcpStream`，地址信息由此读取。
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    fn socket(&self) -> &TcpStream;

    /// 非阻塞地探测对端是否仍在，供 [`Connection::is_alive`] 使用。
    ///
    /// 默认实现对套接字做一次 `peek`，不消费任何字节。带有记录层的实现（例如 TLS）
    /// 需要穿过记录层判断：对端的关闭通知本身就是一段尚未读取的密文。
    /// 探测中读到的应用数据必须保留给后续的读取。
    fn poll_alive(&mut self, cx: &mut Context<'_>) -> bool {
        let mut peeked = [0u8; 1];
        let mut buf = ReadBuf::new(&mut peeked);
        match self.socket().poll_peek(cx, &mut buf) {
            Poll::Pending => true,
            Poll::Ready(Ok(0)) => false,
            Poll::Ready(Ok(_)) => true,
            Poll::Ready(Err(_)) => false,
        }
    }
}

impl ByteStream for TcpStream {
    fn socket(&self) -> &TcpStream {
        self
    }
}

/// 单条双向连接，拥有底层字节流的全部所有权。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 统一明文与 TLS 连接的形态，让客户端与服务端工作者只面对“可读一端 + 可写一端”；
/// - 连接对象被丢弃即关闭套接字，任何退出路径都不会泄漏文件描述符。
///
/// ## 逻辑（How）
/// - `split` 借助 `tokio::io::split` 在同一条流上同时得到读、写两半，借用结束后自动合并；
/// - `close` 先尝试优雅关闭写方向（TLS 会发送 `close_notify`），再释放套接字；
/// - `is_alive` 使用空唤醒器调用 [`ByteStream::poll_alive`]，明文连接对套接字做一次 `peek`。
///
/// ## 契约（What）
/// - `peer_addr`/`local_addr` 在构造时读取并缓存，连接关闭后依然可用；
/// - `is_alive` 返回 `false` 表示对端已关闭或连接已出错；探测读到的应用数据不会丢失。
///
/// ## 风险与权衡（Trade-offs）
/// - 探测只能发现已到达的 FIN/RST；对端静默消失时仍会被判为存活，首次读写才会暴露错误。
pub struct Connection {
    stream: Box<dyn ByteStream>,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
}

impl Connection {
    pub fn new(stream: impl ByteStream) -> Self {
        let peer_addr = stream.socket().peer_addr().ok();
        let local_addr = stream.socket().local_addr().ok();
        Self {
            stream: Box::new(stream),
            peer_addr,
            local_addr,
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// 拆分为读、写两半，供处理器在一次调用内同时使用。
    pub fn split(
        &mut self,
    ) -> (
        ReadHalf<&mut (dyn ByteStream + 'static)>,
        WriteHalf<&mut (dyn ByteStream + 'static)>,
    ) {
        tokio::io::split(self.stream.as_mut())
    }

    /// 非阻塞地判断连接是否仍可复用。
    pub fn is_alive(&mut self) -> bool {
        let mut cx = Context::from_waker(Waker::noop());
        self.stream.poll_alive(&mut cx)
    }

    /// 在 `wait` 时限内读尽对端已发出的数据，返回读取中暴露的错误。
    ///
    /// 用于处理器因对端关闭而失败之后：对端在关闭前可能留下了说明原因的协议报文
    /// （例如 TLS 告警），直接写入只会得到 `BrokenPipe`。读到的应用数据被丢弃。
    pub async fn pending_error(&mut self, wait: Duration) -> Option<io::Error> {
        let mut scratch = [0u8; 1024];
        let drain = async {
            loop {
                match self.stream.read(&mut scratch).await {
                    Ok(0) => return None,
                    Ok(_) => continue,
                    Err(error) => return Some(error),
                }
            }
        };
        tokio::time::timeout(wait, drain).await.ok().flatten()
    }

    /// 优雅关闭写方向后释放连接；关闭失败仅记录日志。
    pub async fn close(mut self) {
        if let Err(error) = self.stream.shutdown().await {
            debug!(peer = ?self.peer_addr, %error, "connection shutdown was not clean");
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}
