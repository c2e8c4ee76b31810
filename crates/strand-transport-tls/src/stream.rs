use std::{
    io::{self, IoSlice},
    pin::Pin,
    task::{Context, Poll},
};

use strand_transport::ByteStream;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};
use tokio_rustls::TlsStream;

/// 存活探测单次最多解密的明文字节数。
const LIVENESS_CHUNK: usize = 512;

/// 完成握手后的加密字节流，客户端与服务端两侧共用。
///
/// 存活探测必须穿过记录层：对端发出的 `close_notify` 在套接字上表现为可读的密文，
/// 只看套接字会把已关闭的连接误判为存活。探测中解密出的明文暂存在 `buffered`，
/// 下一次读取优先返回。
#[derive(Debug)]
pub struct SecureStream {
    inner: TlsStream<TcpStream>,
    buffered: Vec<u8>,
}

impl SecureStream {
    pub(crate) fn new(inner: impl Into<TlsStream<TcpStream>>) -> Self {
        Self {
            inner: inner.into(),
            buffered: Vec::new(),
        }
    }
}

impl ByteStream for SecureStream {
    fn socket(&self) -> &TcpStream {
        self.inner.get_ref().0
    }

    fn poll_alive(&mut self, cx: &mut Context<'_>) -> bool {
        if !self.buffered.is_empty() {
            return true;
        }
        let mut scratch = [0u8; LIVENESS_CHUNK];
        let mut buf = ReadBuf::new(&mut scratch);
        match Pin::new(&mut self.inner).poll_read(cx, &mut buf) {
            Poll::Pending => true,
            Poll::Ready(Ok(())) if buf.filled().is_empty() => false,
            Poll::Ready(Ok(())) => {
                self.buffered.extend_from_slice(buf.filled());
                true
            }
            Poll::Ready(Err(_)) => false,
        }
    }
}

impl AsyncRead for SecureStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.buffered.is_empty() {
            let len = this.buffered.len().min(buf.remaining());
            buf.put_slice(&this.buffered[..len]);
            this.buffered.drain(..len);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for SecureStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
