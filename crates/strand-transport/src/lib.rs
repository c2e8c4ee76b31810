#![deny(unsafe_code)]
#![doc = r#"
# strand-transport

## 设计动机（Why）
- **统一连接形态**：明文与 TLS 连接都以 [`Connection`] 交给上层，客户端与服务端只面对“输入流 + 输出流”；
- **单方法工厂**：[`ClientSocketFactory::connect`] 与 [`ServerSocketFactory::listen`] 是仅有的两个扩展点，
  安全传输只需实现这两个方法即可替换默认的 [`PlainSocketFactory`]；
- **可判定的错误**：[`TransportError`] 携带稳定错误码与 [`ErrorCategory`]，重试策略据此区分“网络故障”与“不受信任”。

## 核心契约（What）
- [`Endpoint`]：不可变的 `host:port`；
- [`StreamHandler`] / [`ExchangeHandler`]：服务端连接处理器与客户端交互处理器；
- [`ServerCoder`] / [`ClientCoder`]：请求/响应编解码契约，由具体协议 crate 实现。

## 风险与考量（Trade-offs）
- 接受循环只拿 TCP 套接字，握手延后到工作者内执行，避免慢速对端阻塞接入；
- 存活探测基于 `peek`，无法发现静默断开的对端。
"#]

pub mod codec;
mod connection;
mod endpoint;
pub mod error;
mod factory;
mod handler;
mod options;

pub use codec::{ClientCoder, ServerCoder};
pub use connection::{ByteStream, Connection};
pub use endpoint::{Endpoint, EndpointParseError};
pub use error::{ErrorCategory, OperationKind, TransportError};
pub use factory::{
    Accepted, ClientSocketFactory, Listener, PlainSocketFactory, ServerSocketFactory, TcpAcceptor,
};
pub use handler::{ExchangeHandler, StreamHandler};
pub use options::SocketOptions;
