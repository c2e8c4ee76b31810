#![deny(unsafe_code)]
#![doc = r#"
# strand-client

## 设计动机（Why）
- 调用方只提供“拿到输入流与输出流之后做什么”的处理器，连接管理交给客户端；
- 建连失败与处理器失败严格区分：只有前者（且仅可重试的那部分）会触发重试。

## 核心契约（What）
- [`ClientBuilder`]：端点、建连超时（默认 10 秒）、尝试次数（默认 3 次）、套接字工厂与连接策略；
- [`StreamingClient::exchange`]：运行一次原始字节流交互；
- [`RequestClient::exchange`]：`response = exchange(request)` 的类型化交互；
- [`ClientError`]：`Connect` / `Rejected` / `Exchange` 三类失败，均可通过 `category()` 判定。

## 风险与考量（Trade-offs）
- 长连接策略只持有一条连接，不做连接池；
- 交互开始后不设超时，处理器运行时间由调用方自行控制。
"#]

mod builder;
mod client;
mod error;
mod request;

pub use builder::{ClientBuilder, ClientConfig, DEFAULT_ATTEMPTS, DEFAULT_CONNECT_TIMEOUT};
pub use client::{Discipline, StreamingClient};
pub use error::ClientError;
pub use request::RequestClient;
