#![deny(unsafe_code)]
#![doc = r#"
# strand-hosting

## 设计动机（Why）
- 把“绑定端口 → 接受连接 → 派发工作者 → 关闭”这一套服务端骨架与业务处理器解耦；
- 明文与 TLS 服务端共用同一条生命周期，差别只在构建时注入的套接字工厂。

## 核心契约（What）
- [`ServerBuilder`]：校验参数并构建 [`StreamingServer`]，支持原始字节流处理器与请求/响应两种形态；
- [`StreamingServer`]：`start(blocking)` / `stop()`，`stop` 幂等且关闭钩子各执行一次；
- [`WorkerPool`]：固定大小或按需扩张的工作者调度；
- [`ShutdownHook`]：失败与 panic 都被隔离的关闭钩子。

## 风险与考量（Trade-offs）
- 线程被 Tokio 任务取代：接受循环是一个任务，每条连接是一个任务；
- `stop` 不中断在途连接，需要排空时可借助关闭钩子协调。
"#]

mod builder;
mod error;
mod handler;
mod hook;
mod pool;
mod server;

pub use builder::{ServerBuilder, ServerConfig};
pub use error::ServerError;
pub use handler::{HandlerFactory, RequestConnectionHandler, RequestHandler, RequestHandlerFactory};
pub use hook::ShutdownHook;
pub use pool::WorkerPool;
pub use server::{ServerState, StreamingServer};
