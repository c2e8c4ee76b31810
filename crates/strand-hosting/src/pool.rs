use std::{
    future::Future,
    net::SocketAddr,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use futures::FutureExt;
use strand_transport::Connection;
use tokio::{runtime::Handle, sync::Semaphore};
use tracing::{debug, error, warn};

use crate::handler::HandlerFactory;

/// 工作者调度器：每条已接受的连接对应一个任务。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 对应“固定大小线程池”与“按需扩张线程池”两种调度方式，但以 Tokio 任务承载；
/// - 固定模式通过信号量限制同时运行的工作者数量，超出的连接排队等待许可。
///
/// ## 契约（What）
/// - `fixed(n)` 要求 `n > 0`，由 [`crate::ServerBuilder`] 校验；
/// - 指定 `runtime` 时任务在该运行时上执行，否则使用当前上下文的运行时。
///
/// ## 风险与权衡（Trade-offs）
/// - 排队中的连接已经完成 TCP 接入并占用文件描述符；排队没有上限。
#[derive(Clone, Debug, Default)]
pub struct WorkerPool {
    limit: Option<Arc<Semaphore>>,
    workers: Option<usize>,
    runtime: Option<Handle>,
}

impl WorkerPool {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn fixed(workers: usize) -> Self {
        Self {
            limit: Some(Arc::new(Semaphore::new(workers))),
            workers: Some(workers),
            runtime: None,
        }
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// 固定模式下的工作者上限。
    pub fn capacity(&self) -> Option<usize> {
        self.workers
    }

    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let limit = self.limit.clone();
        let guarded = async move {
            let _permit = match limit {
                Some(limit) => match limit.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                None => None,
            };
            task.await;
        };
        self.spawn_detached(guarded);
    }

    /// 不占用工作者许可地派生任务，用于接受循环本身。
    pub(crate) fn spawn_detached<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match &self.runtime {
            Some(runtime) => {
                runtime.spawn(task);
            }
            None => {
                tokio::spawn(task);
            }
        }
    }
}

/// 活跃连接计数的守卫，随工作者任务一起释放。
pub(crate) struct ActiveGuard {
    active: Arc<AtomicUsize>,
}

impl ActiveGuard {
    pub(crate) fn new(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::AcqRel);
        Self {
            active: Arc::clone(active),
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// 单条连接的工作者：为连接创建处理器并运行，退出时总会关闭连接。
///
/// 处理器的创建与运行都在 panic 捕获范围内，工厂的 panic 与处理器的 panic 同样只记录日志。
pub(crate) struct Worker {
    connection: Connection,
    handlers: Arc<dyn HandlerFactory>,
    peer: SocketAddr,
}

impl Worker {
    pub(crate) fn new(
        connection: Connection,
        handlers: Arc<dyn HandlerFactory>,
        peer: SocketAddr,
    ) -> Self {
        Self {
            connection,
            handlers,
            peer,
        }
    }

    pub(crate) async fn run(mut self) {
        let handlers = &self.handlers;
        let outcome = {
            let (mut input, mut output) = self.connection.split();
            AssertUnwindSafe(async {
                let mut handler = handlers.create();
                handler.handle(&mut input, &mut output).await
            })
            .catch_unwind()
            .await
        };
        match outcome {
            Ok(Ok(())) => debug!(peer = %self.peer, "connection handled"),
            Ok(Err(err)) => warn!(
                peer = %self.peer,
                kind = ?err.kind(),
                error = %err,
                "handler failed; closing connection"
            ),
            Err(_) => error!(peer = %self.peer, "handler panicked; closing connection"),
        }
        self.connection.close().await;
    }
}
