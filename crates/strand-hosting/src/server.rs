use std::{
    fmt, mem,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use strand_transport::{Accepted, Listener, ServerSocketFactory};
use tokio::sync::watch;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    error::ServerError,
    handler::HandlerFactory,
    hook::ShutdownHook,
    pool::{ActiveGuard, Worker, WorkerPool},
};

/// 接受失败后的退避间隔，避免文件描述符耗尽时空转。
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// 对外可见的服务端状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    Unbound,
    Listening,
    Stopped,
}

#[derive(Debug)]
enum Lifecycle {
    Unbound,
    /// `start` 正在创建监听套接字。
    Binding,
    Listening(SocketAddr),
    Stopped(Option<SocketAddr>),
}

/// 流式服务端。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 每条连接交给一个工作者执行处理器，单个客户端的失败不会波及服务端与其他连接；
/// - 生命周期单向推进：`Unbound → Listening → Stopped`，停止后不可重启。
///
/// ## 逻辑（How）
/// 1. `start` 通过套接字工厂绑定监听地址，随后在当前任务内（阻塞模式）或一个独立任务内运行接受循环；
/// 2. 接受循环把每条连接连同尚未完成的建立步骤（例如 TLS 握手）派发给 [`WorkerPool`]；
/// 3. `stop` 发出关闭信号，接受循环退出并释放监听套接字，关闭钩子按注册顺序各执行一次；
/// 4. 接受循环无论因何退出都会调用 `stop`。
///
/// ## 契约（What）
/// - `start` 只在 `Unbound` 状态成功；重复调用返回 [`ServerError::AlreadyStarted`]，不会重新绑定端口；
/// - `stop` 幂等、不会失败，钩子的错误与 panic 只记录日志；
/// - 句柄可以克隆，所有克隆共享同一个服务端。
///
/// ## 风险与权衡（Trade-offs）
/// - `stop` 不会中断正在运行的工作者，已接入的连接会处理到结束；
/// - 监听套接字在接受循环退出时才真正关闭，需要确认端口已释放时使用 [`StreamingServer::wait_closed`]。
#[derive(Clone)]
pub struct StreamingServer {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    addr: SocketAddr,
    factory: Arc<dyn ServerSocketFactory>,
    handlers: Arc<dyn HandlerFactory>,
    pool: WorkerPool,
    lifecycle: Mutex<Lifecycle>,
    hooks: Mutex<Vec<ShutdownHook>>,
    shutdown: watch::Sender<bool>,
    closed: watch::Sender<bool>,
    active: Arc<AtomicUsize>,
}

impl StreamingServer {
    pub(crate) fn new(
        name: String,
        addr: SocketAddr,
        factory: Arc<dyn ServerSocketFactory>,
        handlers: Arc<dyn HandlerFactory>,
        pool: WorkerPool,
        hooks: Vec<ShutdownHook>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                addr,
                factory,
                handlers,
                pool,
                lifecycle: Mutex::new(Lifecycle::Unbound),
                hooks: Mutex::new(hooks),
                shutdown: watch::Sender::new(false),
                closed: watch::Sender::new(false),
                active: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> ServerState {
        match *self.inner.lifecycle.lock() {
            Lifecycle::Unbound | Lifecycle::Binding => ServerState::Unbound,
            Lifecycle::Listening(_) => ServerState::Listening,
            Lifecycle::Stopped(_) => ServerState::Stopped,
        }
    }

    /// 实际监听地址；未启动时为 `None`。
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match *self.inner.lifecycle.lock() {
            Lifecycle::Listening(addr) => Some(addr),
            Lifecycle::Stopped(addr) => addr,
            Lifecycle::Unbound | Lifecycle::Binding => None,
        }
    }

    /// 正在由工作者处理（含排队与握手中）的连接数。
    pub fn active_connections(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    /// 绑定监听套接字并运行接受循环。
    ///
    /// `blocking = true` 时在当前任务内运行接受循环，直到服务端停止才返回；
    /// 否则派生一个接受循环任务后立即返回。
    pub async fn start(&self, blocking: bool) -> Result<(), ServerError> {
        let inner = &self.inner;
        {
            let mut lifecycle = inner.lifecycle.lock();
            match *lifecycle {
                Lifecycle::Unbound => *lifecycle = Lifecycle::Binding,
                Lifecycle::Stopped(_) => return Err(inner.stopped()),
                Lifecycle::Binding | Lifecycle::Listening(_) => {
                    return Err(ServerError::AlreadyStarted {
                        name: inner.name.clone(),
                    });
                }
            }
        }

        let listener = match inner.factory.listen(inner.addr).await {
            Ok(listener) => listener,
            Err(source) => {
                let mut lifecycle = inner.lifecycle.lock();
                if matches!(*lifecycle, Lifecycle::Binding) {
                    *lifecycle = Lifecycle::Unbound;
                } else {
                    inner.closed.send_replace(true);
                }
                return Err(ServerError::Bind {
                    name: inner.name.clone(),
                    addr: inner.addr,
                    source,
                });
            }
        };

        let local_addr = listener.local_addr();
        {
            let mut lifecycle = inner.lifecycle.lock();
            if !matches!(*lifecycle, Lifecycle::Binding) {
                drop(lifecycle);
                drop(listener);
                inner.closed.send_replace(true);
                return Err(inner.stopped());
            }
            *lifecycle = Lifecycle::Listening(local_addr);
        }
        info!(server = %inner.name, %local_addr, "server listening");

        let span = info_span!("server", name = %inner.name);
        let accept = accept_loop(Arc::clone(inner), listener).instrument(span);
        if blocking {
            accept.await;
        } else {
            inner.pool.spawn_detached(accept);
        }
        Ok(())
    }

    /// 停止服务端：关闭监听并执行全部关闭钩子。可重复调用。
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// 等待监听套接字被释放。从未启动的服务端在 `stop` 之后立即返回。
    pub async fn wait_closed(&self) {
        let mut closed = self.inner.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

impl fmt::Debug for StreamingServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingServer")
            .field("name", &self.inner.name)
            .field("addr", &self.inner.addr)
            .field("state", &self.state())
            .field("pool", &self.inner.pool)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn stopped(&self) -> ServerError {
        ServerError::Stopped {
            name: self.name.clone(),
        }
    }

    fn stop(&self) {
        let previous = {
            let mut lifecycle = self.lifecycle.lock();
            let local_addr = match *lifecycle {
                Lifecycle::Stopped(_) => return,
                Lifecycle::Listening(addr) => Some(addr),
                Lifecycle::Unbound | Lifecycle::Binding => None,
            };
            mem::replace(&mut *lifecycle, Lifecycle::Stopped(local_addr))
        };
        self.shutdown.send_replace(true);
        if matches!(previous, Lifecycle::Unbound) {
            self.closed.send_replace(true);
        }

        let hooks = mem::take(&mut *self.hooks.lock());
        let total = hooks.len();
        let failed = hooks
            .into_iter()
            .map(|hook| hook.run(&self.name))
            .filter(|succeeded| !succeeded)
            .count();
        info!(server = %self.name, hooks = total, failed, "server stopped");
    }
}

/// 接受循环：直到收到关闭信号为止，把每条连接派发给工作者。
async fn accept_loop(inner: Arc<Inner>, listener: Box<dyn Listener>) {
    let mut shutdown = inner.shutdown.subscribe();
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }
        let accepted = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok(accepted) => dispatch(&inner, accepted),
            Err(err) => {
                if *shutdown.borrow() {
                    break;
                }
                warn!(
                    code = err.code(),
                    category = %err.category(),
                    error = %err,
                    "accept failed; continuing"
                );
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    drop(listener);
    inner.closed.send_replace(true);
    debug!(server = %inner.name, "accept loop exited");
    inner.stop();
}

fn dispatch(inner: &Arc<Inner>, accepted: Accepted) {
    let peer = accepted.peer_addr();
    let guard = ActiveGuard::new(&inner.active);
    let handlers = Arc::clone(&inner.handlers);
    let span = info_span!("connection", %peer);
    inner.pool.spawn(
        async move {
            let _guard = guard;
            match accepted.establish().await {
                Ok(connection) => {
                    debug!("connection established");
                    Worker::new(connection, handlers, peer).run().await;
                }
                Err(err) => warn!(
                    code = err.code(),
                    category = %err.category(),
                    error = %err,
                    "connection establishment failed"
                ),
            }
        }
        .instrument(span),
    );
}
