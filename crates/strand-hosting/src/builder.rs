use std::{
    fs,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use serde::{Deserialize, Serialize};
use strand_transport::{PlainSocketFactory, ServerCoder, ServerSocketFactory};
use strand_transport_tls::TransportConfig;
use tokio::runtime::Handle;

use crate::{
    error::ServerError,
    handler::{HandlerFactory, RequestHandler, RequestHandlerFactory},
    hook::ShutdownHook,
    pool::WorkerPool,
    server::StreamingServer,
};

static SERVER_SEQUENCE: AtomicUsize = AtomicUsize::new(0);

fn next_server_name() -> String {
    format!("strand-server-{}", SERVER_SEQUENCE.fetch_add(1, Ordering::Relaxed))
}

/// 服务端构建器。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 所有参数在 `build` 时一次性校验，产出的 [`StreamingServer`] 不再接受配置修改。
///
/// ## 契约（What）
/// - `port` 必须大于 0；`fixed_workers(n)` 要求 `n > 0`；
/// - 默认使用明文套接字工厂与按需扩张的工作者池，监听 `0.0.0.0`；
/// - 未指定名称时按全局序号生成 `strand-server-N`，用于日志字段与 span。
///
/// ## 风险与权衡（Trade-offs）
/// - `tls` 会立即加载信任材料；材料问题在构建阶段以 [`ServerError::InvalidConfig`] 暴露。
pub struct ServerBuilder {
    port: u16,
    bind_address: IpAddr,
    socket_factory: Option<Arc<dyn ServerSocketFactory>>,
    workers: Option<usize>,
    runtime: Option<Handle>,
    hooks: Vec<ShutdownHook>,
    name: Option<String>,
}

impl ServerBuilder {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            bind_address: default_bind_address(),
            socket_factory: None,
            workers: None,
            runtime: None,
            hooks: Vec::new(),
            name: None,
        }
    }

    /// 由配置文件构建；配置中引用的安全传输文件在此时加载。
    pub fn from_config(config: &ServerConfig) -> Result<Self, ServerError> {
        let mut builder = Self::new(config.port).bind_address(config.bind_address);
        if let Some(workers) = config.worker_threads {
            builder = builder.fixed_workers(workers);
        }
        if let Some(name) = &config.name {
            builder = builder.name(name.clone());
        }
        if let Some(path) = &config.transport {
            let transport = TransportConfig::load(path).map_err(ServerError::invalid)?;
            builder = builder.tls(&transport)?;
        }
        Ok(builder)
    }

    pub fn bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    pub fn socket_factory(mut self, factory: impl ServerSocketFactory) -> Self {
        self.socket_factory = Some(Arc::new(factory));
        self
    }

    /// 使用安全传输配置构建 TLS 套接字工厂。
    pub fn tls(self, config: &TransportConfig) -> Result<Self, ServerError> {
        let factory = config.socket_factory().map_err(ServerError::invalid)?;
        Ok(self.socket_factory(factory))
    }

    /// 固定大小的工作者池；默认按需扩张。
    pub fn fixed_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// 在指定运行时上执行接受循环与工作者。
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// 追加一个关闭钩子，按注册顺序执行。
    pub fn shutdown_hook(mut self, hook: ShutdownHook) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 以原始字节流处理器工厂构建服务端。
    pub fn build(self, handlers: impl HandlerFactory) -> Result<StreamingServer, ServerError> {
        if self.port == 0 {
            return Err(ServerError::invalid("port must be greater than 0"));
        }
        let pool = match self.workers {
            Some(0) => return Err(ServerError::invalid("fixed worker pool must not be empty")),
            Some(workers) => WorkerPool::fixed(workers),
            None => WorkerPool::unbounded(),
        };
        let pool = match self.runtime {
            Some(runtime) => pool.with_runtime(runtime),
            None => pool,
        };
        let factory = self
            .socket_factory
            .unwrap_or_else(|| Arc::new(PlainSocketFactory::new()));
        Ok(StreamingServer::new(
            self.name.unwrap_or_else(next_server_name),
            SocketAddr::new(self.bind_address, self.port),
            factory,
            Arc::new(handlers),
            pool,
            self.hooks,
        ))
    }

    /// 以“编解码器工厂 + 请求处理器”构建请求/响应服务端。
    pub fn build_request<F, C, H>(
        self,
        coders: F,
        handler: H,
    ) -> Result<StreamingServer, ServerError>
    where
        F: Fn() -> C + Send + Sync + 'static,
        C: ServerCoder + 'static,
        C::Request: 'static,
        H: RequestHandler<C::Request, C::Response>,
    {
        self.build(RequestHandlerFactory::new(coders, handler))
    }
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

/// 服务端配置文件。
///
/// ```toml
/// port = 7000
/// bind_address = "127.0.0.1"
/// worker_threads = 8
/// transport = "transport.toml"
/// ```
///
/// `transport` 指向一份 [`TransportConfig`] 文件，相对路径以本文件所在目录为基准。
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    #[serde(default)]
    pub worker_threads: Option<usize>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub transport: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ServerError> {
        toml::from_str(raw).map_err(|err| ServerError::invalid(err.message()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            ServerError::invalid(format_args!("cannot read {}: {err}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        if let (Some(transport), Some(base)) = (config.transport.as_mut(), path.parent())
            && transport.is_relative()
        {
            *transport = base.join(&*transport);
        }
        Ok(config)
    }
}
