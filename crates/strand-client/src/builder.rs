use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use strand_transport::{ClientCoder, ClientSocketFactory, Endpoint, PlainSocketFactory};
use strand_transport_tls::TransportConfig;

use crate::{
    client::{Discipline, StreamingClient},
    error::ClientError,
    request::RequestClient,
};

/// 默认建连超时。
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);
/// 重试策略的默认尝试次数。
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// 客户端构建器。
///
/// 默认：明文套接字工厂、10 秒建连超时、重试策略 3 次。
pub struct ClientBuilder {
    endpoint: Endpoint,
    timeout: Duration,
    attempts: u32,
    persistent: bool,
    factory: Option<Arc<dyn ClientSocketFactory>>,
}

impl ClientBuilder {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            timeout: DEFAULT_CONNECT_TIMEOUT,
            attempts: DEFAULT_ATTEMPTS,
            persistent: false,
            factory: None,
        }
    }

    /// 由配置文件构建；配置中引用的安全传输文件在此时加载。
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let mut builder = Self::new(config.endpoint.clone())
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .attempts(config.attempts);
        if config.persistent {
            builder = builder.persistent();
        }
        if let Some(path) = &config.transport {
            let transport = TransportConfig::load(path).map_err(ClientError::invalid)?;
            builder = builder.tls(&transport)?;
        }
        Ok(builder)
    }

    /// 每次建连尝试的超时（TLS 下同时覆盖握手）。
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 重试策略下的最大尝试次数。
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// 切换为长连接策略。
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn socket_factory(mut self, factory: impl ClientSocketFactory) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// 使用安全传输配置构建 TLS 套接字工厂。
    pub fn tls(self, config: &TransportConfig) -> Result<Self, ClientError> {
        let factory = config.socket_factory().map_err(ClientError::invalid)?;
        Ok(self.socket_factory(factory))
    }

    pub fn build(self) -> Result<StreamingClient, ClientError> {
        if self.timeout.is_zero() {
            return Err(ClientError::invalid("connect timeout must be positive"));
        }
        let discipline = if self.persistent {
            Discipline::Persistent
        } else if self.attempts == 0 {
            return Err(ClientError::invalid("attempts must be greater than 0"));
        } else {
            Discipline::Retry {
                attempts: self.attempts,
            }
        };
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(PlainSocketFactory::new()));
        Ok(StreamingClient::new(
            self.endpoint,
            factory,
            self.timeout,
            discipline,
        ))
    }

    /// 构建类型化的请求/响应客户端。
    pub fn build_request<C>(self, coder: C) -> Result<RequestClient<C>, ClientError>
    where
        C: ClientCoder,
    {
        Ok(RequestClient::new(self.build()?, coder))
    }
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_millis() as u64
}

fn default_attempts() -> u32 {
    DEFAULT_ATTEMPTS
}

/// 客户端配置文件。
///
/// ```toml
/// endpoint = "localhost:7000"
/// connect_timeout_ms = 10000
/// attempts = 3
/// persistent = false
/// transport = "transport.toml"
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default)]
    pub transport: Option<PathBuf>,
}

impl ClientConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ClientError> {
        toml::from_str(raw).map_err(|err| ClientError::invalid(err.message()))
    }

    /// 读取配置文件；`transport` 的相对路径以本文件所在目录为基准。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            ClientError::invalid(format_args!("cannot read {}: {err}", path.display()))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_documented_values() -> anyhow::Result<()> {
        let client = ClientBuilder::new(Endpoint::new("localhost", 7000)).build()?;
        assert_eq!(client.connect_timeout(), Duration::from_secs(10));
        assert_eq!(client.discipline(), Discipline::Retry { attempts: 3 });
        Ok(())
    }

    #[test]
    fn zero_attempts_or_timeout_are_rejected() {
        let endpoint = Endpoint::new("localhost", 7000);
        let error = ClientBuilder::new(endpoint.clone())
            .attempts(0)
            .build()
            .unwrap_err();
        assert!(matches!(error, ClientError::InvalidConfig(_)));
        let error = ClientBuilder::new(endpoint)
            .connect_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(error.to_string().contains("timeout"), "{error}");
    }

    #[test]
    fn config_parses_endpoint_and_discipline() -> anyhow::Result<()> {
        let config = ClientConfig::from_toml_str(
            r#"
            endpoint = "example.org:7443"
            persistent = true
            "#,
        )?;
        assert_eq!(config.endpoint, Endpoint::new("example.org", 7443));
        assert_eq!(config.connect_timeout_ms, 10_000);
        let client = ClientBuilder::from_config(&config)?.build()?;
        assert_eq!(client.discipline(), Discipline::Persistent);

        assert!(ClientConfig::from_toml_str("endpoint = \"no-port\"").is_err());
        Ok(())
    }

    #[test]
    fn transport_path_is_resolved_next_to_the_config() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("client.toml");
        fs::write(&path, "endpoint = \"localhost:1\"\ntransport = \"tls.toml\"\n")?;
        let config = ClientConfig::load(&path)?;
        assert_eq!(config.transport, Some(dir.path().join("tls.toml")));
        let error = ClientBuilder::from_config(&config)
            .err()
            .expect("transport file does not exist");
        assert_eq!(error.category(), Some(strand_transport::ErrorCategory::Configuration));
        Ok(())
    }
}
