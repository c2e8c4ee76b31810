use std::{fmt, io, sync::Arc, time::Duration};

use strand_transport::{
    ClientSocketFactory, Connection, Endpoint, ExchangeHandler, TransportError, error::HANDSHAKE,
};
use tracing::{debug, warn};

use crate::error::ClientError;

/// 客户端的连接策略。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Discipline {
    /// 每次交互打开新连接，可重试的建连失败最多尝试 `attempts` 次，交互结束即关闭连接。
    Retry { attempts: u32 },
    /// 复用一条长连接；连接缺失或已断开时在下一次交互前重新建立。
    Persistent,
}

enum Mode {
    Retry { attempts: u32 },
    Persistent { held: Option<Connection> },
}

/// 流式客户端。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 让调用方只编写“拿到输入流与输出流之后做什么”，连接的建立、重试与复用由客户端负责；
/// - 明确区分建连失败与处理器失败：前者在重试策略下可重试，后者从不重试。
///
/// ## 逻辑（How）
/// - 重试策略：逐次建连，遇到可重试错误（拒绝、重置、超时）记录日志并继续；
///   不可重试错误（握手被拒、安全材料问题）立即返回；建连成功后处理器恰好执行一次；
/// - 长连接策略：持有的连接仍然存活则复用，否则先关闭旧连接再建立新连接；
///   处理器失败时丢弃该连接，避免在半途状态的流上继续交互。
///
/// ## 契约（What）
/// - 重试耗尽返回 [`ClientError::Connect`]，携带尝试次数与最后一次失败；
/// - 处理器错误返回 [`ClientError::Exchange`]，其分类由套接字工厂识别；
/// - 对端在握手之后才拒绝本端身份（TLSv1.3 的客户端证书校验）时，处理器多半只看到 `BrokenPipe`，
///   此时会读出对端遗留的告警重新分类，安全类失败统一返回 [`ClientError::Rejected`]。
///
/// ## 风险与权衡（Trade-offs）
/// - 存活探测只能发现已到达的 FIN/RST；对端刚刚关闭时，复用可能在首次读写时才失败。
pub struct StreamingClient {
    endpoint: Endpoint,
    factory: Arc<dyn ClientSocketFactory>,
    timeout: Duration,
    mode: Mode,
}

impl StreamingClient {
    pub(crate) fn new(
        endpoint: Endpoint,
        factory: Arc<dyn ClientSocketFactory>,
        timeout: Duration,
        discipline: Discipline,
    ) -> Self {
        let mode = match discipline {
            Discipline::Retry { attempts } => Mode::Retry { attempts },
            Discipline::Persistent => Mode::Persistent { held: None },
        };
        Self {
            endpoint,
            factory,
            timeout,
            mode,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn connect_timeout(&self) -> Duration {
        self.timeout
    }

    pub fn discipline(&self) -> Discipline {
        match self.mode {
            Mode::Retry { attempts } => Discipline::Retry { attempts },
            Mode::Persistent { .. } => Discipline::Persistent,
        }
    }

    /// 长连接策略下是否持有连接。
    pub fn is_connected(&self) -> bool {
        matches!(self.mode, Mode::Persistent { held: Some(_) })
    }

    /// 执行一次交互：处理器拿到连接的输入、输出两端，恰好运行一次。
    pub async fn exchange<H>(&mut self, mut handler: H) -> Result<H::Output, ClientError>
    where
        H: ExchangeHandler,
    {
        let link = Link {
            endpoint: &self.endpoint,
            factory: self.factory.as_ref(),
            timeout: self.timeout,
        };
        match &mut self.mode {
            Mode::Retry { attempts } => {
                let mut connection = link.connect(*attempts).await?;
                let outcome = link.run(&mut connection, &mut handler).await;
                connection.close().await;
                outcome
            }
            Mode::Persistent { held } => {
                let mut connection = match held.take() {
                    Some(mut connection) => {
                        if connection.is_alive() {
                            connection
                        } else {
                            debug!(endpoint = %link.endpoint, "held connection is closed; reconnecting");
                            connection.close().await;
                            link.connect(1).await?
                        }
                    }
                    None => link.connect(1).await?,
                };
                match link.run(&mut connection, &mut handler).await {
                    Ok(output) => {
                        *held = Some(connection);
                        Ok(output)
                    }
                    Err(err) => {
                        connection.close().await;
                        Err(err)
                    }
                }
            }
        }
    }

    /// 关闭长连接策略下持有的连接；重试策略下为空操作。
    pub async fn close(&mut self) {
        if let Mode::Persistent { held } = &mut self.mode
            && let Some(connection) = held.take()
        {
            connection.close().await;
        }
    }
}

impl fmt::Debug for StreamingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingClient")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("discipline", &self.discipline())
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// 处理器因对端关闭而失败后，等待对端遗留报文（例如 TLS 告警）的时限。
const PENDING_ERROR_WAIT: Duration = Duration::from_millis(500);

fn closed_by_peer(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
    )
}

/// 一次交互所需的只读上下文，与可变的连接状态分开借用。
struct Link<'a> {
    endpoint: &'a Endpoint,
    factory: &'a dyn ClientSocketFactory,
    timeout: Duration,
}

impl Link<'_> {
    async fn connect(&self, attempts: u32) -> Result<Connection, ClientError> {
        let mut last = None;
        for attempt in 1..=attempts {
            match self.factory.connect(self.endpoint, self.timeout).await {
                Ok(connection) => {
                    debug!(endpoint = %self.endpoint, attempt, "connected");
                    return Ok(connection);
                }
                Err(err) if err.is_retryable() => {
                    warn!(
                        endpoint = %self.endpoint,
                        attempt,
                        attempts,
                        code = err.code(),
                        error = %err,
                        "connection attempt failed"
                    );
                    last = Some(err);
                }
                Err(err) => {
                    warn!(
                        endpoint = %self.endpoint,
                        code = err.code(),
                        category = %err.category(),
                        error = %err,
                        "connection rejected"
                    );
                    return Err(ClientError::Rejected {
                        endpoint: self.endpoint.clone(),
                        source: err,
                    });
                }
            }
        }
        match last {
            Some(source) => Err(ClientError::Connect {
                endpoint: self.endpoint.clone(),
                attempts,
                source,
            }),
            None => Err(ClientError::invalid("at least one connection attempt is required")),
        }
    }

    async fn run<H>(
        &self,
        connection: &mut Connection,
        handler: &mut H,
    ) -> Result<H::Output, ClientError>
    where
        H: ExchangeHandler,
    {
        let outcome = {
            let (mut input, mut output) = connection.split();
            handler.exchange(&mut input, &mut output).await
        };
        let source = match outcome {
            Ok(output) => return Ok(output),
            Err(source) => source,
        };

        let (source, category) = match self.factory.classify(&source) {
            Some(category) => (source, Some(category)),
            None if closed_by_peer(&source) => {
                match connection.pending_error(PENDING_ERROR_WAIT).await {
                    Some(cause) => match self.factory.classify(&cause) {
                        Some(category) => (cause, Some(category)),
                        None => (source, None),
                    },
                    None => (source, None),
                }
            }
            None => (source, None),
        };
        match category {
            Some(category) if category.is_security() => {
                warn!(
                    endpoint = %self.endpoint,
                    %category,
                    error = %source,
                    "peer rejected the secure session"
                );
                Err(ClientError::Rejected {
                    endpoint: self.endpoint.clone(),
                    source: TransportError::new(HANDSHAKE, category, &source).with_source(source),
                })
            }
            category => Err(ClientError::Exchange {
                endpoint: self.endpoint.clone(),
                category,
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io,
        sync::atomic::{AtomicU32, Ordering},
    };

    use async_trait::async_trait;
    use strand_transport::{
        ErrorCategory, TransportError,
        error::{CONNECT, HANDSHAKE},
    };
    use tokio::io::{AsyncRead, AsyncWrite};

    /// 每次建连都以给定分类失败，并记录尝试次数。
    struct Failing {
        category: ErrorCategory,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl ClientSocketFactory for Failing {
        async fn connect(
            &self,
            _endpoint: &Endpoint,
            _timeout: Duration,
        ) -> Result<Connection, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let kind = if self.category == ErrorCategory::Connection {
                CONNECT
            } else {
                HANDSHAKE
            };
            Err(TransportError::new(kind, self.category, "scripted failure"))
        }
    }

    struct Unreachable;

    #[async_trait]
    impl ExchangeHandler for Unreachable {
        type Output = ();

        async fn exchange(
            &mut self,
            _input: &mut (dyn AsyncRead + Send + Unpin),
            _output: &mut (dyn AsyncWrite + Send + Unpin),
        ) -> io::Result<()> {
            panic!("handler must not run without a connection");
        }
    }

    fn client(category: ErrorCategory, discipline: Discipline) -> (StreamingClient, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let factory = Failing {
            category,
            calls: Arc::clone(&calls),
        };
        let client = StreamingClient::new(
            Endpoint::new("127.0.0.1", 9),
            Arc::new(factory),
            Duration::from_millis(100),
            discipline,
        );
        (client, calls)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transient_failures_use_every_attempt() {
        let (mut client, calls) = client(ErrorCategory::Connection, Discipline::Retry { attempts: 3 });
        let error = client.exchange(Unreachable).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(error.attempts(), Some(3));
        assert_eq!(error.category(), Some(ErrorCategory::Connection));
        assert!(matches!(error, ClientError::Connect { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_handshakes_are_not_retried() {
        let (mut client, calls) =
            client(ErrorCategory::Authentication, Discipline::Retry { attempts: 5 });
        let error = client.exchange(Unreachable).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(error, ClientError::Rejected { .. }), "{error}");
        assert_eq!(error.category(), Some(ErrorCategory::Authentication));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn persistent_discipline_connects_once_per_exchange_when_unavailable() {
        let (mut client, calls) = client(ErrorCategory::Timeout, Discipline::Persistent);
        let error = client.exchange(Unreachable).await.unwrap_err();
        assert_eq!(error.attempts(), Some(1));
        assert_eq!(error.category(), Some(ErrorCategory::Timeout));
        assert!(!client.is_connected());
        client.exchange(Unreachable).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
