use std::{
    io,
    net::{Ipv4Addr, TcpListener},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use strand_client::{ClientBuilder, ClientError};
use strand_codec_line::LineCodec;
use strand_hosting::{ServerBuilder, StreamingServer};
use strand_transport::{
    ClientSocketFactory, Connection, Endpoint, ErrorCategory, ExchangeHandler,
    PlainSocketFactory, StreamHandler, TransportError,
};
use strand_transport_tls::{
    TlsProtocol, TlsSocketFactory, TransportConfig,
    testing::{Identity, MaterialDir},
};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

fn free_port() -> anyhow::Result<u16> {
    let unused = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(unused.local_addr()?.port())
}

fn localhost(port: u16) -> Endpoint {
    Endpoint::new("localhost", port)
}

fn lines(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| (*item).to_owned()).collect()
}

async fn request_echo_server(port: u16) -> anyhow::Result<StreamingServer> {
    let server = ServerBuilder::new(port)
        .bind_address(Ipv4Addr::LOCALHOST.into())
        .build_request(
            LineCodec::new,
            |request: Vec<String>| -> io::Result<Vec<String>> { Ok(request) },
        )?;
    server.start(false).await?;
    Ok(server)
}

/// 逐行回显直到对端关闭，用于验证长连接复用。
struct LineEcho;

#[async_trait]
impl StreamHandler for LineEcho {
    async fn handle(
        &mut self,
        input: &mut (dyn AsyncRead + Send + Unpin),
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> io::Result<()> {
        let mut reader = BufReader::new(input);
        let mut line = String::new();
        while reader.read_line(&mut line).await? > 0 {
            output.write_all(line.as_bytes()).await?;
            output.flush().await?;
            line.clear();
        }
        Ok(())
    }
}

/// 发送一行并读取一行回复。
struct Ping(&'static str);

#[async_trait]
impl ExchangeHandler for Ping {
    type Output = String;

    async fn exchange(
        &mut self,
        input: &mut (dyn AsyncRead + Send + Unpin),
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> io::Result<String> {
        output.write_all(format!("{}\n", self.0).as_bytes()).await?;
        output.flush().await?;
        let mut reply = String::new();
        BufReader::new(input).read_line(&mut reply).await?;
        Ok(reply.trim_end().to_owned())
    }
}

struct Broken;

#[async_trait]
impl ExchangeHandler for Broken {
    type Output = ();

    async fn exchange(
        &mut self,
        _input: &mut (dyn AsyncRead + Send + Unpin),
        _output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::InvalidData, "decoder gave up"))
    }
}

/// 统计建连次数的工厂包装。
#[derive(Clone)]
struct Counting<F> {
    inner: F,
    calls: Arc<AtomicUsize>,
}

impl<F> Counting<F> {
    fn new(inner: F) -> Self {
        Self {
            inner,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Counting<PlainSocketFactory> {
    fn plain() -> Self {
        Self::new(PlainSocketFactory::new())
    }
}

#[async_trait]
impl<F: ClientSocketFactory> ClientSocketFactory for Counting<F> {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Connection, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.connect(endpoint, timeout).await
    }

    fn classify(&self, error: &io::Error) -> Option<ErrorCategory> {
        self.inner.classify(error)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn typed_exchange_round_trips_hello() -> anyhow::Result<()> {
    let port = free_port()?;
    let server = request_echo_server(port).await?;

    let mut client = ClientBuilder::new(localhost(port)).build_request(LineCodec::new())?;
    let response = client.exchange(&lines(&["HELLO"])).await?;
    assert_eq!(response, lines(&["HELLO"]));

    server.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn refused_connections_exhaust_the_configured_attempts() -> anyhow::Result<()> {
    let port = free_port()?;
    let counting = Counting::plain();
    let mut client = ClientBuilder::new(localhost(port))
        .attempts(4)
        .connect_timeout(Duration::from_millis(500))
        .socket_factory(counting.clone())
        .build()?;

    let error = client.exchange(Ping("anyone?")).await.unwrap_err();
    assert_eq!(error.attempts(), Some(4));
    assert_eq!(error.category(), Some(ErrorCategory::Connection));
    assert_eq!(counting.calls(), 4);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn handler_failures_are_not_retried() -> anyhow::Result<()> {
    let port = free_port()?;
    let server = request_echo_server(port).await?;
    let counting = Counting::plain();
    let mut client = ClientBuilder::new(localhost(port))
        .socket_factory(counting.clone())
        .build()?;

    let error = client.exchange(Broken).await.unwrap_err();
    match &error {
        ClientError::Exchange { category, source, .. } => {
            assert_eq!(*category, None);
            assert_eq!(source.kind(), io::ErrorKind::InvalidData);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(counting.calls(), 1);
    server.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn persistent_client_reuses_one_connection() -> anyhow::Result<()> {
    let port = free_port()?;
    let created = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&created);
    let server = ServerBuilder::new(port)
        .bind_address(Ipv4Addr::LOCALHOST.into())
        .build(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            LineEcho
        })?;
    server.start(false).await?;

    let mut client = ClientBuilder::new(localhost(port)).persistent().build()?;
    for word in ["one", "two", "three"] {
        assert_eq!(client.exchange(Ping(word)).await?, word);
        assert!(client.is_connected());
    }
    assert_eq!(created.load(Ordering::SeqCst), 1);

    client.close().await;
    assert!(!client.is_connected());
    server.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn persistent_client_replaces_a_closed_connection() -> anyhow::Result<()> {
    let port = free_port()?;
    let server = request_echo_server(port).await?;
    let counting = Counting::plain();
    let mut client = ClientBuilder::new(localhost(port))
        .persistent()
        .socket_factory(counting.clone())
        .build_request(LineCodec::new())?;

    assert_eq!(client.exchange(&lines(&["first"])).await?, lines(&["first"]));
    // 请求/响应服务端每条连接只处理一个请求，随后关闭。
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.exchange(&lines(&["second"])).await?, lines(&["second"]));
    assert_eq!(counting.calls(), 2);

    server.stop();
    Ok(())
}

/// 双向 TLS 的回显服务端与两套客户端材料。
struct Secured {
    _dir: MaterialDir,
    server: StreamingServer,
    endpoint: Endpoint,
    trusted: TransportConfig,
    stranger: TransportConfig,
}

async fn secured_echo(protocol: TlsProtocol) -> anyhow::Result<Secured> {
    let dir = MaterialDir::new()?;
    let server_id = Identity::generate("strand-server")?;
    let client_id = Identity::generate("strand-client")?;
    let stranger_id = Identity::generate("stranger")?;
    let with_protocol = |mut config: TransportConfig| {
        config.protocol = protocol;
        config
    };

    let port = free_port()?;
    let server = ServerBuilder::new(port)
        .bind_address(Ipv4Addr::LOCALHOST.into())
        .tls(&with_protocol(TransportConfig::pem(
            dir.pem_files("server", &server_id, &[&client_id])?,
        )))?
        .build_request(
            LineCodec::new,
            |request: Vec<String>| -> io::Result<Vec<String>> { Ok(request) },
        )?;
    server.start(false).await?;
    Ok(Secured {
        server,
        endpoint: Endpoint::new("127.0.0.1", port),
        trusted: with_protocol(TransportConfig::pem(
            dir.pem_files("client", &client_id, &[&server_id])?,
        )),
        stranger: with_protocol(TransportConfig::pem(
            dir.pem_files("stranger", &stranger_id, &[&server_id])?,
        )),
        _dir: dir,
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn persistent_tls_client_replaces_a_closed_connection() -> anyhow::Result<()> {
    let secured = secured_echo(TlsProtocol::Tls12).await?;
    let counting = Counting::new(TlsSocketFactory::from_material(
        &secured.trusted.material()?,
        secured.trusted.tls_options(),
    )?);
    let mut client = ClientBuilder::new(secured.endpoint.clone())
        .persistent()
        .socket_factory(counting.clone())
        .build_request(LineCodec::new())?;

    assert_eq!(client.exchange(&lines(&["first"])).await?, lines(&["first"]));
    // 服务端回复后发送 close_notify 并关闭连接。
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(client.exchange(&lines(&["second"])).await?, lines(&["second"]));
    assert_eq!(counting.calls(), 2);

    secured.server.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn tls13_stranger_is_reported_as_rejected() -> anyhow::Result<()> {
    let secured = secured_echo(TlsProtocol::Tls13).await?;

    let mut trusted = ClientBuilder::new(secured.endpoint.clone())
        .tls(&secured.trusted)?
        .build_request(LineCodec::new())?;
    assert_eq!(trusted.exchange(&lines(&["HELLO"])).await?, lines(&["HELLO"]));

    for persistent in [false, true] {
        let builder = ClientBuilder::new(secured.endpoint.clone()).tls(&secured.stranger)?;
        let builder = if persistent {
            builder.persistent()
        } else {
            builder
        };
        let mut stranger = builder.build_request(LineCodec::new())?;
        let error = stranger.exchange(&lines(&["HELLO"])).await.unwrap_err();
        assert!(matches!(error, ClientError::Rejected { .. }), "{error}");
        assert_eq!(error.category(), Some(ErrorCategory::Authentication), "{error}");
        assert!(!stranger.client().is_connected());
    }

    secured.server.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn tls12_clients_are_told_apart_by_trust() -> anyhow::Result<()> {
    let secured = secured_echo(TlsProtocol::Tls12).await?;

    let mut trusted = ClientBuilder::new(secured.endpoint.clone())
        .tls(&secured.trusted)?
        .build_request(LineCodec::new())?;
    assert_eq!(trusted.exchange(&lines(&["HELLO"])).await?, lines(&["HELLO"]));

    let mut stranger = ClientBuilder::new(secured.endpoint.clone())
        .tls(&secured.stranger)?
        .build_request(LineCodec::new())?;
    let error = stranger.exchange(&lines(&["HELLO"])).await.unwrap_err();
    assert!(matches!(error, ClientError::Rejected { .. }), "{error}");
    assert_eq!(error.category(), Some(ErrorCategory::Authentication));

    secured.server.stop();
    Ok(())
}
