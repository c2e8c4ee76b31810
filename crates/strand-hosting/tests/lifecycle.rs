use std::{
    io,
    net::{Ipv4Addr, SocketAddr, TcpListener},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use strand_codec_line::LineCodec;
use strand_hosting::{ServerBuilder, ServerError, ServerState, ShutdownHook, StreamingServer};
use strand_transport::{
    ClientCoder, ClientSocketFactory, Endpoint, PlainSocketFactory, StreamHandler,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

const TIMEOUT: Duration = Duration::from_secs(5);

fn free_port() -> anyhow::Result<u16> {
    let unused = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(unused.local_addr()?.port())
}

fn echo_server(port: u16) -> Result<StreamingServer, ServerError> {
    ServerBuilder::new(port)
        .bind_address(Ipv4Addr::LOCALHOST.into())
        .build_request(
            LineCodec::new,
            |lines: Vec<String>| -> io::Result<Vec<String>> { Ok(lines) },
        )
}

async fn exchange_lines(port: u16, request: Vec<String>) -> anyhow::Result<Vec<String>> {
    let mut connection = PlainSocketFactory::new()
        .connect(&Endpoint::new("localhost", port), TIMEOUT)
        .await?;
    let mut codec = LineCodec::new();
    let (mut input, mut output) = connection.split();
    ClientCoder::encode(&mut codec, &request, &mut output).await?;
    Ok(ClientCoder::decode(&mut codec, &mut input).await?)
}

async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test(flavor = "multi_thread")]
async fn echo_round_trip() -> anyhow::Result<()> {
    let port = free_port()?;
    let server = echo_server(port)?;
    assert_eq!(server.state(), ServerState::Unbound);
    server.start(false).await?;
    assert_eq!(server.state(), ServerState::Listening);
    assert_eq!(server.local_addr().map(|addr| addr.port()), Some(port));

    let response = exchange_lines(port, vec!["HELLO".to_owned()]).await?;
    assert_eq!(response, vec!["HELLO".to_owned()]);

    server.stop();
    server.wait_closed().await;
    assert_eq!(server.state(), ServerState::Stopped);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_twice_runs_every_hook_once() -> anyhow::Result<()> {
    let port = free_port()?;
    let first = Arc::new(AtomicUsize::new(0));
    let last = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let (counter, trail) = (Arc::clone(&first), Arc::clone(&order));
    let mut builder = ServerBuilder::new(port)
        .bind_address(Ipv4Addr::LOCALHOST.into())
        .shutdown_hook(ShutdownHook::infallible("first", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            trail.lock().push("first");
        }))
        .shutdown_hook(ShutdownHook::new("failing", || Err("refused")))
        .shutdown_hook(ShutdownHook::infallible("panicking", || panic!("hook bug")));
    let (counter, trail) = (Arc::clone(&last), Arc::clone(&order));
    builder = builder.shutdown_hook(ShutdownHook::infallible("last", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        trail.lock().push("last");
    }));
    let server = builder.build_request(
        LineCodec::new,
        |lines: Vec<String>| -> io::Result<Vec<String>> { Ok(lines) },
    )?;

    server.start(false).await?;
    server.stop();
    server.stop();
    server.wait_closed().await;
    server.stop();

    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(last.load(Ordering::SeqCst), 1);
    assert_eq!(*order.lock(), vec!["first", "last"]);

    // 监听套接字已释放，端口可被重新绑定。
    let rebound = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)));
    assert!(rebound.is_ok());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn second_start_fails_without_rebinding() -> anyhow::Result<()> {
    let port = free_port()?;
    let server = echo_server(port)?;
    server.start(false).await?;
    let bound = server.local_addr();

    let error = server.start(false).await.unwrap_err();
    assert!(matches!(error, ServerError::AlreadyStarted { .. }), "{error}");
    assert_eq!(server.local_addr(), bound);
    assert_eq!(server.state(), ServerState::Listening);

    let response = exchange_lines(port, vec!["still".to_owned(), "serving".to_owned()]).await?;
    assert_eq!(response, vec!["still".to_owned(), "serving".to_owned()]);
    server.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn blocking_start_returns_after_stop() -> anyhow::Result<()> {
    let port = free_port()?;
    let server = echo_server(port)?;
    let running = server.clone();
    let accept = tokio::spawn(async move { running.start(true).await });

    assert!(eventually(|| server.state() == ServerState::Listening).await);
    assert!(!accept.is_finished());
    server.stop();

    tokio::time::timeout(TIMEOUT, accept).await???;
    assert_eq!(server.state(), ServerState::Stopped);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn bind_conflict_leaves_server_unbound() -> anyhow::Result<()> {
    let taken = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    let port = taken.local_addr()?.port();
    let server = echo_server(port)?;

    let error = server.start(false).await.unwrap_err();
    assert!(matches!(error, ServerError::Bind { .. }), "{error}");
    assert_eq!(server.state(), ServerState::Unbound);

    drop(taken);
    server.start(false).await?;
    assert_eq!(server.state(), ServerState::Listening);
    server.stop();
    Ok(())
}

/// 按行回显，收到 `boom` 时返回错误。
struct Fragile;

#[async_trait]
impl StreamHandler for Fragile {
    async fn handle(
        &mut self,
        input: &mut (dyn AsyncRead + Send + Unpin),
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> io::Result<()> {
        let mut line = String::new();
        BufReader::new(input).read_line(&mut line).await?;
        if line.trim_end() == "boom" {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "boom requested"));
        }
        output.write_all(line.as_bytes()).await?;
        output.flush().await
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_handler_only_affects_its_connection() -> anyhow::Result<()> {
    let port = free_port()?;
    let server = ServerBuilder::new(port)
        .bind_address(Ipv4Addr::LOCALHOST.into())
        .fixed_workers(2)
        .build(|| Fragile)?;
    server.start(false).await?;
    let factory = PlainSocketFactory::new();
    let endpoint = Endpoint::new("127.0.0.1", port);

    let mut doomed = factory.connect(&endpoint, TIMEOUT).await?;
    {
        let (mut input, mut output) = doomed.split();
        output.write_all(b"boom\n").await?;
        let mut rest = Vec::new();
        input.read_to_end(&mut rest).await?;
        assert!(rest.is_empty(), "connection must be closed without a reply");
    }

    let mut healthy = factory.connect(&endpoint, TIMEOUT).await?;
    {
        let (mut input, mut output) = healthy.split();
        output.write_all(b"fine\n").await?;
        let mut reply = String::new();
        BufReader::new(&mut input).read_line(&mut reply).await?;
        assert_eq!(reply, "fine\n");
    }

    assert!(eventually(|| server.active_connections() == 0).await);
    server.stop();
    Ok(())
}
