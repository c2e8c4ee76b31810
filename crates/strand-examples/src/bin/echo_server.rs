//! 行协议回显服务端：读取配置、启动服务端，收到 Ctrl-C 后停止。

use strand_codec_line::LineCodec;
use strand_examples::{Invocation, init_tracing, shout};
use strand_hosting::{ServerBuilder, ServerConfig, ShutdownHook};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let invocation = Invocation::from_env()?;
    let config = ServerConfig::load(invocation.config())?;

    let server = ServerBuilder::from_config(&config)?
        .shutdown_hook(ShutdownHook::infallible("farewell", || {
            info!("echo server says goodbye")
        }))
        .build_request(LineCodec::new, shout)?;

    let stopper = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop();
        }
    });

    server.start(true).await?;
    server.wait_closed().await;
    Ok(())
}
