//! 行协议回显客户端：把命令行载荷逐行发送，并打印服务端回复。

use anyhow::Context;
use strand_client::{ClientBuilder, ClientConfig};
use strand_codec_line::LineCodec;
use strand_examples::{Invocation, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let invocation = Invocation::from_env()?;
    let config = ClientConfig::load(invocation.config())?;

    let mut client = ClientBuilder::from_config(&config)?.build_request(LineCodec::new())?;
    let response = client
        .exchange(&invocation.payload)
        .await
        .with_context(|| format!("exchange with {} failed", config.endpoint))?;
    for line in response {
        println!("{line}");
    }
    client.close().await;
    Ok(())
}
