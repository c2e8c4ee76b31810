//! 行协议回显示例的公共部分：日志初始化、命令行解析与回显逻辑。
//!
//! # 使用方法
//! ```bash
//! cargo run --bin strand-echo-server -- demos/server.toml
//! cargo run --bin strand-echo-client -- demos/client.toml hello world
//! ```
//! 日志级别由 `RUST_LOG` 控制，默认 `info`。

use std::{
    env, io,
    path::{Path, PathBuf},
};

use anyhow::{Context, bail};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// 安装 `fmt` 日志层，过滤规则取自 `RUST_LOG`。
pub fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("failed to install tracing subscriber")
}

/// 命令行参数：第一个位置参数为配置文件路径，其余为载荷。
#[derive(Debug, PartialEq, Eq)]
pub struct Invocation {
    pub config: PathBuf,
    pub payload: Vec<String>,
}

impl Invocation {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::parse(env::args().skip(1))
    }

    pub fn parse(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut args = args.into_iter();
        let Some(config) = args.next() else {
            bail!("usage: <config.toml> [payload...]");
        };
        if config.starts_with('-') {
            bail!("unknown flag: {config}");
        }
        Ok(Self {
            config: PathBuf::from(config),
            payload: args.collect(),
        })
    }

    pub fn config(&self) -> &Path {
        &self.config
    }
}

/// 回显处理：逐行转为大写。
pub fn shout(lines: Vec<String>) -> io::Result<Vec<String>> {
    Ok(lines.into_iter().map(|line| line.to_uppercase()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_and_payload() -> anyhow::Result<()> {
        let invocation = Invocation::parse(["client.toml", "hello", "world"].map(String::from))?;
        assert_eq!(invocation.config(), Path::new("client.toml"));
        assert_eq!(invocation.payload, ["hello", "world"]);
        Ok(())
    }

    #[test]
    fn missing_config_is_an_error() {
        assert!(Invocation::parse(Vec::new()).is_err());
        assert!(Invocation::parse(["--verbose".to_owned()]).is_err());
    }

    #[test]
    fn shout_uppercases_every_line() -> anyhow::Result<()> {
        assert_eq!(shout(vec!["hi".into(), "there".into()])?, ["HI", "THERE"]);
        Ok(())
    }
}
