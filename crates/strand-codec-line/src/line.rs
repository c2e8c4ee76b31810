use std::io;

use async_trait::async_trait;
use strand_transport::{ClientCoder, ServerCoder};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

const NEWLINE: u8 = b'\n';

/// 默认的消息结束哨兵行。
pub const DEFAULT_SENTINEL: &str = "QUIT";

/// 以换行分帧、以哨兵行结束的文本编解码器。
///
/// # 行为概览（How）
/// - `encode`：逐行写入字符串并追加换行，最后写入哨兵行；
/// - `decode`：用 `BufReader` 按行读取，遇到哨兵行或 EOF 停止；
/// - 实例无状态，可按连接克隆。
///
/// # 权衡与风险（Trade-offs）
/// - `BufReader` 可能预读哨兵之后的字节；在“一次请求一次响应”的协议下对端不会提前发送后续数据，
///   因此预读不会吞掉下一条消息。
#[derive(Debug, Clone)]
pub struct LineCodec {
    sentinel: String,
    max_line_length: Option<usize>,
}

impl LineCodec {
    /// 使用默认哨兵 `QUIT` 构建编解码器。
    pub fn new() -> Self {
        Self::with_sentinel(DEFAULT_SENTINEL)
    }

    /// 使用自定义哨兵行构建编解码器。
    pub fn with_sentinel(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: sentinel.into(),
            max_line_length: None,
        }
    }

    /// 限制单行（不含换行符）的最大字节数。
    pub fn with_max_line_length(mut self, limit: usize) -> Self {
        self.max_line_length = Some(limit);
        self
    }

    /// 当前使用的哨兵行。
    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    async fn write_lines(
        &self,
        lines: &[String],
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> io::Result<()> {
        for line in lines {
            if line.as_bytes().contains(&NEWLINE) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "line payload must not contain a newline",
                ));
            }
            self.check_length(line.len())?;
            output.write_all(line.as_bytes()).await?;
            output.write_all(&[NEWLINE]).await?;
        }
        output.write_all(self.sentinel.as_bytes()).await?;
        output.write_all(&[NEWLINE]).await?;
        output.flush().await
    }

    async fn read_lines(
        &self,
        input: &mut (dyn AsyncRead + Send + Unpin),
    ) -> io::Result<Vec<String>> {
        let mut reader = BufReader::new(input);
        let mut lines = Vec::new();
        let mut raw = String::new();
        loop {
            raw.clear();
            if reader.read_line(&mut raw).await? == 0 {
                break;
            }
            let line = raw
                .strip_suffix('\n')
                .map(|rest| rest.strip_suffix('\r').unwrap_or(rest))
                .unwrap_or(raw.as_str());
            if line == self.sentinel {
                break;
            }
            self.check_length(line.len())?;
            lines.push(line.to_owned());
        }
        Ok(lines)
    }

    fn check_length(&self, length: usize) -> io::Result<()> {
        match self.max_line_length {
            Some(limit) if length > limit => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line length {length} exceeds limit {limit}"),
            )),
            _ => Ok(()),
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServerCoder for LineCodec {
    type Request = Vec<String>;
    type Response = Vec<String>;

    async fn decode(
        &mut self,
        input: &mut (dyn AsyncRead + Send + Unpin),
    ) -> io::Result<Self::Request> {
        self.read_lines(input).await
    }

    async fn encode(
        &mut self,
        response: &Self::Response,
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> io::Result<()> {
        self.write_lines(response, output).await
    }
}

#[async_trait]
impl ClientCoder for LineCodec {
    type Request = Vec<String>;
    type Response = Vec<String>;

    async fn encode(
        &mut self,
        request: &Self::Request,
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> io::Result<()> {
        self.write_lines(request, output).await
    }

    async fn decode(
        &mut self,
        input: &mut (dyn AsyncRead + Send + Unpin),
    ) -> io::Result<Self::Response> {
        self.read_lines(input).await
    }
}
