use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// 远端地址：主机名（或 IP 字面量）加端口。
///
/// 构造后不可变；`Display` 输出 `host:port`，IPv6 字面量带方括号。
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    host: String,
    port: u16,
}

/// 解析 `host:port` 失败。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointParseError {
    #[error("endpoint `{0}` is missing a `:port` suffix")]
    MissingPort(String),
    #[error("endpoint `{0}` has an empty host")]
    EmptyHost(String),
    #[error("endpoint `{0}` has an invalid port")]
    InvalidPort(String),
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (host, port) = raw
            .rsplit_once(':')
            .ok_or_else(|| EndpointParseError::MissingPort(raw.to_owned()))?;
        let host = host
            .strip_prefix('[')
            .and_then(|inner| inner.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(EndpointParseError::EmptyHost(raw.to_owned()));
        }
        let port = port
            .parse::<u16>()
            .ok()
            .filter(|port| *port > 0)
            .ok_or_else(|| EndpointParseError::InvalidPort(raw.to_owned()))?;
        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = EndpointParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(value: Endpoint) -> Self {
        value.to_string()
    }
}
