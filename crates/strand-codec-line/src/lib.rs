#![warn(missing_docs)]

//! `strand-codec-line` 提供以换行分隔、以哨兵行结束的文本编解码器。
//!
//! # 教案背景（Why）
//! - 请求与响应都是“若干行文本”：每个字符串占一行，最后以哨兵行（默认 `QUIT`）宣告本条消息结束；
//! - 同一个 [`LineCodec`] 同时实现 [`ServerCoder`](strand_transport::ServerCoder) 与
//!   [`ClientCoder`](strand_transport::ClientCoder)，两端共用一份线上格式。
//!
//! # 合约说明（What）
//! - 编码：逐行写出 `line + "\n"`，最后写出哨兵行；包含换行符的行会被拒绝；
//! - 解码：读到哨兵行或 EOF 即返回已收集的行，行尾的 `\r\n`/`\n` 会被剥离；
//! - 可选的单行长度上限用于防御超长行，超限时返回 `InvalidData`。
//!
//! # 风险提示与后续（Trade-offs）
//! - 不提供转义：业务数据若恰好等于哨兵行，会被当作消息结束。

mod line;

pub use crate::line::{DEFAULT_SENTINEL, LineCodec};
