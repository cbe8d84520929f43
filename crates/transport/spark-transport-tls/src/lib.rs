#![deny(unsafe_code)]
#![doc = r#"
# spark-transport-tls

## 设计动机（Why）
- **加密升级**：把任意已连接的 [`Transport`](spark_transport::Transport) 字节流升级为 TLS 客户端流，
  完成握手、记录加解密与有序关闭；
- **非阻塞**：同步的 `rustls` 引擎只和内存缓冲打交道，由泵在每次读写机会到来时搬运密文，
  消费者的读写永远不会卡住事件循环；
- **可诊断**：握手失败区分协议告警、证书拒绝与版本不匹配，所有错误带稳定错误码与分类。

## 核心契约（What）
- [`TlsStream`]：握手 / 读 / 写 / 刷新 / 关闭，以及协商结果访问器；
- [`TlsConnector`]：持有可热替换的 [`TlsClientConfig`]，为每条传输创建流；
- [`CertificateVerifier`]：证书校验钩子，默认 [`WebPkiVerifier`]；
- [`TlsError`]：错误分类，`code()` 与 `category()` 可直接用于告警规则。

## 实现策略（How）
- `rustls::ClientConnection` 以两块固定容量的密文暂存区为输入输出；
- 会话状态放在非重入锁之后，任何重入调用立即得到 [`TlsError::Reentrant`]；
- 日志统一使用 `tracing`，target 为 `spark.transport.tls`。

## 风险与考量（Trade-offs）
- 同一时刻只有一个操作推进泵，并发读写需调用方串行化；
- 关闭时 close_notify 只做有限轮非阻塞刷新，超出预算即放弃并记录告警。
"#]
#![cfg_attr(
    feature = "runtime-tokio",
    doc = r#"## 功能开关：`runtime-tokio`

默认启用。为 [`TlsStream`] 实现 Tokio 的 `AsyncRead`/`AsyncWrite`，并启用
`spark-transport` 的 Tokio 适配器，使流可以直接承载在 `TcpStream` 上并与 Tokio 工具组合。
"#
)]

mod buffer;
mod config;
mod connector;
mod engine;
mod error;
mod pump;
mod state;
mod stream;
mod verify;

#[cfg(feature = "runtime-tokio")]
mod compat;

/// 本 crate 所有日志事件使用的 `tracing` target。
pub const TRACE_TARGET: &str = "spark.transport.tls";

pub use buffer::DEFAULT_CHUNK_SIZE;
pub use config::{
    DEFAULT_CLOSE_FLUSH_ATTEMPTS, DEFAULT_SEND_BUFFER_LIMIT, TlsClientConfig,
    TlsClientConfigBuilder,
};
pub use connector::TlsConnector;
pub use engine::HandshakeSummary;
pub use error::{ErrorCategory, HandshakeFailure, Operation, TlsError};
pub use state::SessionPhase;
pub use stream::{CloseOutcome, TlsStream};
pub use verify::{AcceptAnyCertificate, CertificateVerifier, WebPkiVerifier};

pub use rustls;
