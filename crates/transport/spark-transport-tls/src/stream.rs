use std::{
    future::poll_fn,
    sync::{Arc, OnceLock},
    task::{Context, Poll},
};

use parking_lot::{Mutex, MutexGuard};
use rustls::{CipherSuite, ProtocolVersion, pki_types::CertificateDer};
use spark_transport::Transport;

use crate::{
    config::TlsClientConfig,
    engine::{Engine, HandshakeSummary},
    error::{Operation, TlsError},
    pump::{Session, SessionParts},
    state::SessionPhase,
};

/// `close` 的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseOutcome {
    /// close_notify 已完整写入传输。
    Flushed,
    /// 刷新失败或超出尝试预算，close_notify 可能未送达；会话仍已关闭。
    Abandoned,
    /// 会话此前已处于 `Closed`/`Failed`，本次调用没有任何副作用。
    AlreadyClosed,
}

/// 建立在 [`Transport`] 之上的 TLS 客户端流。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把“已连接、有序、可靠”的字节流升级为加密双向流，对消费者只暴露握手/读/写/刷新/关闭；
/// - 所有操作以 `&self` 暴露，但同一时刻只能有一个操作推进会话；内部锁是非重入、非阻塞的，
///   争用时直接返回 [`TlsError::Reentrant`]，不会排队等待。
///
/// ## 风险与权衡（Trade-offs）
/// - 读写分属不同任务时，调用方必须自行串行化，例如经 `tokio::io::split` 拆分
///   （其内部锁在争用时挂起而非报错），否则并发的一侧会持续收到 `Reentrant`。
///
/// ## 逻辑（How）
/// - 会话状态（引擎、密文暂存区、状态机）放在 `parking_lot::Mutex` 中，每个操作先 `try_lock`：
///   拿不到锁说明有另一操作正在推进泵（例如传输在回调中重入本流），立即返回
///   [`TlsError::Reentrant`]，绝不阻塞调用线程；
/// - 握手结果写入共享的 `OnceLock`，只读访问器无需加锁；
/// - `poll_*` 系列是底层接口，`async` 版本只是 `poll_fn` 包装。
///
/// ## 契约（What）
/// - 读/写/刷新在握手未完成时会先驱动握手；
/// - `read` 返回 0 仅当传入空缓冲；对端 close_notify 以 [`TlsError::ConnectionClosed`] 表达，
///   此后仍可写；
/// - `write` 可能只接受部分字节，调用方需重新提交剩余部分（或使用 `write_all`）；
/// - `close` 幂等：第二次调用返回 [`CloseOutcome::AlreadyClosed`]；关闭后的其它操作返回
///   [`TlsError::StreamClosed`]；失败后的其它操作返回保存的失败原因；两种情况都不触碰传输。
///
/// ## 风险与权衡（Trade-offs）
/// - 非重入锁意味着同一时刻只有一个操作推进泵；并发的读写会在锁竞争时得到 `Reentrant`，
///   需要由调用方串行化或重试。
pub struct TlsStream<T> {
    session: Mutex<Session<T>>,
    hostname: Arc<str>,
    summary: Arc<OnceLock<HandshakeSummary>>,
}

impl<T: Transport> TlsStream<T> {
    /// 包装已连接的传输；握手在第一次操作时开始。
    pub fn connect(
        transport: T,
        hostname: &str,
        config: &TlsClientConfig,
    ) -> Result<Self, TlsError> {
        let engine = Engine::new(
            config.rustls_config().clone(),
            hostname,
            config.send_buffer_limit(),
        )?;
        let hostname: Arc<str> = Arc::from(hostname);
        let summary = Arc::new(OnceLock::new());
        let session = Session::new(
            transport,
            engine,
            SessionParts {
                chunk_size: config.chunk_size(),
                close_flush_attempts: config.close_flush_attempts(),
                hostname: hostname.clone(),
                summary: summary.clone(),
            },
        );
        Ok(Self {
            session: Mutex::new(session),
            hostname,
            summary,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Session<T>>, TlsError> {
        self.session.try_lock().ok_or(TlsError::Reentrant)
    }

    pub fn poll_handshake(&self, cx: &mut Context<'_>) -> Poll<Result<(), TlsError>> {
        let mut session = match self.lock() {
            Ok(session) => session,
            Err(err) => return Poll::Ready(Err(err)),
        };
        let poll = session.poll_handshake(cx, Operation::Handshake);
        session.settle(Operation::Handshake, poll)
    }

    pub fn poll_read(&self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<Result<usize, TlsError>> {
        let mut session = match self.lock() {
            Ok(session) => session,
            Err(err) => return Poll::Ready(Err(err)),
        };
        let poll = session.poll_read(cx, buf);
        session.settle(Operation::Read, poll)
    }

    pub fn poll_write(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<Result<usize, TlsError>> {
        let mut session = match self.lock() {
            Ok(session) => session,
            Err(err) => return Poll::Ready(Err(err)),
        };
        let poll = session.poll_write(cx, buf);
        session.settle(Operation::Write, poll)
    }

    pub fn poll_flush(&self, cx: &mut Context<'_>) -> Poll<Result<(), TlsError>> {
        let mut session = match self.lock() {
            Ok(session) => session,
            Err(err) => return Poll::Ready(Err(err)),
        };
        let poll = session.poll_flush(cx);
        session.settle(Operation::Flush, poll)
    }

    /// 关闭会话；只在锁竞争时返回错误。
    pub fn poll_close(&self, cx: &mut Context<'_>) -> Poll<Result<CloseOutcome, TlsError>> {
        let mut session = match self.lock() {
            Ok(session) => session,
            Err(err) => return Poll::Ready(Err(err)),
        };
        let poll = session.poll_close(cx);
        session.settle(Operation::Close, poll).map(Ok)
    }

    /// 驱动握手直至完成或失败。
    pub async fn handshake(&self) -> Result<(), TlsError> {
        poll_fn(|cx| self.poll_handshake(cx)).await
    }

    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, TlsError> {
        poll_fn(|cx| self.poll_read(cx, buf)).await
    }

    pub async fn write(&self, buf: &[u8]) -> Result<usize, TlsError> {
        poll_fn(|cx| self.poll_write(cx, buf)).await
    }

    /// 反复提交直到全部字节被引擎接受。
    pub async fn write_all(&self, mut buf: &[u8]) -> Result<(), TlsError> {
        while !buf.is_empty() {
            let n = self.write(buf).await?;
            buf = &buf[n..];
        }
        Ok(())
    }

    pub async fn flush(&self) -> Result<(), TlsError> {
        poll_fn(|cx| self.poll_flush(cx)).await
    }

    pub async fn close(&self) -> Result<CloseOutcome, TlsError> {
        poll_fn(|cx| self.poll_close(cx)).await
    }

    /// 当前会话阶段；锁被占用时返回 `Reentrant`。
    pub fn phase(&self) -> Result<SessionPhase, TlsError> {
        Ok(self.lock()?.phase())
    }

    /// 引擎中是否还有已解密、尚未读取的明文。
    pub fn has_buffered_plaintext(&self) -> Result<bool, TlsError> {
        Ok(self.lock()?.has_buffered_plaintext())
    }

    /// 取回底层传输；引擎随流一起丢弃，不会发送 close_notify。
    pub fn into_inner(self) -> T {
        self.session.into_inner().into_transport()
    }
}

impl<T> TlsStream<T> {
    pub fn target_hostname(&self) -> &str {
        &self.hostname
    }

    pub fn is_handshake_complete(&self) -> bool {
        self.summary.get().is_some()
    }

    /// 握手完成后协商出的全部信息。
    pub fn handshake_summary(&self) -> Option<&HandshakeSummary> {
        self.summary.get()
    }

    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.summary.get().and_then(|summary| summary.protocol_version)
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.summary.get().and_then(|summary| summary.cipher_suite)
    }

    /// 对端证书链，叶子证书在前；握手完成前为空。
    pub fn peer_certificates(&self) -> &[CertificateDer<'static>] {
        self.summary
            .get()
            .map(|summary| summary.peer_certificates.as_slice())
            .unwrap_or_default()
    }

    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.summary
            .get()
            .and_then(|summary| summary.alpn_protocol.as_deref())
    }
}

impl<T> std::fmt::Debug for TlsStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsStream")
            .field("hostname", &self.hostname)
            .field("handshake_complete", &self.is_handshake_complete())
            .finish_non_exhaustive()
    }
}
