use std::{
    io,
    sync::{Arc, OnceLock},
    task::{Context, Poll},
};

use rustls::Error as RustlsError;
use spark_transport::{IoOutcome, Transport, TransportExt, is_closed_kind};
use tracing::{debug, warn};

use crate::{
    TRACE_TARGET,
    buffer::CipherBuffer,
    engine::{Engine, EngineRead, EngineWrite, HandshakeStep, HandshakeSummary},
    error::{Operation, TlsError},
    state::{SessionPhase, SessionState, Waiters},
    stream::CloseOutcome,
};

/// 单轮泵的观测结果。
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct PumpReport {
    /// 本轮是否搬运了字节或推进了引擎状态。
    pub progressed: bool,
    /// 传输写方向返回 `Pending`，已登记可写通知。
    pub write_blocked: bool,
    /// 传输读方向返回 `Pending`，已登记可读通知。
    pub read_blocked: bool,
}

impl PumpReport {
    fn blocked(&self) -> bool {
        self.write_blocked || self.read_blocked
    }
}

/// 一条 TLS 会话：传输、引擎、两块密文暂存区与状态机。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 同步引擎、事件驱动传输与消费者的非阻塞读写是三套因果模型；会话把三者收拢到同一把锁下，
///   由 [`pump`](Self::pump) 在每次机会到来时统一推进，避免丢数据、死锁或记录被截断；
/// - 消费者操作（握手/读/写/刷新/关闭）只是“带着不同目的调用泵”，因此所有搬运规则只写一遍。
///
/// ## 逻辑（How）
/// 1. **刷出**：`outbound` 有残留时先写传输；只有残留清空后才再次从引擎抽取密文；
///    传输返回 `Pending` 即记为 `write_blocked` 并停止本步；
/// 2. **读入**：仅在握手未完成或当前操作是读时才读传输，避免挂起的写者抢走读者在传输上登记的
///    可读通知；只读入暂存区剩余空间，EOF 在暂存字节全部喂完后才告知引擎；
/// 3. **推进**：握手未完成则继续握手，否则处理已到达的记录；
/// 4. **驱动器**：各操作循环调用泵，有进展就重试并唤醒其它挂起的操作；无进展则登记 waker 返回
///    `Pending`。若本轮既无进展也未被传输阻塞（没有任何一方会唤醒我们），则主动 `wake_by_ref`
///    让执行器稍后重试。
///
/// ## 契约（What）
/// - 字节按提交顺序上线、按解密顺序交付；
/// - 进入 `Closed`/`Failed` 后不再读写传输，引擎随之释放；
/// - 握手期间传输 EOF：返回 `TransportClosed`，会话进入 `Closed`，后续操作得到 `StreamClosed`；
///   当时仍在挂起的其它操作被唤醒后得到 `TransportClosed`；
/// - 引擎失败：会话进入 `Failed` 并保存错误，失败前尽力把引擎排队的告警刷给对端；
/// - 关闭永不返回错误：刷新 close_notify 失败或超出尝试预算时记录告警并以 `Abandoned` 结束。
///
/// ## 风险与权衡（Trade-offs）
/// - 写入在引擎接受明文后只做一轮尽力刷新，剩余密文由后续操作或显式 `flush` 送出；
/// - 关闭的刷新预算按“轮”计：每轮是一次非阻塞刷新，预算耗尽即放弃，不设隐式超时。
pub(crate) struct Session<T> {
    transport: T,
    engine: Option<Engine>,
    inbound: CipherBuffer,
    outbound: CipherBuffer,
    state: SessionState,
    handshake_complete: bool,
    transport_eof: bool,
    eof_fed: bool,
    peer_closed: bool,
    waiters: Waiters,
    close_flush_attempts: usize,
    close_attempts_left: usize,
    hostname: Arc<str>,
    summary: Arc<OnceLock<HandshakeSummary>>,
}

pub(crate) struct SessionParts {
    pub chunk_size: usize,
    pub close_flush_attempts: usize,
    pub hostname: Arc<str>,
    pub summary: Arc<OnceLock<HandshakeSummary>>,
}

impl<T: Transport> Session<T> {
    pub(crate) fn new(transport: T, engine: Engine, parts: SessionParts) -> Self {
        Self {
            transport,
            engine: Some(engine),
            inbound: CipherBuffer::with_capacity(parts.chunk_size),
            outbound: CipherBuffer::with_capacity(parts.chunk_size),
            state: SessionState::Created,
            handshake_complete: false,
            transport_eof: false,
            eof_fed: false,
            peer_closed: false,
            waiters: Waiters::default(),
            close_flush_attempts: parts.close_flush_attempts,
            close_attempts_left: 0,
            hostname: parts.hostname,
            summary: parts.summary,
        }
    }

    pub(crate) fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    pub(crate) fn has_buffered_plaintext(&self) -> bool {
        self.engine
            .as_ref()
            .is_some_and(Engine::has_buffered_plaintext)
    }

    pub(crate) fn into_transport(self) -> T {
        self.transport
    }

    /// 操作以 `Ready` 结束时清除其 waker 槽位。
    pub(crate) fn settle<R>(&mut self, operation: Operation, poll: Poll<R>) -> Poll<R> {
        if poll.is_ready() {
            self.waiters.clear(operation);
        }
        poll
    }

    pub(crate) fn poll_handshake(
        &mut self,
        cx: &mut Context<'_>,
        operation: Operation,
    ) -> Poll<Result<(), TlsError>> {
        if let Err(err) = self.check_open(operation) {
            return Poll::Ready(Err(err));
        }
        if self.handshake_complete {
            return Poll::Ready(Ok(()));
        }
        if self.state.phase() == SessionPhase::Created {
            debug!(target: TRACE_TARGET, hostname = %self.hostname, "tls handshake started");
            self.state.advance(SessionState::Handshaking);
        }
        loop {
            let report = match self.pump(cx, Operation::Handshake) {
                Ok(report) => report,
                Err(err) => return Poll::Ready(Err(self.terminate(cx, err, operation))),
            };
            if self.handshake_complete {
                // 尽力送出客户端 Finished，阻塞时由后续操作继续刷出。
                if let Err(err) = self.pump(cx, Operation::Handshake) {
                    return Poll::Ready(Err(self.terminate(cx, err, operation)));
                }
                self.waiters.wake_others(operation);
                return Poll::Ready(Ok(()));
            }
            if self.eof_fed {
                let err = TlsError::TransportClosed {
                    operation: Operation::Handshake,
                };
                return Poll::Ready(Err(self.terminate(cx, err, operation)));
            }
            if report.progressed {
                self.waiters.wake_others(operation);
                continue;
            }
            return self.suspend(cx, operation, report);
        }
    }

    pub(crate) fn poll_read(
        &mut self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<Result<usize, TlsError>> {
        match self.poll_handshake(cx, Operation::Read) {
            Poll::Ready(Ok(())) => {}
            other => return other.map_ok(|()| 0),
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        loop {
            let Some(engine) = self.engine.as_mut() else {
                return Poll::Ready(Err(TlsError::StreamClosed));
            };
            match engine.read_plaintext(buf) {
                EngineRead::Data(n) => return Poll::Ready(Ok(n)),
                EngineRead::Closed => {
                    if !self.peer_closed {
                        self.peer_closed = true;
                        debug!(
                            target: TRACE_TARGET,
                            hostname = %self.hostname,
                            "peer sent close_notify"
                        );
                    }
                    return Poll::Ready(Err(TlsError::ConnectionClosed));
                }
                EngineRead::Truncated => {
                    let err = TlsError::TransportClosed {
                        operation: Operation::Read,
                    };
                    return Poll::Ready(Err(self.terminate(cx, err, Operation::Read)));
                }
                EngineRead::WouldBlock => {}
            }
            match self.pump(cx, Operation::Read) {
                Err(err) => return Poll::Ready(Err(self.terminate(cx, err, Operation::Read))),
                Ok(report) if report.progressed => self.waiters.wake_others(Operation::Read),
                Ok(report) => return self.suspend(cx, Operation::Read, report),
            }
        }
    }

    pub(crate) fn poll_write(
        &mut self,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, TlsError>> {
        match self.poll_handshake(cx, Operation::Write) {
            Poll::Ready(Ok(())) => {}
            other => return other.map_ok(|()| 0),
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        loop {
            let Some(engine) = self.engine.as_mut() else {
                return Poll::Ready(Err(TlsError::StreamClosed));
            };
            let accepted = engine.write_plaintext(buf);
            let report = match self.pump(cx, Operation::Write) {
                Ok(report) => report,
                Err(err) => return Poll::Ready(Err(self.terminate(cx, err, Operation::Write))),
            };
            if report.progressed {
                self.waiters.wake_others(Operation::Write);
            }
            match accepted {
                EngineWrite::Accepted(n) => return Poll::Ready(Ok(n)),
                EngineWrite::WouldBlock if report.progressed => continue,
                EngineWrite::WouldBlock => return self.suspend(cx, Operation::Write, report),
            }
        }
    }

    pub(crate) fn poll_flush(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), TlsError>> {
        match self.poll_handshake(cx, Operation::Flush) {
            Poll::Ready(Ok(())) => {}
            other => return other,
        }
        loop {
            let report = match self.pump(cx, Operation::Flush) {
                Ok(report) => report,
                Err(err) => return Poll::Ready(Err(self.terminate(cx, err, Operation::Flush))),
            };
            if self.outbound_drained() {
                return match self.transport.poll_flush(cx) {
                    Poll::Ready(Ok(())) => Poll::Ready(Ok(())),
                    Poll::Ready(Err(err)) => {
                        let err = transport_failure(Operation::Flush, err);
                        Poll::Ready(Err(self.terminate(cx, err, Operation::Flush)))
                    }
                    Poll::Pending => {
                        self.waiters.register(Operation::Flush, cx.waker());
                        Poll::Pending
                    }
                };
            }
            if report.progressed {
                self.waiters.wake_others(Operation::Flush);
                continue;
            }
            return self.suspend(cx, Operation::Flush, report);
        }
    }

    pub(crate) fn poll_close(&mut self, cx: &mut Context<'_>) -> Poll<CloseOutcome> {
        match self.state.phase() {
            SessionPhase::Closed | SessionPhase::Failed => {
                return Poll::Ready(CloseOutcome::AlreadyClosed);
            }
            SessionPhase::Created => {
                // 尚未发出任何字节，直接释放。
                return Poll::Ready(self.finish_close(CloseOutcome::Flushed));
            }
            SessionPhase::Handshaking | SessionPhase::Established => {
                if let Some(engine) = self.engine.as_mut() {
                    engine.initiate_close();
                }
                self.state.advance(SessionState::Closing);
                self.close_attempts_left = self.close_flush_attempts;
                debug!(target: TRACE_TARGET, hostname = %self.hostname, "close_notify queued");
            }
            SessionPhase::Closing => {}
        }

        loop {
            if self.close_attempts_left == 0 {
                warn!(
                    target: TRACE_TARGET,
                    hostname = %self.hostname,
                    pending = self.outbound.pending().len(),
                    "close_notify flush budget exhausted; abandoning"
                );
                return Poll::Ready(self.finish_close(CloseOutcome::Abandoned));
            }
            self.close_attempts_left -= 1;

            let mut report = PumpReport::default();
            if let Err(err) = self.flush_outbound(cx, Operation::Close, &mut report) {
                warn!(
                    target: TRACE_TARGET,
                    hostname = %self.hostname,
                    code = err.code(),
                    error = %err,
                    "close_notify flush failed"
                );
                return Poll::Ready(self.finish_close(CloseOutcome::Abandoned));
            }
            if self.outbound_drained() {
                if let Poll::Ready(Err(err)) = self.transport.poll_flush(cx) {
                    warn!(
                        target: TRACE_TARGET,
                        hostname = %self.hostname,
                        error = %err,
                        "transport flush after close_notify failed"
                    );
                    return Poll::Ready(self.finish_close(CloseOutcome::Abandoned));
                }
                return Poll::Ready(self.finish_close(CloseOutcome::Flushed));
            }
            if self.close_attempts_left == 0 || !report.blocked() {
                continue;
            }
            self.waiters.register(Operation::Close, cx.waker());
            return Poll::Pending;
        }
    }

    /// 单轮泵：刷出、读入、推进。
    pub(crate) fn pump(
        &mut self,
        cx: &mut Context<'_>,
        operation: Operation,
    ) -> Result<PumpReport, TlsError> {
        let mut report = PumpReport::default();
        self.flush_outbound(cx, operation, &mut report)?;
        if !self.handshake_complete || operation == Operation::Read {
            self.fill_inbound(cx, operation, &mut report)?;
        }

        let Some(engine) = self.engine.as_mut() else {
            return Err(TlsError::StreamClosed);
        };
        let fed = engine
            .feed_inbound(&mut self.inbound)
            .map_err(|err| TlsError::Protocol {
                operation,
                source: RustlsError::General(err.to_string()),
            })?;
        if fed > 0 {
            report.progressed = true;
        }
        if self.transport_eof && !self.eof_fed && self.inbound.is_empty() {
            engine.feed_eof();
            self.eof_fed = true;
            report.progressed = true;
        }

        if !self.handshake_complete {
            match engine.continue_handshake() {
                HandshakeStep::StillHandshaking => {}
                HandshakeStep::Complete => {
                    self.complete_handshake();
                    report.progressed = true;
                }
                HandshakeStep::Failed(err) => return Err(err),
            }
        } else {
            engine
                .process_records()
                .map_err(|source| TlsError::Protocol { operation, source })?;
        }
        Ok(report)
    }

    fn flush_outbound(
        &mut self,
        cx: &mut Context<'_>,
        operation: Operation,
        report: &mut PumpReport,
    ) -> Result<(), TlsError> {
        loop {
            if self.outbound.is_empty() {
                let Some(engine) = self.engine.as_mut() else {
                    return Ok(());
                };
                if engine.drain_outbound(&mut self.outbound) == 0 {
                    return Ok(());
                }
            }
            match self.transport.try_write(cx, self.outbound.pending()) {
                Ok(IoOutcome::Transferred(n)) => {
                    self.outbound.consume(n);
                    report.progressed = true;
                }
                Ok(IoOutcome::WouldBlock) => {
                    report.write_blocked = true;
                    return Ok(());
                }
                Ok(IoOutcome::Closed) => return Err(TlsError::TransportClosed { operation }),
                Err(err) => return Err(TlsError::transport(operation, err)),
            }
        }
    }

    fn fill_inbound(
        &mut self,
        cx: &mut Context<'_>,
        operation: Operation,
        report: &mut PumpReport,
    ) -> Result<(), TlsError> {
        if self.transport_eof || self.inbound.is_full() {
            return Ok(());
        }
        match self.transport.try_read(cx, self.inbound.spare_mut()) {
            Ok(IoOutcome::Transferred(n)) => {
                self.inbound.commit(n);
                report.progressed = true;
            }
            Ok(IoOutcome::WouldBlock) => report.read_blocked = true,
            Ok(IoOutcome::Closed) => {
                debug!(target: TRACE_TARGET, hostname = %self.hostname, "transport reached eof");
                self.transport_eof = true;
                report.progressed = true;
            }
            Err(err) => return Err(TlsError::transport(operation, err)),
        }
        Ok(())
    }

    fn complete_handshake(&mut self) {
        self.handshake_complete = true;
        self.state.advance(SessionState::Established);
        if let Some(engine) = self.engine.as_ref() {
            let summary = engine.summary();
            debug!(
                target: TRACE_TARGET,
                hostname = %self.hostname,
                version = ?summary.protocol_version,
                cipher_suite = ?summary.cipher_suite,
                "tls handshake complete"
            );
            let _ = self.summary.set(summary);
        }
    }

    fn outbound_drained(&self) -> bool {
        self.outbound.is_empty() && !self.engine.as_ref().is_some_and(Engine::wants_write)
    }

    fn check_open(&mut self, operation: Operation) -> Result<(), TlsError> {
        if self.state.phase() == SessionPhase::Closed
            && self.waiters.take_transport_closed(operation)
        {
            return Err(TlsError::TransportClosed { operation });
        }
        match self.state.terminal_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn suspend<R>(
        &mut self,
        cx: &mut Context<'_>,
        operation: Operation,
        report: PumpReport,
    ) -> Poll<R> {
        self.waiters.register(operation, cx.waker());
        if !report.blocked() {
            cx.waker().wake_by_ref();
        }
        Poll::Pending
    }

    /// 把泵返回的错误落实为终态，并返回应交给调用方的错误。
    fn terminate(&mut self, cx: &mut Context<'_>, err: TlsError, operation: Operation) -> TlsError {
        match err {
            TlsError::TransportClosed { .. } => {
                debug!(
                    target: TRACE_TARGET,
                    hostname = %self.hostname,
                    phase = ?self.state.phase(),
                    "transport closed; session closed"
                );
                self.engine = None;
                self.state.advance(SessionState::Closed);
                self.waiters.wake_all_transport_closed(operation);
            }
            _ => {
                if matches!(err, TlsError::HandshakeFailed { .. } | TlsError::Protocol { .. }) {
                    // 尽力把引擎排队的告警送给对端。
                    let mut report = PumpReport::default();
                    let _ = self.flush_outbound(cx, operation, &mut report);
                }
                warn!(
                    target: TRACE_TARGET,
                    hostname = %self.hostname,
                    phase = ?self.state.phase(),
                    code = err.code(),
                    error = %err,
                    "tls session failed"
                );
                self.engine = None;
                self.state.advance(SessionState::Failed(err.clone()));
                self.waiters.wake_all();
            }
        }
        err
    }

    fn finish_close(&mut self, outcome: CloseOutcome) -> CloseOutcome {
        self.engine = None;
        self.state.advance(SessionState::Closed);
        self.waiters.wake_all();
        debug!(target: TRACE_TARGET, hostname = %self.hostname, ?outcome, "tls session closed");
        outcome
    }
}

fn transport_failure(operation: Operation, err: io::Error) -> TlsError {
    if is_closed_kind(err.kind()) {
        TlsError::TransportClosed { operation }
    } else {
        TlsError::transport(operation, err)
    }
}
