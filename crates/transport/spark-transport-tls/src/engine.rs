use std::{
    io::{self, Read, Write},
    sync::Arc,
};

use rustls::{
    CipherSuite, ClientConfig, ClientConnection, ProtocolVersion,
    pki_types::{CertificateDer, ServerName},
};

use crate::{buffer::CipherBuffer, error::TlsError};

/// 握手推进一步后的结果。
#[derive(Debug)]
pub(crate) enum HandshakeStep {
    StillHandshaking,
    Complete,
    Failed(TlsError),
}

/// 从引擎读取明文的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EngineRead {
    Data(usize),
    WouldBlock,
    /// 对端发送了 close_notify，且明文已读尽。
    Closed,
    /// 传输在没有 close_notify 的情况下结束。
    Truncated,
}

/// 向引擎提交明文的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EngineWrite {
    Accepted(usize),
    WouldBlock,
}

/// 握手完成后固化的协商结果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakeSummary {
    pub protocol_version: Option<ProtocolVersion>,
    pub cipher_suite: Option<CipherSuite>,
    pub peer_certificates: Vec<CertificateDer<'static>>,
    pub alpn_protocol: Option<Vec<u8>>,
}

/// 以内存缓冲为输入输出的同步 TLS 引擎。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - `rustls::ClientConnection` 本身不做任何 I/O，只接受 `io::Read`/`io::Write`；
///   把它绑定在 [`CipherBuffer`] 上，引擎就与具体传输解耦，由泵决定何时搬运字节。
///
/// ## 逻辑（How）
/// - `drain_outbound`：循环 `write_tls` 直到引擎无数据或缓冲写满；
/// - `feed_inbound`：仅在引擎 `wants_read` 时调用一次 `read_tls`，未被吞下的字节留在缓冲中；
/// - `continue_handshake`/`process_records`：调用 `process_new_packets` 推进状态机；
/// - `read_plaintext`/`write_plaintext`：把 rustls 的 `WouldBlock`/`UnexpectedEof`/`Ok(0)` 语义
///   翻译为显式枚举。
///
/// ## 契约（What）
/// - 引擎出错后，rustls 会把告警排入发送队列，调用方仍可 `drain_outbound` 尽力送出；
/// - `write_plaintext` 受 `send_limit` 约束，可能只接受部分字节。
///
/// ## 风险与权衡（Trade-offs）
/// - 每次 `feed_inbound` 至多喂一次 `read_tls`，多余字节等下一轮泵再喂，换取 rustls 内部缓冲不越界。
#[derive(Debug)]
pub(crate) struct Engine {
    conn: ClientConnection,
    buffered_plaintext: usize,
}

impl Engine {
    pub(crate) fn new(
        config: Arc<ClientConfig>,
        hostname: &str,
        send_limit: usize,
    ) -> Result<Self, TlsError> {
        let server_name = ServerName::try_from(hostname.to_owned()).map_err(|_| {
            TlsError::InvalidHostname {
                hostname: hostname.to_owned(),
            }
        })?;
        let mut conn =
            ClientConnection::new(config, server_name).map_err(|err| TlsError::Configuration {
                reason: err.to_string(),
            })?;
        conn.set_buffer_limit(Some(send_limit));
        Ok(Self {
            conn,
            buffered_plaintext: 0,
        })
    }

    /// 把排队中的密文抽取到 `outbound`，返回抽取的字节数。
    pub(crate) fn drain_outbound(&mut self, outbound: &mut CipherBuffer) -> usize {
        let mut total = 0;
        while self.conn.wants_write() && !outbound.is_full() {
            match self.conn.write_tls(outbound) {
                Ok(0) | Err(_) => break,
                Ok(n) => total += n,
            }
        }
        total
    }

    /// 把 `inbound` 中暂存的密文喂给引擎，返回被吞下的字节数。
    pub(crate) fn feed_inbound(&mut self, inbound: &mut CipherBuffer) -> io::Result<usize> {
        if inbound.is_empty() || !self.conn.wants_read() {
            return Ok(0);
        }
        self.conn.read_tls(inbound)
    }

    /// 告知引擎传输已到达 EOF。
    pub(crate) fn feed_eof(&mut self) {
        let _ = self.conn.read_tls(&mut io::empty());
    }

    pub(crate) fn continue_handshake(&mut self) -> HandshakeStep {
        match self.process_records() {
            Err(err) => HandshakeStep::Failed(TlsError::handshake(err)),
            Ok(()) if self.conn.is_handshaking() => HandshakeStep::StillHandshaking,
            Ok(()) => HandshakeStep::Complete,
        }
    }

    pub(crate) fn process_records(&mut self) -> Result<(), rustls::Error> {
        let state = self.conn.process_new_packets()?;
        self.buffered_plaintext = state.plaintext_bytes_to_read();
        Ok(())
    }

    pub(crate) fn read_plaintext(&mut self, buf: &mut [u8]) -> EngineRead {
        match self.conn.reader().read(buf) {
            Ok(0) if !buf.is_empty() => EngineRead::Closed,
            Ok(n) => {
                self.buffered_plaintext = self.buffered_plaintext.saturating_sub(n);
                EngineRead::Data(n)
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => EngineRead::WouldBlock,
            // rustls 的明文读取器只会额外返回 UnexpectedEof。
            Err(_) => EngineRead::Truncated,
        }
    }

    pub(crate) fn write_plaintext(&mut self, buf: &[u8]) -> EngineWrite {
        match self.conn.writer().write(buf) {
            Ok(0) if !buf.is_empty() => EngineWrite::WouldBlock,
            Ok(n) => EngineWrite::Accepted(n),
            Err(_) => EngineWrite::WouldBlock,
        }
    }

    /// 把 close_notify 排入发送队列。
    pub(crate) fn initiate_close(&mut self) {
        self.conn.send_close_notify();
    }

    pub(crate) fn wants_write(&self) -> bool {
        self.conn.wants_write()
    }

    pub(crate) fn summary(&self) -> HandshakeSummary {
        HandshakeSummary {
            protocol_version: self.conn.protocol_version(),
            cipher_suite: self.conn.negotiated_cipher_suite().map(|suite| suite.suite()),
            peer_certificates: self
                .conn
                .peer_certificates()
                .map(|chain| chain.to_vec())
                .unwrap_or_default(),
            alpn_protocol: self.conn.alpn_protocol().map(<[u8]>::to_vec),
        }
    }

    /// 引擎内是否还有已解密但未被消费者取走的明文。
    pub(crate) fn has_buffered_plaintext(&self) -> bool {
        self.buffered_plaintext > 0
    }
}
