//! 集成测试共享夹具：rcgen 证书链、确定性服务端对端与无操作 waker 驱动器。
#![allow(dead_code)]

use std::{
    io::{self, Read, Write},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll, Waker},
};

use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use spark_transport::{IoOutcome, MemoryTransport, Transport, TransportExt};
use spark_transport_tls::{
    TlsClientConfig, TlsClientConfigBuilder, TlsStream,
    rustls::{
        self, ServerConfig, ServerConnection, SupportedProtocolVersion,
        pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
    },
};

pub const HOSTNAME: &str = "example.test";

/// 驱动器的最大轮数；一字节粒度的握手也远低于此值。
pub const MAX_ROUNDS: usize = 200_000;

/// 一套测试 PKI：自签 CA + 由其签发的 `example.test` 叶子证书。
pub struct Pki {
    pub ca: CertificateDer<'static>,
    pub leaf: CertificateDer<'static>,
    leaf_key: Vec<u8>,
}

impl Pki {
    pub fn generate() -> Self {
        Self::generate_for(&[HOSTNAME])
    }

    pub fn generate_for(names: &[&str]) -> Self {
        let ca_key = KeyPair::generate().expect("生成 CA 密钥失败");
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).expect("CA 参数无效");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "spark transport test ca");
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca_cert = ca_params.self_signed(&ca_key).expect("签发 CA 失败");

        let leaf_key = KeyPair::generate().expect("生成叶子密钥失败");
        let names: Vec<String> = names.iter().map(|name| (*name).to_owned()).collect();
        let mut leaf_params = CertificateParams::new(names).expect("叶子参数无效");
        leaf_params
            .distinguished_name
            .push(DnType::CommonName, "spark transport test leaf");
        leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let leaf = leaf_params
            .signed_by(&leaf_key, &ca_cert, &ca_key)
            .expect("签发叶子证书失败");

        Self {
            ca: ca_cert.der().clone(),
            leaf: leaf.der().clone(),
            leaf_key: leaf_key.serialize_der(),
        }
    }

    pub fn server_config(
        &self,
        versions: &[&'static SupportedProtocolVersion],
    ) -> Arc<ServerConfig> {
        self.server_config_with_alpn(versions, Vec::new())
    }

    pub fn server_config_with_alpn(
        &self,
        versions: &[&'static SupportedProtocolVersion],
        alpn: Vec<Vec<u8>>,
    ) -> Arc<ServerConfig> {
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.leaf_key.clone()));
        let mut config =
            ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_protocol_versions(versions)
                .expect("服务端协议版本无效")
                .with_no_client_auth()
                .with_single_cert(vec![self.leaf.clone(), self.ca.clone()], key)
                .expect("服务端证书无效");
        config.alpn_protocols = alpn;
        Arc::new(config)
    }

    /// 信任本 CA 的客户端配置建造器。
    pub fn client_builder(&self) -> TlsClientConfigBuilder {
        TlsClientConfig::builder().with_root_certificate(self.ca.clone())
    }

    pub fn client_config(&self) -> TlsClientConfig {
        self.client_builder().build().expect("客户端配置无效")
    }
}

/// 在内存管道另一端运行的同步 rustls 服务端。
pub struct ServerPeer {
    pub conn: ServerConnection,
    pub transport: MemoryTransport,
    pub received: Vec<u8>,
    pub saw_close_notify: bool,
    pub error: Option<rustls::Error>,
    outgoing: Vec<u8>,
    eof: bool,
}

impl ServerPeer {
    pub fn new(config: Arc<ServerConfig>, transport: MemoryTransport) -> Self {
        Self {
            conn: ServerConnection::new(config).expect("创建服务端连接失败"),
            transport,
            received: Vec::new(),
            saw_close_notify: false,
            error: None,
            outgoing: Vec::new(),
            eof: false,
        }
    }

    /// 推进服务端直到没有进展：读入密文、收取明文、写出密文。
    pub fn pump(&mut self) {
        let mut cx = Context::from_waker(Waker::noop());
        let mut buf = [0u8; 4096];
        loop {
            let mut progressed = false;

            if self.error.is_none() && !self.eof {
                match self.transport.try_read(&mut cx, &mut buf) {
                    Ok(IoOutcome::Transferred(n)) => {
                        progressed = true;
                        let mut slice = &buf[..n];
                        while !slice.is_empty() && self.error.is_none() {
                            if self.conn.read_tls(&mut slice).is_err() {
                                break;
                            }
                            if let Err(err) = self.conn.process_new_packets() {
                                self.error = Some(err);
                            }
                        }
                    }
                    Ok(IoOutcome::WouldBlock) => {}
                    Ok(IoOutcome::Closed) | Err(_) => {
                        self.eof = true;
                        let _ = self.conn.read_tls(&mut io::empty());
                        if let Err(err) = self.conn.process_new_packets() {
                            self.error = Some(err);
                        }
                    }
                }
            }

            loop {
                match self.conn.reader().read(&mut buf) {
                    Ok(0) => {
                        self.saw_close_notify = true;
                        break;
                    }
                    Ok(n) => {
                        self.received.extend_from_slice(&buf[..n]);
                        progressed = true;
                    }
                    Err(_) => break,
                }
            }

            while self.conn.wants_write() {
                match self.conn.write_tls(&mut self.outgoing) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            while !self.outgoing.is_empty() {
                match self.transport.try_write(&mut cx, &self.outgoing) {
                    Ok(IoOutcome::Transferred(n)) => {
                        self.outgoing.drain(..n);
                        progressed = true;
                    }
                    Ok(IoOutcome::WouldBlock) => break,
                    Ok(IoOutcome::Closed) | Err(_) => {
                        self.outgoing.clear();
                        break;
                    }
                }
            }

            if !progressed {
                return;
            }
        }
    }

    /// 排入一段明文，下一次 `pump` 时发送。
    pub fn send(&mut self, data: &[u8]) {
        self.conn.writer().write_all(data).expect("服务端明文写入失败");
    }

    pub fn send_close_notify(&mut self) {
        self.conn.send_close_notify();
    }

    pub fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }
}

/// 统计被轮询次数的传输包装，用于断言“未触碰传输”。
#[derive(Debug)]
pub struct Probe {
    inner: MemoryTransport,
    polls: Arc<AtomicUsize>,
}

impl Probe {
    pub fn new(inner: MemoryTransport) -> (Self, Arc<AtomicUsize>) {
        let polls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner,
                polls: polls.clone(),
            },
            polls,
        )
    }
}

impl Transport for Probe {
    fn poll_read(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.inner.poll_read(cx, buf)
    }

    fn poll_write(&mut self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.inner.poll_write(cx, buf)
    }
}

/// 交替轮询客户端操作与服务端泵，直到操作完成。
pub fn drive<R>(server: &mut ServerPeer, mut op: impl FnMut(&mut Context<'_>) -> Poll<R>) -> R {
    let mut cx = Context::from_waker(Waker::noop());
    for _ in 0..MAX_ROUNDS {
        if let Poll::Ready(output) = op(&mut cx) {
            return output;
        }
        server.pump();
    }
    panic!("操作在 {MAX_ROUNDS} 轮内未完成");
}

/// 建立一条已完成握手的客户端流与对应的服务端。
pub fn established(
    pki: &Pki,
    config: &TlsClientConfig,
    capacity: usize,
) -> (TlsStream<MemoryTransport>, ServerPeer) {
    let (client, server) = MemoryTransport::pair(capacity);
    let stream = TlsStream::connect(client, HOSTNAME, config).expect("创建客户端流失败");
    let mut peer = ServerPeer::new(pki.server_config(rustls::DEFAULT_VERSIONS), server);
    drive(&mut peer, |cx| stream.poll_handshake(cx)).expect("握手失败");
    // 把客户端 Finished 送达服务端，使其也进入已建立状态。
    drive(&mut peer, |cx| stream.poll_flush(cx)).expect("刷新失败");
    peer.pump();
    assert!(!peer.is_handshaking(), "服务端应已完成握手");
    (stream, peer)
}

/// 把整段明文写入客户端流并刷出。
pub fn write_all_driven<T: Transport>(stream: &TlsStream<T>, server: &mut ServerPeer, data: &[u8]) {
    let mut offset = 0;
    while offset < data.len() {
        offset += drive(server, |cx| stream.poll_write(cx, &data[offset..])).expect("写入失败");
    }
    drive(server, |cx| stream.poll_flush(cx)).expect("刷新失败");
    server.pump();
}

/// 从客户端流读取恰好 `len` 字节。
pub fn read_exact_driven<T: Transport>(
    stream: &TlsStream<T>,
    server: &mut ServerPeer,
    len: usize,
) -> Vec<u8> {
    let mut out = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        filled += drive(server, |cx| stream.poll_read(cx, &mut out[filled..])).expect("读取失败");
    }
    out
}
