use std::{fmt, sync::Arc};

use rustls::{ClientConfig, RootCertStore, SupportedProtocolVersion, pki_types::CertificateDer};
use tracing::warn;

use crate::{
    TRACE_TARGET,
    buffer::DEFAULT_CHUNK_SIZE,
    error::TlsError,
    verify::{AcceptAnyCertificate, CertificateVerifier, VerifierBridge, WebPkiVerifier},
};

/// 引擎发送队列的默认上限。
pub const DEFAULT_SEND_BUFFER_LIMIT: usize = 64 * 1024;

/// 关闭时刷新 close_notify 的默认尝试次数。
pub const DEFAULT_CLOSE_FLUSH_ATTEMPTS: usize = 1;

/// 已固化的 TLS 客户端配置。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 每条连接只读取配置，不修改；构建完成后整体不可变，可被 [`TlsConnector`](crate::TlsConnector)
///   放入 `ArcSwap` 原子替换，已建立的连接不受影响。
///
/// ## 契约（What）
/// - `rustls_config`：握手所用的 `rustls::ClientConfig`，已接入证书校验钩子；
/// - `chunk_size`：密文暂存区容量，即单次引擎 I/O 的字节上限；
/// - `send_buffer_limit`：引擎发送队列上限，超过后写入返回部分接受；
/// - `close_flush_attempts`：关闭时最多进行几轮非阻塞刷新。
#[derive(Clone)]
pub struct TlsClientConfig {
    rustls: Arc<ClientConfig>,
    chunk_size: usize,
    send_buffer_limit: usize,
    close_flush_attempts: usize,
    verifies_certificates: bool,
}

impl TlsClientConfig {
    pub fn builder() -> TlsClientConfigBuilder {
        TlsClientConfigBuilder::new()
    }

    pub fn rustls_config(&self) -> &Arc<ClientConfig> {
        &self.rustls
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn send_buffer_limit(&self) -> usize {
        self.send_buffer_limit
    }

    pub fn close_flush_attempts(&self) -> usize {
        self.close_flush_attempts
    }

    pub fn verifies_certificates(&self) -> bool {
        self.verifies_certificates
    }
}

impl fmt::Debug for TlsClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsClientConfig")
            .field("alpn_protocols", &self.rustls.alpn_protocols)
            .field("enable_sni", &self.rustls.enable_sni)
            .field("chunk_size", &self.chunk_size)
            .field("send_buffer_limit", &self.send_buffer_limit)
            .field("close_flush_attempts", &self.close_flush_attempts)
            .field("verifies_certificates", &self.verifies_certificates)
            .finish()
    }
}

/// [`TlsClientConfig`] 的建造器。
///
/// # 教案级注释
///
/// ## 逻辑（How）
/// - 所有 `with_*` 方法按值链式调用，只记录意图；校验与 rustls 配置的组装集中在 [`build`](Self::build)；
/// - 加密提供者固定为 `ring`，通过 `builder_with_provider` 显式选择，避免依赖进程级默认提供者；
/// - 证书校验一律经由 [`CertificateVerifier`] 钩子：未指定时使用 [`WebPkiVerifier`]，
///   关闭校验时使用 [`AcceptAnyCertificate`] 并输出告警日志。
///
/// ## 契约（What）
/// - 默认：TLS1.3 + TLS1.2、启用 SNI、无 ALPN、块大小 512、发送上限 64 KiB、关闭刷新 1 轮；
/// - `build` 在以下情况返回 [`TlsError::Configuration`]：块大小为 0、协议版本为空、
///   开启校验却没有根证书也没有自定义校验器、根证书无法解析。
pub struct TlsClientConfigBuilder {
    roots: RootCertStore,
    extra_roots: Vec<CertificateDer<'static>>,
    verifier: Option<Arc<dyn CertificateVerifier>>,
    verify_certificates: bool,
    protocol_versions: Vec<&'static SupportedProtocolVersion>,
    alpn_protocols: Vec<Vec<u8>>,
    enable_sni: bool,
    chunk_size: usize,
    send_buffer_limit: usize,
    close_flush_attempts: usize,
}

impl Default for TlsClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TlsClientConfigBuilder {
    pub fn new() -> Self {
        Self {
            roots: RootCertStore::empty(),
            extra_roots: Vec::new(),
            verifier: None,
            verify_certificates: true,
            protocol_versions: rustls::DEFAULT_VERSIONS.to_vec(),
            alpn_protocols: Vec::new(),
            enable_sni: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            send_buffer_limit: DEFAULT_SEND_BUFFER_LIMIT,
            close_flush_attempts: DEFAULT_CLOSE_FLUSH_ATTEMPTS,
        }
    }

    /// 使用整套根证书替换当前集合。
    pub fn with_root_store(mut self, roots: RootCertStore) -> Self {
        self.roots = roots;
        self
    }

    /// 追加一张 DER 编码的根证书。
    pub fn with_root_certificate(mut self, certificate: CertificateDer<'static>) -> Self {
        self.extra_roots.push(certificate);
        self
    }

    /// 使用自定义证书校验钩子，替代默认的 webpki 校验。
    pub fn with_verifier(mut self, verifier: Arc<dyn CertificateVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// 开关证书校验；关闭后接受任何证书。
    pub fn with_certificate_verification(mut self, enabled: bool) -> Self {
        self.verify_certificates = enabled;
        self
    }

    pub fn with_protocol_versions(
        mut self,
        versions: &[&'static SupportedProtocolVersion],
    ) -> Self {
        self.protocol_versions = versions.to_vec();
        self
    }

    /// 握手时按顺序提供的 ALPN 协议列表。
    pub fn with_alpn_protocols<I, P>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Vec<u8>>,
    {
        self.alpn_protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sni(mut self, enabled: bool) -> Self {
        self.enable_sni = enabled;
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn with_send_buffer_limit(mut self, limit: usize) -> Self {
        self.send_buffer_limit = limit;
        self
    }

    pub fn with_close_flush_attempts(mut self, attempts: usize) -> Self {
        self.close_flush_attempts = attempts;
        self
    }

    pub fn build(self) -> Result<TlsClientConfig, TlsError> {
        if self.chunk_size == 0 {
            return Err(invalid("块大小必须大于 0"));
        }
        if self.protocol_versions.is_empty() {
            return Err(invalid("至少需要启用一个协议版本"));
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let hook: Arc<dyn CertificateVerifier> = if !self.verify_certificates {
            warn!(
                target: TRACE_TARGET,
                "certificate verification disabled; any server certificate will be accepted"
            );
            Arc::new(AcceptAnyCertificate)
        } else if let Some(verifier) = self.verifier {
            verifier
        } else {
            let mut roots = self.roots;
            for certificate in self.extra_roots {
                roots
                    .add(certificate)
                    .map_err(|err| invalid(format!("根证书无法解析：{err}")))?;
            }
            Arc::new(WebPkiVerifier::with_provider(roots, provider.clone())?)
        };
        let bridge = VerifierBridge::new(hook, &provider);

        let mut rustls = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&self.protocol_versions)
            .map_err(|err| invalid(err.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(bridge))
            .with_no_client_auth();
        rustls.alpn_protocols = self.alpn_protocols;
        rustls.enable_sni = self.enable_sni;

        Ok(TlsClientConfig {
            rustls: Arc::new(rustls),
            chunk_size: self.chunk_size,
            send_buffer_limit: self.send_buffer_limit,
            close_flush_attempts: self.close_flush_attempts,
            verifies_certificates: self.verify_certificates,
        })
    }
}

fn invalid(reason: impl Into<String>) -> TlsError {
    TlsError::Configuration {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[test]
    fn defaults_follow_documented_values() {
        let config = TlsClientConfig::builder()
            .with_certificate_verification(false)
            .build()
            .expect("关闭校验时应能构建");
        assert_eq!(config.chunk_size(), 512);
        assert_eq!(config.send_buffer_limit(), 64 * 1024);
        assert_eq!(config.close_flush_attempts(), 1);
        assert!(!config.verifies_certificates());
        assert!(config.rustls_config().enable_sni);
        assert!(config.rustls_config().alpn_protocols.is_empty());
    }

    #[test]
    fn verification_without_trust_anchors_is_rejected() {
        let err = TlsClientConfig::builder()
            .build()
            .expect_err("没有根证书时不应构建成功");
        assert!(matches!(err, TlsError::Configuration { .. }));
        assert_eq!(err.category(), ErrorCategory::Usage);
    }

    #[test]
    fn invalid_sizes_and_versions_are_rejected() {
        let zero_chunk = TlsClientConfig::builder()
            .with_certificate_verification(false)
            .with_chunk_size(0)
            .build();
        assert!(matches!(zero_chunk, Err(TlsError::Configuration { .. })));

        let no_versions = TlsClientConfig::builder()
            .with_certificate_verification(false)
            .with_protocol_versions(&[])
            .build();
        assert!(matches!(no_versions, Err(TlsError::Configuration { .. })));
    }

    #[test]
    fn alpn_and_sni_are_forwarded_to_engine_config() {
        let config = TlsClientConfig::builder()
            .with_certificate_verification(false)
            .with_alpn_protocols(["h2", "http/1.1"])
            .with_sni(false)
            .build()
            .expect("构建失败");
        assert_eq!(
            config.rustls_config().alpn_protocols,
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        );
        assert!(!config.rustls_config().enable_sni);
    }
}
