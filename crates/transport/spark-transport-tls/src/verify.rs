use std::{fmt, sync::Arc};

use rustls::{
    CertificateError, DigitallySignedStruct, Error as RustlsError, OtherError, RootCertStore,
    SignatureScheme,
    client::{
        WebPkiServerVerifier,
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    },
    crypto::{
        CryptoProvider, WebPkiSupportedAlgorithms, verify_tls12_signature, verify_tls13_signature,
    },
    pki_types::{CertificateDer, ServerName, UnixTime},
};

use crate::error::TlsError;

/// 证书校验钩子。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 证书信任策略因部署而异（公共 CA、私有 PKI、证书固定），流本身只需要“接受/拒绝”这一个决定；
/// - 以 trait 暴露钩子，调用方可以替换策略而不触碰握手与泵的实现。
///
/// ## 契约（What）
/// - 入参：对端叶子证书、中间证书链、目标主机名、当前时间；
/// - 返回 `Err(CertificateError)` 即拒绝，握手以 `HandshakeFailed(CertificateRejected)` 终止；
/// - 握手签名仍由加密提供者的算法集校验，钩子只负责证书本身。
pub trait CertificateVerifier: fmt::Debug + Send + Sync {
    fn verify(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        hostname: &str,
        now: UnixTime,
    ) -> Result<(), CertificateError>;
}

/// 默认校验器：webpki 链校验 + 主机名校验。
#[derive(Debug, Clone)]
pub struct WebPkiVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl WebPkiVerifier {
    /// 以给定根证书集合构造；根证书为空时返回配置错误。
    pub fn new(roots: RootCertStore) -> Result<Self, TlsError> {
        Self::with_provider(roots, Arc::new(rustls::crypto::ring::default_provider()))
    }

    pub(crate) fn with_provider(
        roots: RootCertStore,
        provider: Arc<CryptoProvider>,
    ) -> Result<Self, TlsError> {
        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(|err| TlsError::Configuration {
                reason: err.to_string(),
            })?;
        Ok(Self { inner })
    }
}

impl CertificateVerifier for WebPkiVerifier {
    fn verify(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        hostname: &str,
        now: UnixTime,
    ) -> Result<(), CertificateError> {
        let server_name =
            ServerName::try_from(hostname).map_err(|_| CertificateError::NotValidForName)?;
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, &server_name, &[], now)
        {
            Ok(_) => Ok(()),
            Err(RustlsError::InvalidCertificate(err)) => Err(err),
            Err(other) => Err(CertificateError::Other(OtherError(Arc::new(other)))),
        }
    }
}

/// 接受任何证书；仅在显式关闭证书校验时使用。
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAnyCertificate;

impl CertificateVerifier for AcceptAnyCertificate {
    fn verify(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _hostname: &str,
        _now: UnixTime,
    ) -> Result<(), CertificateError> {
        Ok(())
    }
}

/// 把 [`CertificateVerifier`] 接入 rustls 的 `ServerCertVerifier`。
#[derive(Debug)]
pub(crate) struct VerifierBridge {
    hook: Arc<dyn CertificateVerifier>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl VerifierBridge {
    pub(crate) fn new(hook: Arc<dyn CertificateVerifier>, provider: &CryptoProvider) -> Self {
        Self {
            hook,
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for VerifierBridge {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, RustlsError> {
        let hostname = server_name.to_str();
        self.hook
            .verify(end_entity, intermediates, &hostname, now)
            .map(|()| ServerCertVerified::assertion())
            .map_err(RustlsError::InvalidCertificate)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
