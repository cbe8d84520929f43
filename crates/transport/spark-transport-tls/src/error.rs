use std::{fmt, io, sync::Arc};

use rustls::{AlertDescription, Error as RustlsError};
use thiserror::Error;

/// TLS 客户端流的错误分类模块。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把 `rustls`/IO 层的失败统一折叠为 [`TlsError`]，并给出稳定错误码与 [`ErrorCategory`]，
///   让调用方无需解析底层库细节即可区分“网络问题 / 信任问题 / 协议问题 / 用法问题”；
/// - 每个终止性错误都携带触发它的阶段（[`Operation`]）与原因，运维脚本据此定位故障。
///
/// ## 逻辑（How）
/// - `OperationKind` 描述一类操作（握手/读/写/刷新/关闭）的错误码与默认文案；
/// - [`HandshakeFailure::classify`] 将握手期间的 `rustls::Error` 归入三类原因；
///   `alert_to_failure` 针对 TLS Alert 进一步细化；
/// - [`TlsError::category`] 按变体给出分类，`Protocol`/`HandshakeFailed` 再结合原因细分。
///
/// ## 契约（What）
/// - [`TlsError`] 实现 `Clone`：同一个终止性错误会原样返回给触发者以及之后的所有调用；
/// - `code()` 返回的字符串保持稳定，可直接用于日志检索与告警规则；
/// - `From<TlsError> for io::Error` 供 Tokio 桥接层使用，底层 IO 错误的 `kind` 会被保留。
///
/// ## 风险与权衡（Trade-offs）
/// - `rustls::Error::General`/`Other` 等泛型错误归为 `ProtocolAlert(None)`，避免误判为信任事件；
/// - `rustls::Error` 为 `non_exhaustive`，未穷举的变体统一落入协议类，后续可在此集中扩展。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const HANDSHAKE: OperationKind = OperationKind {
    code: "spark.transport.tls.handshake_failed",
    message: "tls handshake",
};

pub(crate) const READ: OperationKind = OperationKind {
    code: "spark.transport.tls.read_failed",
    message: "tls read",
};

pub(crate) const WRITE: OperationKind = OperationKind {
    code: "spark.transport.tls.write_failed",
    message: "tls write",
};

pub(crate) const FLUSH: OperationKind = OperationKind {
    code: "spark.transport.tls.flush_failed",
    message: "tls flush",
};

pub(crate) const CLOSE: OperationKind = OperationKind {
    code: "spark.transport.tls.close_failed",
    message: "tls close",
};

const TRANSPORT_CLOSED_CODE: &str = "spark.transport.tls.transport_closed";
const TRANSPORT_ERROR_CODE: &str = "spark.transport.tls.transport_error";
const CONNECTION_CLOSED_CODE: &str = "spark.transport.tls.connection_closed";
const STREAM_CLOSED_CODE: &str = "spark.transport.tls.stream_closed";
const REENTRANT_CODE: &str = "spark.transport.tls.reentrant";
const INVALID_HOSTNAME_CODE: &str = "spark.transport.tls.invalid_hostname";
const INVALID_CONFIG_CODE: &str = "spark.transport.tls.invalid_config";

/// 触发错误的消费者操作。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Handshake,
    Read,
    Write,
    Flush,
    Close,
}

impl Operation {
    pub(crate) fn kind(self) -> OperationKind {
        match self {
            Operation::Handshake => HANDSHAKE,
            Operation::Read => READ,
            Operation::Write => WRITE,
            Operation::Flush => FLUSH,
            Operation::Close => CLOSE,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind().message)
    }
}

/// 握手失败的三类原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeFailure {
    /// 收到或发出了协议告警；`None` 表示引擎在本地检测到协议违规但没有对应的告警码。
    ProtocolAlert(Option<AlertDescription>),
    /// 证书链校验或主机名校验失败。
    CertificateRejected,
    /// 双方无法就协议版本或密码套件达成一致。
    VersionMismatch,
}

impl HandshakeFailure {
    /// 将握手期间的引擎错误归类。
    pub fn classify(error: &RustlsError) -> Self {
        use RustlsError::*;
        match error {
            NoCertificatesPresented
            | InvalidCertificate(_)
            | InvalidCertRevocationList(_)
            | UnsupportedNameType => HandshakeFailure::CertificateRejected,
            PeerIncompatible(_) => HandshakeFailure::VersionMismatch,
            AlertReceived(alert) => alert_to_failure(*alert),
            _ => HandshakeFailure::ProtocolAlert(None),
        }
    }
}

fn alert_to_failure(alert: AlertDescription) -> HandshakeFailure {
    match alert {
        AlertDescription::BadCertificate
        | AlertDescription::UnsupportedCertificate
        | AlertDescription::CertificateRevoked
        | AlertDescription::CertificateExpired
        | AlertDescription::CertificateUnknown
        | AlertDescription::UnknownCA
        | AlertDescription::NoCertificate
        | AlertDescription::CertificateUnobtainable
        | AlertDescription::CertificateRequired => HandshakeFailure::CertificateRejected,
        AlertDescription::ProtocolVersion | AlertDescription::InsufficientSecurity => {
            HandshakeFailure::VersionMismatch
        }
        other => HandshakeFailure::ProtocolAlert(Some(other)),
    }
}

impl fmt::Display for HandshakeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeFailure::ProtocolAlert(Some(alert)) => write!(f, "协议告警 {alert:?}"),
            HandshakeFailure::ProtocolAlert(None) => f.write_str("协议违规"),
            HandshakeFailure::CertificateRejected => f.write_str("证书被拒绝"),
            HandshakeFailure::VersionMismatch => f.write_str("版本或套件协商失败"),
        }
    }
}

/// 错误的粗粒度分类，便于自动化决策。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// 底层传输关闭或出错。
    Network,
    /// 证书或主机名校验失败。
    Trust,
    /// TLS 协议层违规、告警或对端关闭。
    Protocol,
    /// 调用方式不当：重入、关闭后继续使用、非法参数。
    Usage,
}

/// TLS 客户端流的错误类型。
#[derive(Clone, Debug, Error)]
pub enum TlsError {
    #[error("TLS 握手失败（{reason}）：{source}")]
    HandshakeFailed {
        reason: HandshakeFailure,
        #[source]
        source: RustlsError,
    },
    #[error("{operation} 阶段 TLS 协议错误：{source}")]
    Protocol {
        operation: Operation,
        #[source]
        source: RustlsError,
    },
    #[error("{operation} 阶段底层传输已关闭")]
    TransportClosed { operation: Operation },
    #[error("{operation} 阶段底层传输出错：{source}")]
    TransportError {
        operation: Operation,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("对端已发送 close_notify，连接已关闭")]
    ConnectionClosed,
    #[error("TLS 流已关闭")]
    StreamClosed,
    #[error("TLS 流正被另一操作占用，禁止重入")]
    Reentrant,
    #[error("非法的目标主机名：{hostname}")]
    InvalidHostname { hostname: String },
    #[error("TLS 客户端配置无效：{reason}")]
    Configuration { reason: String },
}

impl TlsError {
    pub(crate) fn transport(operation: Operation, error: io::Error) -> Self {
        TlsError::TransportError {
            operation,
            source: Arc::new(error),
        }
    }

    pub(crate) fn handshake(error: RustlsError) -> Self {
        TlsError::HandshakeFailed {
            reason: HandshakeFailure::classify(&error),
            source: error,
        }
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            TlsError::HandshakeFailed { .. } => HANDSHAKE.code,
            TlsError::Protocol { operation, .. } => operation.kind().code,
            TlsError::TransportClosed { .. } => TRANSPORT_CLOSED_CODE,
            TlsError::TransportError { .. } => TRANSPORT_ERROR_CODE,
            TlsError::ConnectionClosed => CONNECTION_CLOSED_CODE,
            TlsError::StreamClosed => STREAM_CLOSED_CODE,
            TlsError::Reentrant => REENTRANT_CODE,
            TlsError::InvalidHostname { .. } => INVALID_HOSTNAME_CODE,
            TlsError::Configuration { .. } => INVALID_CONFIG_CODE,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            TlsError::HandshakeFailed {
                reason: HandshakeFailure::CertificateRejected,
                ..
            } => ErrorCategory::Trust,
            TlsError::HandshakeFailed { .. } => ErrorCategory::Protocol,
            TlsError::Protocol { source, .. } => match HandshakeFailure::classify(source) {
                HandshakeFailure::CertificateRejected => ErrorCategory::Trust,
                _ => ErrorCategory::Protocol,
            },
            TlsError::TransportClosed { .. } | TlsError::TransportError { .. } => {
                ErrorCategory::Network
            }
            TlsError::ConnectionClosed => ErrorCategory::Protocol,
            TlsError::StreamClosed
            | TlsError::Reentrant
            | TlsError::InvalidHostname { .. }
            | TlsError::Configuration { .. } => ErrorCategory::Usage,
        }
    }

    /// 触发错误的阶段；与阶段无关的错误返回 `None`。
    pub fn operation(&self) -> Option<Operation> {
        match self {
            TlsError::HandshakeFailed { .. } => Some(Operation::Handshake),
            TlsError::Protocol { operation, .. }
            | TlsError::TransportClosed { operation }
            | TlsError::TransportError { operation, .. } => Some(*operation),
            _ => None,
        }
    }

    /// 握手失败原因；非握手错误返回 `None`。
    pub fn handshake_failure(&self) -> Option<HandshakeFailure> {
        match self {
            TlsError::HandshakeFailed { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

impl From<TlsError> for io::Error {
    fn from(error: TlsError) -> Self {
        let kind = match &error {
            TlsError::HandshakeFailed { .. } | TlsError::Protocol { .. } => {
                io::ErrorKind::InvalidData
            }
            TlsError::TransportClosed { .. } => io::ErrorKind::UnexpectedEof,
            TlsError::TransportError { source, .. } => source.kind(),
            TlsError::ConnectionClosed => io::ErrorKind::ConnectionAborted,
            TlsError::StreamClosed => io::ErrorKind::NotConnected,
            TlsError::Reentrant => io::ErrorKind::ResourceBusy,
            TlsError::InvalidHostname { .. } | TlsError::Configuration { .. } => {
                io::ErrorKind::InvalidInput
            }
        };
        io::Error::new(kind, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::{CertificateError, PeerIncompatible};

    #[test]
    fn handshake_errors_fold_into_three_reasons() {
        let cases = [
            (
                RustlsError::InvalidCertificate(CertificateError::NotValidForName),
                HandshakeFailure::CertificateRejected,
            ),
            (
                RustlsError::AlertReceived(AlertDescription::UnknownCA),
                HandshakeFailure::CertificateRejected,
            ),
            (
                RustlsError::PeerIncompatible(PeerIncompatible::ServerDoesNotSupportTls12Or13),
                HandshakeFailure::VersionMismatch,
            ),
            (
                RustlsError::AlertReceived(AlertDescription::ProtocolVersion),
                HandshakeFailure::VersionMismatch,
            ),
            (
                RustlsError::AlertReceived(AlertDescription::HandshakeFailure),
                HandshakeFailure::ProtocolAlert(Some(AlertDescription::HandshakeFailure)),
            ),
            (RustlsError::DecryptError, HandshakeFailure::ProtocolAlert(None)),
        ];
        for (error, expected) in cases {
            assert_eq!(HandshakeFailure::classify(&error), expected, "{error:?}");
        }
    }

    #[test]
    fn codes_and_categories_separate_network_trust_and_protocol() {
        let rejected =
            TlsError::handshake(RustlsError::InvalidCertificate(CertificateError::Expired));
        assert_eq!(rejected.code(), "spark.transport.tls.handshake_failed");
        assert_eq!(rejected.category(), ErrorCategory::Trust);
        assert_eq!(rejected.operation(), Some(Operation::Handshake));

        let closed = TlsError::TransportClosed {
            operation: Operation::Read,
        };
        assert_eq!(closed.code(), "spark.transport.tls.transport_closed");
        assert_eq!(closed.category(), ErrorCategory::Network);
        assert_eq!(closed.operation(), Some(Operation::Read));

        let protocol = TlsError::Protocol {
            operation: Operation::Write,
            source: RustlsError::DecryptError,
        };
        assert_eq!(protocol.code(), "spark.transport.tls.write_failed");
        assert_eq!(protocol.category(), ErrorCategory::Protocol);

        assert_eq!(TlsError::Reentrant.category(), ErrorCategory::Usage);
        assert_eq!(TlsError::StreamClosed.operation(), None);
    }

    #[test]
    fn io_conversion_keeps_transport_error_kind() {
        let error = TlsError::transport(
            Operation::Write,
            io::Error::from(io::ErrorKind::ConnectionRefused),
        );
        let converted: io::Error = error.into();
        assert_eq!(converted.kind(), io::ErrorKind::ConnectionRefused);

        let converted: io::Error = TlsError::StreamClosed.into();
        assert_eq!(converted.kind(), io::ErrorKind::NotConnected);
        assert!(
            converted
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<TlsError>())
                .is_some(),
            "io::Error 应保留原始 TlsError"
        );
    }
}
