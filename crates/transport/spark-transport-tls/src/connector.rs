use std::sync::Arc;

use arc_swap::ArcSwap;
use spark_transport::Transport;
use tracing::debug;

use crate::{TRACE_TARGET, config::TlsClientConfig, error::TlsError, stream::TlsStream};

/// TLS 客户端握手入口。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 为一组连接共享同一份客户端配置，并通过 [`ArcSwap`] 支持热替换根证书、ALPN 或校验策略；
/// - 替换只影响之后建立的流，已存在的 [`TlsStream`] 继续使用创建时的配置快照。
///
/// ## 契约（What）
/// - `connect`：用当前配置快照包装传输，握手在流的第一次操作时开始；
/// - `replace_config`：原子替换配置；
/// - `config_snapshot`：获取当前配置的 `Arc` 副本。
#[derive(Clone, Debug)]
pub struct TlsConnector {
    config: Arc<ArcSwap<TlsClientConfig>>,
}

impl TlsConnector {
    pub fn new(config: TlsClientConfig) -> Self {
        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    /// 替换当前配置，通常用于根证书轮换。
    pub fn replace_config(&self, config: TlsClientConfig) {
        debug!(target: TRACE_TARGET, ?config, "tls client config replaced");
        self.config.store(Arc::new(config));
    }

    pub fn config_snapshot(&self) -> Arc<TlsClientConfig> {
        self.config.load_full()
    }

    pub fn connect<T: Transport>(
        &self,
        transport: T,
        hostname: &str,
    ) -> Result<TlsStream<T>, TlsError> {
        let config = self.config.load();
        TlsStream::connect(transport, hostname, &config)
    }
}

impl From<TlsClientConfig> for TlsConnector {
    fn from(config: TlsClientConfig) -> Self {
        Self::new(config)
    }
}
