mod support;

use std::{
    io,
    sync::{Arc, OnceLock, Weak},
    task::{Context, Poll},
};

use parking_lot::Mutex;
use spark_transport::{MemoryTransport, Transport};
use spark_transport_tls::{ErrorCategory, TlsError, TlsStream, rustls};
use support::{HOSTNAME, Pki, ServerPeer, drive};

type Shared = Arc<OnceLock<Weak<TlsStream<Reentrant>>>>;

/// 在写入回调中反向调用所属 TLS 流的传输。
struct Reentrant {
    inner: MemoryTransport,
    stream: Shared,
    observed: Arc<Mutex<Vec<TlsError>>>,
}

impl Transport for Reentrant {
    fn poll_read(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        self.inner.poll_read(cx, buf)
    }

    fn poll_write(&mut self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if let Some(stream) = self.stream.get().and_then(Weak::upgrade) {
            let mut scratch = [0u8; 1];
            if let Poll::Ready(Err(err)) = stream.poll_read(cx, &mut scratch) {
                self.observed.lock().push(err);
            }
        }
        self.inner.poll_write(cx, buf)
    }
}

#[test]
fn callback_into_the_stream_fails_fast_with_reentrant() {
    let pki = Pki::generate();
    let (client, server_end) = MemoryTransport::pair(4096);
    let shared: Shared = Arc::new(OnceLock::new());
    let observed = Arc::new(Mutex::new(Vec::new()));
    let transport = Reentrant {
        inner: client,
        stream: shared.clone(),
        observed: observed.clone(),
    };

    let stream = Arc::new(
        TlsStream::connect(transport, HOSTNAME, &pki.client_config()).expect("创建客户端流失败"),
    );
    shared
        .set(Arc::downgrade(&stream))
        .expect("弱引用只设置一次");
    let mut server = ServerPeer::new(pki.server_config(rustls::DEFAULT_VERSIONS), server_end);

    drive(&mut server, |cx| stream.poll_handshake(cx)).expect("重入调用不应破坏握手");

    let seen = observed.lock();
    assert!(!seen.is_empty(), "写回调应至少触发一次重入");
    for err in seen.iter() {
        assert!(matches!(err, TlsError::Reentrant));
        assert_eq!(err.category(), ErrorCategory::Usage);
    }
    drop(seen);

    drive(&mut server, |cx| stream.poll_write(cx, b"still usable")).expect("重入后流仍可用");
    drive(&mut server, |cx| stream.poll_flush(cx)).expect("刷新失败");
    server.pump();
    assert_eq!(server.received, b"still usable");
}
