//! Tokio `AsyncRead`/`AsyncWrite` 桥接。
//!
//! [`TlsStream`] 的操作以 `&self` 暴露，因此桥接层只需借出共享引用，不要求 `Unpin`。
//! 对端 close_notify 映射为 Tokio 语义下的 EOF（读到 0 字节），其余错误经
//! `From<TlsError> for io::Error` 转换，传输截断表现为 `UnexpectedEof`。

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use spark_transport::Transport;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::{error::TlsError, stream::TlsStream};

impl<T: Transport> AsyncRead for TlsStream<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this: &TlsStream<T> = &self;
        match TlsStream::poll_read(this, cx, buf.initialize_unfilled()) {
            Poll::Ready(Ok(n)) => {
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(TlsError::ConnectionClosed)) => Poll::Ready(Ok(())),
            Poll::Ready(Err(err)) => Poll::Ready(Err(err.into())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T: Transport> AsyncWrite for TlsStream<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this: &TlsStream<T> = &self;
        TlsStream::poll_write(this, cx, buf).map_err(io::Error::from)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this: &TlsStream<T> = &self;
        TlsStream::poll_flush(this, cx).map_err(io::Error::from)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this: &TlsStream<T> = &self;
        TlsStream::poll_close(this, cx)
            .map_ok(|_| ())
            .map_err(io::Error::from)
    }
}
