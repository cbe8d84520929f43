use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::Transport;

/// 把 Tokio 的 `AsyncRead + AsyncWrite` 类型接入 [`Transport`] 契约。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - Tokio 的 `TcpStream`、`DuplexStream` 等已经具备“返回 `Pending` 即登记 waker”的语义，
///   与 [`Transport`] 完全同构，只需一层零成本转发即可复用；
/// - 保持 TLS 层对 Tokio 无感知：TLS 泵只依赖 [`Transport`]，运行时细节停留在本适配器。
///
/// ## 契约（What）
/// - `poll_read` 将 `ReadBuf` 填充长度作为读取字节数，0 即 EOF；
/// - `poll_write`/`poll_flush` 直接转发；
/// - `into_inner`/`get_ref`/`get_mut` 取回原始 IO 对象。
#[derive(Debug)]
pub struct TokioTransport<IO> {
    io: IO,
}

impl<IO> TokioTransport<IO> {
    /// 包装一个已连接的 Tokio IO 对象。
    pub fn new(io: IO) -> Self {
        Self { io }
    }

    pub fn get_ref(&self) -> &IO {
        &self.io
    }

    pub fn get_mut(&mut self) -> &mut IO {
        &mut self.io
    }

    pub fn into_inner(self) -> IO {
        self.io
    }
}

impl<IO> From<IO> for TokioTransport<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    fn from(io: IO) -> Self {
        Self::new(io)
    }
}

impl<IO> Transport for TokioTransport<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        let mut read_buf = ReadBuf::new(buf);
        match Pin::new(&mut self.io).poll_read(cx, &mut read_buf) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(read_buf.filled().len())),
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_write(&mut self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }
}
