use std::{
    io,
    task::{Context, Poll},
};

use crate::Transport;

/// 一次非阻塞读写的四态结果中的“非失败”三态。
///
/// # 契约（What）
/// - `Transferred(n)`：成功搬运 `n > 0` 字节；
/// - `WouldBlock`：暂时无法推进，适配器已登记就绪通知；
/// - `Closed`：连接已关闭（读到 EOF、写端被拒绝或底层报告关闭类错误）；
/// - 第四态 `failed` 由外层 `io::Result` 的 `Err` 承载。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoOutcome {
    Transferred(usize),
    WouldBlock,
    Closed,
}

/// 判断错误是否代表“连接已经关闭”，而非可诊断的 I/O 故障。
///
/// 这些错误码在不同平台上都是“对端走了”的表现，上层应统一视作关闭。
pub fn is_closed_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

/// 在 [`Transport`] 之上提供四态结果视图的扩展方法。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - `Poll<io::Result<usize>>` 把“关闭”编码为 `Ok(0)`、把“暂不可用”编码为 `Pending`，
///   调用方容易混淆；扩展方法显式给出 [`IoOutcome`]，让泵的分支一目了然。
///
/// ## 契约（What）
/// - 空缓冲的读写直接返回 `Transferred(0)`，不会触碰底层适配器；
/// - 关闭类错误（见 [`is_closed_kind`]）折叠为 `Closed`，其余错误原样返回。
pub trait TransportExt: Transport {
    /// 非阻塞读取。
    fn try_read(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> io::Result<IoOutcome> {
        if buf.is_empty() {
            return Ok(IoOutcome::Transferred(0));
        }
        classify(self.poll_read(cx, buf))
    }

    /// 非阻塞写入。
    fn try_write(&mut self, cx: &mut Context<'_>, buf: &[u8]) -> io::Result<IoOutcome> {
        if buf.is_empty() {
            return Ok(IoOutcome::Transferred(0));
        }
        classify(self.poll_write(cx, buf))
    }
}

impl<T: Transport + ?Sized> TransportExt for T {}

fn classify(poll: Poll<io::Result<usize>>) -> io::Result<IoOutcome> {
    match poll {
        Poll::Ready(Ok(0)) => Ok(IoOutcome::Closed),
        Poll::Ready(Ok(n)) => Ok(IoOutcome::Transferred(n)),
        Poll::Ready(Err(err)) if is_closed_kind(err.kind()) => Ok(IoOutcome::Closed),
        Poll::Ready(Err(err)) => Err(err),
        Poll::Pending => Ok(IoOutcome::WouldBlock),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::VecDeque, task::Waker};

    /// 按脚本依次返回预设结果的适配器。
    struct Scripted {
        reads: VecDeque<Poll<io::Result<usize>>>,
        calls: usize,
    }

    impl Transport for Scripted {
        fn poll_read(&mut self, _cx: &mut Context<'_>, _buf: &mut [u8]) -> Poll<io::Result<usize>> {
            self.calls += 1;
            self.reads.pop_front().unwrap_or(Poll::Pending)
        }

        fn poll_write(&mut self, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            self.calls += 1;
            Poll::Ready(Ok(buf.len()))
        }
    }

    #[test]
    fn poll_results_fold_into_four_way_outcome() {
        let mut transport = Scripted {
            reads: VecDeque::from([
                Poll::Ready(Ok(3)),
                Poll::Pending,
                Poll::Ready(Ok(0)),
                Poll::Ready(Err(io::ErrorKind::ConnectionReset.into())),
                Poll::Ready(Err(io::ErrorKind::PermissionDenied.into())),
            ]),
            calls: 0,
        };
        let mut cx = Context::from_waker(Waker::noop());
        let mut buf = [0u8; 8];

        assert_eq!(transport.try_read(&mut cx, &mut buf).unwrap(), IoOutcome::Transferred(3));
        assert_eq!(transport.try_read(&mut cx, &mut buf).unwrap(), IoOutcome::WouldBlock);
        assert_eq!(transport.try_read(&mut cx, &mut buf).unwrap(), IoOutcome::Closed);
        assert_eq!(transport.try_read(&mut cx, &mut buf).unwrap(), IoOutcome::Closed);
        let err = transport.try_read(&mut cx, &mut buf).expect_err("权限错误不应被折叠");
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn empty_buffers_never_reach_the_adapter() {
        let mut transport = Scripted {
            reads: VecDeque::new(),
            calls: 0,
        };
        let mut cx = Context::from_waker(Waker::noop());

        assert_eq!(transport.try_read(&mut cx, &mut []).unwrap(), IoOutcome::Transferred(0));
        assert_eq!(transport.try_write(&mut cx, &[]).unwrap(), IoOutcome::Transferred(0));
        assert_eq!(transport.calls, 0);
    }

    #[test]
    fn forwarding_through_mutable_reference() {
        let mut inner = Scripted {
            reads: VecDeque::from([Poll::Ready(Ok(2))]),
            calls: 0,
        };
        let mut borrowed = &mut inner;
        let mut cx = Context::from_waker(Waker::noop());
        let mut buf = [0u8; 4];

        // 显式以 `&mut Scripted` 作为 `Self`，走转发实现。
        let read = TransportExt::try_read(&mut borrowed, &mut cx, &mut buf).unwrap();
        let written = TransportExt::try_write(&mut borrowed, &mut cx, b"ab").unwrap();
        assert_eq!(read, IoOutcome::Transferred(2));
        assert_eq!(written, IoOutcome::Transferred(2));
        assert_eq!(inner.calls, 2);
    }
}
