use std::{
    io,
    task::{Context, Poll},
};

/// 非阻塞字节流传输适配器。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 为 TLS 客户端流等上层协议提供与具体网络实现无关的读写入口，
///   使 TCP、内存管道乃至自定义隧道都能以同一方式接入；
/// - 将“非阻塞读写 + 就绪通知登记”压缩为两个 `poll_*` 方法，避免回调注册与读写调用之间出现竞态。
///
/// ## 体系定位（Architecture）
/// - 位于传输实现层与加密层之间：实现方负责真实 I/O，调用方（如 TLS 泵）负责调度；
/// - 只要求 `&mut self`，因此同一适配器在任一时刻只能被一个会话驱动。
///
/// ## 契约（What）
/// - `poll_read`：`Ready(Ok(n > 0))` 表示读取了 `n` 字节；`Ready(Ok(0))`（且 `buf` 非空）表示对端已关闭；
///   `Pending` 表示暂无数据，且实现**必须**已登记 `cx` 的 waker，数据到达或连接关闭时唤醒；
/// - `poll_write`：`Ready(Ok(n))` 表示接受了前 `n` 字节，可能少于 `buf.len()`；
///   对非空 `buf` 返回 `Ok(0)` 视为连接已关闭；`Pending` 语义同上，对应“可写”通知；
/// - `poll_flush`：把实现内部缓冲推向底层，默认立即完成；
/// - **前置条件**：调用方不得在 `Pending` 之后假设数据已部分写出；
/// - **后置条件**：返回 `Ready(Err(_))` 后实现可以拒绝后续调用。
///
/// ## 风险与权衡（Trade-offs）
/// - 单个 waker 槽位意味着后一次 `Pending` 会覆盖前一次登记，上层需自行在进展时唤醒其他等待者；
/// - 未提供关闭接口：连接生命周期归属于建立连接的一方，本契约只负责读写。
pub trait Transport {
    /// 尝试读取字节到 `buf`。
    fn poll_read(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>>;

    /// 尝试写出 `buf` 的前缀。
    fn poll_write(&mut self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>>;

    /// 刷新实现内部的发送缓冲。
    fn poll_flush(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let _ = cx;
        Poll::Ready(Ok(()))
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn poll_read(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        (**self).poll_read(cx, buf)
    }

    fn poll_write(&mut self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        (**self).poll_write(cx, buf)
    }

    fn poll_flush(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        (**self).poll_flush(cx)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn poll_read(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        (**self).poll_read(cx, buf)
    }

    fn poll_write(&mut self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        (**self).poll_write(cx, buf)
    }

    fn poll_flush(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        (**self).poll_flush(cx)
    }
}
