//! 内存双工管道：确定性测试专用的 [`Transport`] 实现。
//!
//! # 模块定位（Why）
//! - TLS 泵的核心风险集中在“部分读写、就绪通知丢失、关闭竞态”，这些场景在真实套接字上难以复现；
//! - 内存管道允许测试精确控制单次读写的字节上限、管道容量与关闭时机，从而逐字节地验证加密流。
//!
//! # 设计概要（How）
//! - 每个方向一条 `Pipe`：有界 `VecDeque<u8>` + 读/写 waker 槽位 + 关闭标记；
//! - 每个端点持有“入站管道”与“出站管道”的共享引用，`pair` 交叉连接两端；
//! - 与 Tokio 相同，每个方向只保留最近一次登记的 waker。

use std::{
    collections::VecDeque,
    io,
    sync::Arc,
    task::{Context, Poll, Waker},
};

use parking_lot::Mutex;

use crate::Transport;

#[derive(Debug)]
struct Pipe {
    bytes: VecDeque<u8>,
    capacity: usize,
    closed: bool,
    reader: Option<Waker>,
    writer: Option<Waker>,
    transferred: u64,
}

impl Pipe {
    fn new(capacity: usize) -> Self {
        Self {
            bytes: VecDeque::new(),
            capacity: capacity.max(1),
            closed: false,
            reader: None,
            writer: None,
            transferred: 0,
        }
    }
}

/// 内存双工管道的一端。
///
/// # 契约（What）
/// - `pair(capacity)`：创建互联的两端，每个方向最多缓存 `capacity` 字节；
/// - `set_chunk_limit(n)`：限制本端单次读/写的最大字节数，用于模拟“逐字节”就绪；
/// - `close()`：关闭两个方向并唤醒所有等待者；关闭后读取返回 EOF，写入返回 `BrokenPipe`；
/// - `bytes_read`/`bytes_written`：本端累计读取/写出的字节数，测试可据此断言“未触碰传输”。
#[derive(Debug)]
pub struct MemoryTransport {
    inbound: Arc<Mutex<Pipe>>,
    outbound: Arc<Mutex<Pipe>>,
    chunk_limit: usize,
    bytes_read: u64,
}

impl MemoryTransport {
    /// 创建一对互联端点。
    pub fn pair(capacity: usize) -> (MemoryTransport, MemoryTransport) {
        let a_to_b = Arc::new(Mutex::new(Pipe::new(capacity)));
        let b_to_a = Arc::new(Mutex::new(Pipe::new(capacity)));
        let a = MemoryTransport {
            inbound: b_to_a.clone(),
            outbound: a_to_b.clone(),
            chunk_limit: usize::MAX,
            bytes_read: 0,
        };
        let b = MemoryTransport {
            inbound: a_to_b,
            outbound: b_to_a,
            chunk_limit: usize::MAX,
            bytes_read: 0,
        };
        (a, b)
    }

    /// 限制单次读写的最大字节数（最小为 1）。
    pub fn set_chunk_limit(&mut self, limit: usize) {
        self.chunk_limit = limit.max(1);
    }

    /// 链式设置单次读写上限。
    pub fn with_chunk_limit(mut self, limit: usize) -> Self {
        self.set_chunk_limit(limit);
        self
    }

    /// 关闭两个方向，双方后续读取得到 EOF。
    pub fn close(&self) {
        let mut wakers = Vec::with_capacity(4);
        for pipe in [&self.inbound, &self.outbound] {
            let mut guard = pipe.lock();
            guard.closed = true;
            wakers.extend(guard.reader.take());
            wakers.extend(guard.writer.take());
        }
        wakers.into_iter().for_each(Waker::wake);
    }

    /// 本端累计读取的字节数。
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// 本端累计写出的字节数。
    pub fn bytes_written(&self) -> u64 {
        self.outbound.lock().transferred
    }

    /// 本端入站方向尚未被读取的字节数。
    pub fn pending_inbound(&self) -> usize {
        self.inbound.lock().bytes.len()
    }
}

impl Transport for MemoryTransport {
    fn poll_read(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        let (result, waker) = {
            let mut pipe = self.inbound.lock();
            if pipe.bytes.is_empty() {
                if pipe.closed {
                    return Poll::Ready(Ok(0));
                }
                pipe.reader = Some(cx.waker().clone());
                return Poll::Pending;
            }
            let n = pipe.bytes.len().min(buf.len()).min(self.chunk_limit);
            for (slot, byte) in buf.iter_mut().zip(pipe.bytes.drain(..n)) {
                *slot = byte;
            }
            (n, pipe.writer.take())
        };
        self.bytes_read += result as u64;
        if let Some(waker) = waker {
            waker.wake();
        }
        Poll::Ready(Ok(result))
    }

    fn poll_write(&mut self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let (result, waker) = {
            let mut pipe = self.outbound.lock();
            if pipe.closed {
                return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
            }
            let free = pipe.capacity - pipe.bytes.len();
            if free == 0 {
                pipe.writer = Some(cx.waker().clone());
                return Poll::Pending;
            }
            let n = free.min(buf.len()).min(self.chunk_limit);
            pipe.bytes.extend(&buf[..n]);
            pipe.transferred += n as u64;
            (n, pipe.reader.take())
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        Poll::Ready(Ok(result))
    }
}
