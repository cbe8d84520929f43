use std::io;

/// 单次引擎 I/O 的默认块大小。
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// 固定容量的密文暂存区。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 非阻塞传输随时可能只写出/读入一部分字节，必须用显式游标记录“还剩多少没送出/没喂给引擎”，
///   否则会出现记录截断或重复发送；
/// - 容量固定：缓冲区满即停止从引擎抽取或从传输读取，背压自然传导到上一级，内存占用有上界。
///
/// ## 逻辑（How）
/// - `[start, end)` 区间是尚未消费的字节；`consume` 推进 `start`，`commit` 推进 `end`；
/// - `spare_mut` 先把剩余字节搬到开头，保证空闲区连续且等于全部剩余容量；
/// - 实现 `io::Read`：把暂存的密文交给 `rustls::ClientConnection::read_tls`；
/// - 实现 `io::Write`：接收 `write_tls` 的输出，写满时返回 `Ok(0)`，绝不扩容。
///
/// ## 契约（What）
/// - `pending().len() + spare_mut().len() == capacity()`（调用 `spare_mut` 之后）；
/// - 字节按写入顺序被消费，不重排、不重复。
#[derive(Debug)]
pub(crate) struct CipherBuffer {
    storage: Box<[u8]>,
    start: usize,
    end: usize,
}

impl CipherBuffer {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0; capacity.max(1)].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// 尚未消费的字节。
    pub(crate) fn pending(&self) -> &[u8] {
        &self.storage[self.start..self.end]
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub(crate) fn is_full(&self) -> bool {
        self.end - self.start == self.storage.len()
    }

    /// 标记前 `n` 个待消费字节已被取走。
    pub(crate) fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.end - self.start);
        self.start += n.min(self.end - self.start);
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// 返回连续的空闲区；必要时先压缩。
    pub(crate) fn spare_mut(&mut self) -> &mut [u8] {
        if self.start > 0 {
            self.storage.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        &mut self.storage[self.end..]
    }

    /// 标记空闲区的前 `n` 个字节已被填充。
    pub(crate) fn commit(&mut self, n: usize) {
        debug_assert!(self.end + n <= self.storage.len());
        self.end = (self.end + n).min(self.storage.len());
    }
}

impl io::Read for CipherBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.pending().len().min(buf.len());
        buf[..n].copy_from_slice(&self.storage[self.start..self.start + n]);
        self.consume(n);
        Ok(n)
    }
}

impl io::Write for CipherBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let spare = self.spare_mut();
        let n = spare.len().min(buf.len());
        spare[..n].copy_from_slice(&buf[..n]);
        self.commit(n);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
