#![deny(unsafe_code)]
#![doc = "spark-transport: 非阻塞字节流传输适配器契约。"]
#![doc = ""]
#![doc = "== 使命概述 =="]
#![doc = "- **Why**：TLS 等上层协议只关心“有序、可靠、非阻塞”的字节流，不应绑定具体套接字或运行时。"]
#![doc = "- **What**：定义 [`Transport`] 读写契约与 [`IoOutcome`] 四态结果，并提供 Tokio 适配器与内存管道。"]
#![doc = "- **How**：以 `Poll` + `Waker` 表达就绪通知：返回 `Poll::Pending` 即表示已登记“可读/可写”回调。"]

mod adapter;
mod outcome;

#[cfg(feature = "runtime-tokio")]
mod tokio_io;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;

pub use adapter::Transport;
pub use outcome::{IoOutcome, TransportExt, is_closed_kind};

#[cfg(feature = "runtime-tokio")]
pub use tokio_io::TokioTransport;

#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryTransport;
