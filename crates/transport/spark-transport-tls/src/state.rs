use std::task::Waker;

use crate::error::{Operation, TlsError};

/// 会话所处阶段的可复制标签。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    Created,
    Handshaking,
    Established,
    Closing,
    Closed,
    Failed,
}

impl SessionPhase {
    fn rank(self) -> u8 {
        match self {
            SessionPhase::Created => 0,
            SessionPhase::Handshaking => 1,
            SessionPhase::Established => 2,
            SessionPhase::Closing => 3,
            SessionPhase::Closed | SessionPhase::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Closed | SessionPhase::Failed)
    }
}

/// 会话状态机。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - 迁移路径：`Created → Handshaking → Established → Closing → Closed`；
/// - `Failed` 只能从 `Handshaking` 或 `Established` 进入，并保存导致失败的错误；
/// - `Closed`/`Failed` 为终态，之后的迁移请求被忽略；
/// - 阶段只前进不后退，`advance` 在调试构建中断言这一点。
#[derive(Clone, Debug)]
pub(crate) enum SessionState {
    Created,
    Handshaking,
    Established,
    Closing,
    Closed,
    Failed(TlsError),
}

impl SessionState {
    pub(crate) fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Created => SessionPhase::Created,
            SessionState::Handshaking => SessionPhase::Handshaking,
            SessionState::Established => SessionPhase::Established,
            SessionState::Closing => SessionPhase::Closing,
            SessionState::Closed => SessionPhase::Closed,
            SessionState::Failed(_) => SessionPhase::Failed,
        }
    }

    /// 终态下应返回给调用方的错误；非终态返回 `None`。
    pub(crate) fn terminal_error(&self) -> Option<TlsError> {
        match self {
            SessionState::Closed | SessionState::Closing => Some(TlsError::StreamClosed),
            SessionState::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    pub(crate) fn advance(&mut self, next: SessionState) {
        let (from, to) = (self.phase(), next.phase());
        if from.is_terminal() {
            return;
        }
        debug_assert!(
            to.rank() >= from.rank(),
            "会话阶段不可回退：{from:?} -> {to:?}"
        );
        debug_assert!(
            to != SessionPhase::Failed
                || matches!(from, SessionPhase::Handshaking | SessionPhase::Established),
            "Failed 只能从 Handshaking/Established 进入：{from:?}"
        );
        *self = next;
    }
}

const SLOTS: usize = 5;

fn slot(operation: Operation) -> usize {
    match operation {
        Operation::Handshake => 0,
        Operation::Read => 1,
        Operation::Write => 2,
        Operation::Flush => 3,
        Operation::Close => 4,
    }
}

/// 按操作类型登记的 waker 槽位。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 流以 `&self` 暴露，读与写可能在不同任务中同时挂起；底层传输每个方向只保留最近一次登记的
///   waker，一个操作推进了泵（例如刷出了对方等待的密文）时，必须显式唤醒其它挂起的操作；
/// - 传输关闭时，仍在挂起的操作应得到 `TransportClosed` 而不是笼统的 `StreamClosed`。
///
/// ## 契约（What）
/// - `register`：覆盖该操作的槽位；`clear`：操作完成后清除；
/// - `wake_others`：唤醒除自身以外的所有槽位（唤醒即清空）；
/// - `wake_all_transport_closed`：唤醒全部槽位，并为每个被唤醒的操作记下“欠一个 TransportClosed”；
/// - `take_transport_closed`：取走该欠条。
#[derive(Debug, Default)]
pub(crate) struct Waiters {
    slots: [Option<Waker>; SLOTS],
    owed_transport_closed: [bool; SLOTS],
}

impl Waiters {
    pub(crate) fn register(&mut self, operation: Operation, waker: &Waker) {
        let current = &mut self.slots[slot(operation)];
        if !current
            .as_ref()
            .is_some_and(|existing| existing.will_wake(waker))
        {
            *current = Some(waker.clone());
        }
    }

    pub(crate) fn clear(&mut self, operation: Operation) {
        self.slots[slot(operation)] = None;
    }

    pub(crate) fn wake_others(&mut self, operation: Operation) {
        let own = slot(operation);
        for (index, waker) in self.slots.iter_mut().enumerate() {
            if index != own
                && let Some(waker) = waker.take()
            {
                waker.wake();
            }
        }
    }

    pub(crate) fn wake_all(&mut self) {
        for waker in self.slots.iter_mut().filter_map(Option::take) {
            waker.wake();
        }
    }

    pub(crate) fn wake_all_transport_closed(&mut self, trigger: Operation) {
        for (index, waker) in self.slots.iter_mut().enumerate() {
            if let Some(waker) = waker.take() {
                if index != slot(trigger) {
                    self.owed_transport_closed[index] = true;
                }
                waker.wake();
            }
        }
    }

    pub(crate) fn take_transport_closed(&mut self, operation: Operation) -> bool {
        std::mem::take(&mut self.owed_transport_closed[slot(operation)])
    }
}
