//! Mock 传输（无硬件依赖）
//!
//! 供驱动层测试使用：测试脚本向 `MockBus` 注入入站帧，
//! 并检查传输层记录下来的出站帧。

use crate::{BusFrame, BusTransport, CanError, TransportFactory};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Mock 总线共享状态
///
/// 被所有 `MockTransport` 克隆共享；`close` 之后工厂重开会复位关闭标志，
/// 模拟接收线程的关闭-重开循环。
#[derive(Debug, Default)]
pub struct MockBus {
    inbound: Mutex<VecDeque<BusFrame>>,
    inbound_ready: Condvar,
    sent: Mutex<Vec<BusFrame>>,
    closed: AtomicBool,
    /// 工厂成功打开的次数（测试重连用）
    open_count: AtomicUsize,
}

impl MockBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 注入一个入站帧，唤醒阻塞中的 `recv`
    pub fn push_inbound(&self, frame: BusFrame) {
        self.inbound.lock().push_back(frame);
        self.inbound_ready.notify_all();
    }

    /// 取走目前为止记录的全部出站帧
    pub fn take_sent(&self) -> Vec<BusFrame> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// 查看出站帧数量
    pub fn sent_len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Mock 传输句柄
#[derive(Debug, Clone)]
pub struct MockTransport {
    bus: Arc<MockBus>,
}

impl MockTransport {
    pub fn new(bus: Arc<MockBus>) -> Self {
        Self { bus }
    }
}

impl BusTransport for MockTransport {
    fn send(&self, frame: &BusFrame) -> Result<(), CanError> {
        if self.bus.is_closed() {
            return Err(CanError::Closed);
        }
        self.bus.sent.lock().push(*frame);
        Ok(())
    }

    fn recv(&self) -> Result<BusFrame, CanError> {
        let mut queue = self.bus.inbound.lock();
        loop {
            if self.bus.is_closed() {
                return Err(CanError::Closed);
            }
            if let Some(frame) = queue.pop_front() {
                return Ok(frame);
            }
            self.bus.inbound_ready.wait(&mut queue);
        }
    }

    /// Mock 的发送是同步提交的，屏障只需检查传输是否仍然可用
    fn flush(&self) -> Result<(), CanError> {
        if self.bus.is_closed() {
            return Err(CanError::Closed);
        }
        Ok(())
    }

    fn shutdown(&self) {
        self.bus.closed.store(true, Ordering::Release);
        self.bus.inbound_ready.notify_all();
    }
}

/// Mock 传输工厂：每次 `open` 复位关闭标志并返回新的句柄
#[derive(Debug, Clone)]
pub struct MockFactory {
    bus: Arc<MockBus>,
}

impl MockFactory {
    pub fn new(bus: Arc<MockBus>) -> Self {
        Self { bus }
    }
}

impl TransportFactory for MockFactory {
    type Transport = MockTransport;

    fn open(&self) -> Result<Self::Transport, CanError> {
        self.bus.closed.store(false, Ordering::Release);
        self.bus.open_count.fetch_add(1, Ordering::AcqRel);
        Ok(MockTransport::new(self.bus.clone()))
    }
}
