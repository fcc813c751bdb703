//! 总线发送门控与接收重连循环
//!
//! 发送侧：传输就绪前（接收线程尚未打开总线）发送方在条件变量上等待；
//! 接收线程在自己的帧处理回调期间关闭门控，避免回调内发送时自我死锁。
//!
//! 接收侧：阻塞读取失败后关闭并按固定退避重开传输，重开成功后唤醒
//! 等待中的发送方。停止标志置位后循环退出，不再重试。

use crate::error::DriverError;
use omnidrive_can::{BusFrame, BusTransport, CanError, TransportFactory};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// 读取失败后重开传输前的固定退避
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

struct BusState<T: BusTransport> {
    transport: Mutex<Option<Arc<T>>>,
    ready: Condvar,
    /// 发送是否等待传输就绪（帧处理回调与关闭流程中关闭）
    gate: AtomicBool,
    running: AtomicBool,
}

/// 可克隆的总线句柄，控制线程与接收线程共享
pub(crate) struct BusHandle<T: BusTransport> {
    state: Arc<BusState<T>>,
}

impl<T: BusTransport> Clone for BusHandle<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T: BusTransport> BusHandle<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(BusState {
                transport: Mutex::new(None),
                ready: Condvar::new(),
                gate: AtomicBool::new(true),
                running: AtomicBool::new(true),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    pub fn set_gate(&self, enabled: bool) {
        self.state.gate.store(enabled, Ordering::Release);
    }

    /// 获取当前传输；门控开启时阻塞等待传输就绪
    fn acquire(&self) -> Result<Arc<T>, DriverError> {
        let mut guard = self.state.transport.lock();
        if self.state.gate.load(Ordering::Acquire) {
            while self.is_running() && guard.is_none() {
                self.state.ready.wait(&mut guard);
            }
        }
        if !self.is_running() {
            return Err(DriverError::ShuttingDown);
        }
        guard.clone().ok_or(DriverError::Can(CanError::NotConnected))
    }

    pub fn transmit(&self, frame: &BusFrame) -> Result<(), DriverError> {
        let transport = self.acquire()?;
        transport.send(frame)?;
        Ok(())
    }

    /// 发送冲刷屏障：返回时之前所有写入均已交付给传输层
    pub fn flush(&self) -> Result<(), DriverError> {
        let transport = self.acquire()?;
        transport.flush()?;
        Ok(())
    }

    /// 接收线程专用：取当前传输，不等待
    fn current(&self) -> Option<Arc<T>> {
        self.state.transport.lock().clone()
    }

    /// 接收线程专用：安装新打开的传输并唤醒等待的发送方
    fn install(&self, transport: T) -> Arc<T> {
        let transport = Arc::new(transport);
        *self.state.transport.lock() = Some(transport.clone());
        self.state.ready.notify_all();
        transport
    }

    fn clear(&self) {
        *self.state.transport.lock() = None;
    }

    /// 停止总线：置停止标志、关闭当前传输解除阻塞读取、唤醒所有发送方
    pub fn stop(&self) {
        self.state.running.store(false, Ordering::Release);
        if let Some(transport) = self.current() {
            transport.shutdown();
        }
        self.state.ready.notify_all();
    }
}

/// 接收线程主循环：打开传输、阻塞读取、失败后退避重开
pub(crate) fn run_receive_loop<F, H>(factory: F, bus: BusHandle<F::Transport>, mut on_frame: H)
where
    F: TransportFactory,
    H: FnMut(BusFrame),
{
    let mut is_error = false;

    while bus.is_running() {
        let transport = match bus.current() {
            Some(transport) if !is_error => transport,
            _ => {
                bus.clear();
                if is_error {
                    std::thread::sleep(RECONNECT_BACKOFF);
                    if !bus.is_running() {
                        break;
                    }
                }
                match factory.open() {
                    Ok(transport) => {
                        info!("CAN transport ready");
                        is_error = false;
                        bus.install(transport)
                    }
                    Err(err) => {
                        warn!("Failed to open CAN transport: {err}");
                        is_error = true;
                        continue;
                    }
                }
            }
        };

        match transport.recv() {
            Ok(frame) => on_frame(frame),
            Err(err) => {
                if bus.is_running() {
                    warn!("CAN read failed: {err}");
                }
                is_error = true;
            }
        }
    }

    bus.clear();
}
