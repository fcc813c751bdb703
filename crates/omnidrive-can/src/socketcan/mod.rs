//! SocketCAN 传输实现
//!
//! 基于 Linux 内核的 SocketCAN 子系统。
//!
//! ## 特性
//!
//! - 阻塞读取，通过 `shutdown(2)` 从其他线程强制唤醒
//! - 发送冲刷屏障通过对 socket fd 调用 `fsync(2)` 实现，
//!   返回时内核发送队列中的帧均已交付到总线驱动
//! - 发送失败视为传输已损坏：立即强制关闭，接收线程随后重开
//!
//! ## 限制
//!
//! - **仅限 Linux 平台**：SocketCAN 是 Linux 内核特性
//! - **接口配置**：波特率等配置由系统工具（`ip link`）完成，不在应用层设置

use crate::{BusFrame, BusTransport, CanError, TransportFactory};
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, Frame, Socket, StandardId};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{trace, warn};

/// SocketCAN 传输
///
/// 打开后即可使用；所有方法接收 `&self`，可安全地在接收线程阻塞读取的
/// 同时由控制线程发送。
#[derive(Debug)]
pub struct SocketCanTransport {
    socket: CanSocket,
    /// 接口名称（如 "can0"）
    interface: String,
    /// 是否已被强制关闭（用于区分主动关闭与读取错误）
    closed: AtomicBool,
}

impl SocketCanTransport {
    /// 打开 CAN 接口
    ///
    /// # 错误
    /// - `CanError::Device`: 接口不存在或无法打开
    pub fn open(interface: impl Into<String>) -> Result<Self, CanError> {
        let interface = interface.into();

        let socket = CanSocket::open(&interface).map_err(|e| {
            CanError::Device(format!("Failed to open CAN interface '{interface}': {e}"))
        })?;

        trace!("CAN interface '{}' opened", interface);

        Ok(Self {
            socket,
            interface,
            closed: AtomicBool::new(false),
        })
    }

    /// 获取接口名称
    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl BusTransport for SocketCanTransport {
    fn send(&self, frame: &BusFrame) -> Result<(), CanError> {
        if self.is_closed() {
            return Err(CanError::Closed);
        }

        let id = u16::try_from(frame.id)
            .ok()
            .and_then(StandardId::new)
            .ok_or_else(|| CanError::Device(format!("Invalid standard ID: 0x{:X}", frame.id)))?;
        let can_frame = CanFrame::new(id, frame.data_slice()).ok_or_else(|| {
            CanError::Device(format!("Failed to create frame with ID 0x{:X}", frame.id))
        })?;

        if let Err(e) = self.socket.write_frame(&can_frame) {
            // 写入失败意味着传输已不可信：强制关闭，让接收线程重开
            warn!("CAN write failed on '{}': {}, forcing close", self.interface, e);
            self.shutdown();
            return Err(CanError::Io(e));
        }

        trace!("Sent CAN frame: ID=0x{:X}, len={}", frame.id, frame.len);
        Ok(())
    }

    fn recv(&self) -> Result<BusFrame, CanError> {
        loop {
            let can_frame = match self.socket.read_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    if self.is_closed() {
                        return Err(CanError::Closed);
                    }
                    return Err(CanError::Io(e));
                },
            };

            // 错误帧不进入协议层
            if let CanFrame::Error(e) = can_frame {
                warn!("CAN error frame received on '{}': {:?}", self.interface, e);
                continue;
            }

            let mut data = [0u8; 8];
            let payload = can_frame.data();
            let len = payload.len().min(8);
            data[..len].copy_from_slice(&payload[..len]);

            return Ok(BusFrame {
                id: can_frame.raw_id() & 0x1FFF_FFFF,
                data,
                len: len as u8,
            });
        }
    }

    /// 发送冲刷屏障
    ///
    /// 对 CAN socket 调用 `fsync(2)`，阻塞直到之前写入的帧全部交付。
    fn flush(&self) -> Result<(), CanError> {
        if self.is_closed() {
            return Err(CanError::Closed);
        }

        let ret = unsafe { libc::fsync(self.socket.as_raw_fd()) };
        if ret != 0 {
            return Err(CanError::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// 强制关闭传输，解除挂起的阻塞读取
    fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            unsafe {
                libc::shutdown(self.socket.as_raw_fd(), libc::SHUT_RDWR);
            }
            trace!("CAN interface '{}' shut down", self.interface);
        }
    }
}

/// SocketCAN 传输工厂
#[derive(Debug, Clone)]
pub struct SocketCanFactory {
    interface: String,
}

impl SocketCanFactory {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
        }
    }
}

impl TransportFactory for SocketCanFactory {
    type Transport = SocketCanTransport;

    fn open(&self) -> Result<Self::Transport, CanError> {
        SocketCanTransport::open(self.interface.clone())
    }
}
