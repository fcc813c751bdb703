//! # Omnidrive CAN Adapter Layer
//!
//! CAN 硬件抽象层，提供统一的总线传输接口。
//!
//! 传输对象一旦打开即可跨线程共享（所有方法接收 `&self`）：
//! 接收线程阻塞读取的同时，控制线程可以发送帧或执行发送冲刷屏障。

use thiserror::Error;

// 重新导出 omnidrive-protocol 中的 BusFrame
pub use omnidrive_protocol::BusFrame;

#[cfg(target_os = "linux")]
pub mod socketcan;

#[cfg(target_os = "linux")]
pub use socketcan::{SocketCanFactory, SocketCanTransport};

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockBus, MockFactory, MockTransport};

/// CAN 适配层统一错误类型
#[derive(Error, Debug)]
pub enum CanError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device Error: {0}")]
    Device(String),

    /// 传输尚未建立（写入时没有可用的总线连接）
    #[error("Bus not connected")]
    NotConnected,

    /// 传输已被关闭（阻塞读取被强制唤醒）
    #[error("Bus closed")]
    Closed,
}

/// 原始帧传输接口
///
/// 实现者必须保证：
/// - `recv` 阻塞直到有帧可读、传输被 `shutdown` 强制关闭或发生读取错误
/// - `flush` 返回时，之前所有 `send` 写入均已可观测地交付给传输层
///   （发送冲刷屏障，后续协议步骤依赖此顺序保证）
/// - `shutdown` 可以从任意线程调用，用于解除挂起的阻塞读取
pub trait BusTransport: Send + Sync {
    fn send(&self, frame: &BusFrame) -> Result<(), CanError>;

    fn recv(&self) -> Result<BusFrame, CanError>;

    fn flush(&self) -> Result<(), CanError>;

    fn shutdown(&self);
}

/// 传输工厂：接收线程通过它实现关闭-重开-退避的重连循环
pub trait TransportFactory: Send + 'static {
    type Transport: BusTransport + 'static;

    fn open(&self) -> Result<Self::Transport, CanError>;
}
