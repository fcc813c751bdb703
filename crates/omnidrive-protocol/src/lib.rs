//! # Omnidrive Protocol
//!
//! 驱动模块 CAN 总线协议定义（无硬件依赖）。
//!
//! ## 模块
//!
//! - `ids`: CAN ID 偏移表与保留 ID
//! - `command`: 命令帧构建（查询 / 整数写入 / 参数对象写入）
//! - `feedback`: 反馈帧解析（快速广播 / 命令响应）
//!
//! ## 字节序
//!
//! 协议中所有整数字段均为 Intel (LSB) 低位在前（小端字节序）。

pub mod command;
pub mod feedback;
pub mod ids;

pub use command::*;
pub use feedback::*;
pub use ids::*;

use thiserror::Error;

/// CAN 2.0 标准帧的统一抽象
///
/// 协议层和硬件层之间的中间抽象：协议层不依赖底层 CAN 实现，
/// 上层通过 `BusTransport` trait 使用统一的帧类型。
///
/// - **Copy**：零成本复制，适合高频总线场景
/// - **固定 8 字节**：避免堆分配，未使用部分为 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFrame {
    /// CAN ID（11-bit 标准帧）
    pub id: u32,

    /// 帧数据（固定 8 字节）
    pub data: [u8; 8],

    /// 有效数据长度 (0-8)
    pub len: u8,
}

impl BusFrame {
    /// 创建标准帧，数据超过 8 字节的部分会被截断
    pub fn new(id: u32, data: &[u8]) -> Self {
        let mut fixed = [0u8; 8];
        let len = data.len().min(8);
        fixed[..len].copy_from_slice(&data[..len]);

        Self {
            id,
            data: fixed,
            len: len as u8,
        }
    }

    /// 获取数据切片（只包含有效数据）
    pub fn data_slice(&self) -> &[u8] {
        &self.data[..(self.len as usize).min(8)]
    }
}

/// 协议解析错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Unexpected CAN ID: 0x{id:X}")]
    UnexpectedCanId { id: u32 },
}

/// 校验帧长度恰好为 `expected`，同时拒绝声明长度超过 8 的非法帧。
///
/// 解码路径不允许读取超出声明长度的数据。
pub(crate) fn check_len(frame: &BusFrame, expected: usize) -> Result<(), ProtocolError> {
    let actual = frame.len as usize;
    if actual > 8 || actual != expected {
        return Err(ProtocolError::InvalidLength { expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_frame_truncates_to_eight_bytes() {
        let frame = BusFrame::new(0x123, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(frame.len, 8);
        assert_eq!(frame.data_slice(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_bus_frame_zero_length() {
        let frame = BusFrame::new(0x80, &[]);
        assert_eq!(frame.len, 0);
        assert!(frame.data_slice().is_empty());
        assert_eq!(frame.data, [0u8; 8]);
    }

    #[test]
    fn test_check_len_rejects_oversized_declared_length() {
        let mut frame = BusFrame::new(0x123, &[0; 8]);
        frame.len = 9;
        assert!(matches!(
            check_len(&frame, 8),
            Err(ProtocolError::InvalidLength { expected: 8, actual: 9 })
        ));
    }
}
