//! 反馈帧解析
//!
//! 两种解码形态：
//!
//! - **快速广播帧**（8 字节）：i32 位置 + i32 速度，单位为编码器 tick 和 tick/s
//! - **命令响应帧**（8 字节）：前两字节为产生该响应的 ASCII 命令名，
//!   字节 4..8 为 i32 负载；回零状态响应直接使用字节 4 作为布尔值

use crate::{BusFrame, CmdName, ProtocolError, check_len, command::names};

/// 快速广播帧：当前位置与速度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastUpdate {
    /// 编码器位置 [tick]
    pub position: i32,
    /// 编码器速度 [tick/s]
    pub velocity: i32,
}

impl FastUpdate {
    pub fn parse(frame: &BusFrame) -> Result<Self, ProtocolError> {
        check_len(frame, 8)?;
        Ok(Self {
            position: i32::from_le_bytes(frame.data[0..4].try_into().unwrap()),
            velocity: i32::from_le_bytes(frame.data[4..8].try_into().unwrap()),
        })
    }
}

/// 命令响应帧（按命令名分派）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// 状态字（SR）
    Status(i32),
    /// 失效详情字（MF）
    Failure(i32),
    /// 回零事件状态（HM）：字节 4 为 0 表示已完成，非 0 表示仍在进行
    Homing { finished: bool },
    /// 其他命令的响应，原样保留
    Other { name: CmdName, value: i32 },
}

impl Response {
    pub fn parse(frame: &BusFrame) -> Result<Self, ProtocolError> {
        check_len(frame, 8)?;
        let name: CmdName = [frame.data[0], frame.data[1]];
        let value = i32::from_le_bytes(frame.data[4..8].try_into().unwrap());

        Ok(match name {
            names::SR => Self::Status(value),
            names::MF => Self::Failure(value),
            names::HM => Self::Homing {
                finished: frame.data[4] == 0,
            },
            _ => Self::Other { name, value },
        })
    }
}
