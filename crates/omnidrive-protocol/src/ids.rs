//! CAN ID 偏移表与保留 ID
//!
//! 每个电机轴占用一个基地址（节点号），其各个通道按固定偏移寻址。

/// 快速广播通道偏移（电机 -> 主机，位置 + 速度）
pub const OFFSET_FAST_UPDATE: u32 = 0x180;

/// 命令响应通道偏移（电机 -> 主机）
pub const OFFSET_RESPONSE: u32 = 0x280;

/// 命令请求通道偏移（主机 -> 电机）
pub const OFFSET_REQUEST: u32 = 0x300;

/// 参数写入应答通道偏移（电机 -> 主机）
pub const OFFSET_PARAM_ACK: u32 = 0x580;

/// 参数写入通道偏移（主机 -> 电机）
pub const OFFSET_PARAM_WRITE: u32 = 0x600;

/// 周期触发帧 ID（零长度，通知所有电机锁存并发送快速广播帧）
pub const SYNC_ID: u32 = 0x80;

/// 网络管理帧 ID（广播）
pub const NMT_ID: u32 = 0x00;

/// 网络管理 "start network" 负载
pub const NMT_START_PAYLOAD: [u8; 2] = [1, 0];

/// 单个电机轴的全部通道 ID
///
/// 配置加载时由基地址一次性推导，之后只读。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorIds {
    /// 基地址（节点号）
    pub base: u32,
    /// 快速广播（接收）
    pub fast_update: u32,
    /// 命令响应（接收）
    pub response: u32,
    /// 命令请求（发送）
    pub request: u32,
    /// 参数写入应答（接收）
    pub param_ack: u32,
    /// 参数写入（发送）
    pub param_write: u32,
}

impl MotorIds {
    pub fn from_base(base: u32) -> Self {
        Self {
            base,
            fast_update: base + OFFSET_FAST_UPDATE,
            response: base + OFFSET_RESPONSE,
            request: base + OFFSET_REQUEST,
            param_ack: base + OFFSET_PARAM_ACK,
            param_write: base + OFFSET_PARAM_WRITE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motor_ids_from_base() {
        let ids = MotorIds::from_base(0x05);
        assert_eq!(ids.fast_update, 0x185);
        assert_eq!(ids.response, 0x285);
        assert_eq!(ids.request, 0x305);
        assert_eq!(ids.param_ack, 0x585);
        assert_eq!(ids.param_write, 0x605);
    }
}
