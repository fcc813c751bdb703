//! 命令帧构建
//!
//! 三种命令帧形态，均为定长字节帧：
//!
//! - **查询**（4 字节）：两个 ASCII 命令名字节 + 16-bit 小端参数索引
//! - **整数写入**（8 字节）：查询头 + 有符号 32-bit 小端值
//! - **参数对象写入**（8 字节）：用于 PDO 映射配置的独立窄协议

use crate::BusFrame;

/// 两字节 ASCII 命令名
pub type CmdName = [u8; 2];

/// 命令名常量
pub mod names {
    use super::CmdName;

    /// 状态字查询
    pub const SR: CmdName = *b"SR";
    /// 失效详情字查询
    pub const MF: CmdName = *b"MF";
    /// 回零（homing）参数组
    pub const HM: CmdName = *b"HM";
    /// 电机上电/断电
    pub const MO: CmdName = *b"MO";
    /// 速度目标（jog velocity）
    pub const JV: CmdName = *b"JV";
    /// 绝对位置目标
    pub const PA: CmdName = *b"PA";
    /// 开始运动
    pub const BG: CmdName = *b"BG";
    /// 停止运动
    pub const ST: CmdName = *b"ST";
    /// 控制单元模式
    pub const UM: CmdName = *b"UM";
    /// 速度曲线模式
    pub const PM: CmdName = *b"PM";
    /// 最大加速度
    pub const AC: CmdName = *b"AC";
    /// 最大减速度
    pub const DC: CmdName = *b"DC";
    /// 位置环绕模数
    pub const XM: CmdName = *b"XM";
    /// 位置计数器
    pub const PX: CmdName = *b"PX";
    /// 目标到位窗口
    pub const TR: CmdName = *b"TR";
}

/// 参数索引高字节掩码：两个最高有效位必须为 0（协议约定）。
const INDEX_HIGH_MASK: u8 = 0x3F;

/// 参数对象写入控制字节的组成部分
const INIT_DOWNLOAD_REQUEST: u8 = 0x20;
const EXPEDITED: u8 = 0x02;
const SIZE_INDICATED: u8 = 0x01;

/// 构建查询帧（4 字节）
///
/// `id` 为目标电机的命令请求通道 ID。
pub fn encode_query(id: u32, name: CmdName, index: u16) -> BusFrame {
    let data = [
        name[0],
        name[1],
        index as u8,
        ((index >> 8) as u8) & INDEX_HIGH_MASK,
    ];
    BusFrame::new(id, &data)
}

/// 构建整数写入帧（8 字节）
pub fn encode_set_int(id: u32, name: CmdName, index: u16, value: i32) -> BusFrame {
    let v = value.to_le_bytes();
    let data = [
        name[0],
        name[1],
        index as u8,
        ((index >> 8) as u8) & INDEX_HIGH_MASK,
        v[0],
        v[1],
        v[2],
        v[3],
    ];
    BusFrame::new(id, &data)
}

/// 构建参数对象写入帧（8 字节，expedited 下载）
///
/// `id` 为目标电机的参数写入通道 ID。
pub fn encode_param_write(id: u32, obj_index: u16, sub_index: u8, value: i32) -> BusFrame {
    let idx = obj_index.to_le_bytes();
    let v = value.to_le_bytes();
    let data = [
        INIT_DOWNLOAD_REQUEST | EXPEDITED | SIZE_INDICATED,
        idx[0],
        idx[1],
        sub_index,
        v[0],
        v[1],
        v[2],
        v[3],
    ];
    BusFrame::new(id, &data)
}

/// 构建周期触发帧（零长度）
pub fn encode_sync() -> BusFrame {
    BusFrame::new(crate::ids::SYNC_ID, &[])
}

/// 构建网络启动广播帧
pub fn encode_network_start() -> BusFrame {
    BusFrame::new(crate::ids::NMT_ID, &crate::ids::NMT_START_PAYLOAD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_query_layout() {
        let frame = encode_query(0x305, names::SR, 0);
        assert_eq!(frame.id, 0x305);
        assert_eq!(frame.len, 4);
        assert_eq!(frame.data_slice(), &[b'S', b'R', 0, 0]);
    }

    #[test]
    fn test_encode_query_index_little_endian() {
        let frame = encode_query(0x305, names::HM, 0x1234);
        assert_eq!(frame.data_slice(), &[b'H', b'M', 0x34, 0x12]);
    }

    #[test]
    fn test_encode_query_masks_index_high_bits() {
        // 索引高字节的两个最高位必须为 0
        let frame = encode_query(0x305, names::HM, 0xFFFF);
        assert_eq!(frame.data[3], 0x3F);
    }

    #[test]
    fn test_encode_set_int_layout() {
        let frame = encode_set_int(0x305, names::JV, 0, 0x1234_5678);
        assert_eq!(frame.len, 8);
        assert_eq!(
            frame.data_slice(),
            &[b'J', b'V', 0, 0, 0x78, 0x56, 0x34, 0x12]
        );
    }

    #[test]
    fn test_encode_set_int_boundary_values() {
        for value in [0, -1, i32::MIN, i32::MAX] {
            let frame = encode_set_int(0x305, names::HM, 2, value);
            assert_eq!(i32::from_le_bytes(frame.data[4..8].try_into().unwrap()), value);
        }
    }

    #[test]
    fn test_encode_param_write_layout() {
        let frame = encode_param_write(0x605, 0x1A00, 1, 0x6064_0020);
        assert_eq!(frame.id, 0x605);
        assert_eq!(frame.len, 8);
        assert_eq!(frame.data[0], 0x23);
        assert_eq!(&frame.data[1..3], &[0x00, 0x1A]);
        assert_eq!(frame.data[3], 1);
        assert_eq!(&frame.data[4..8], &[0x20, 0x00, 0x64, 0x60]);
    }

    #[test]
    fn test_encode_param_write_boundary_values() {
        for value in [0, -1, i32::MIN, i32::MAX] {
            let frame = encode_param_write(0x605, 0x1800, 2, value);
            assert_eq!(i32::from_le_bytes(frame.data[4..8].try_into().unwrap()), value);
        }
    }

    #[test]
    fn test_encode_sync_is_zero_length() {
        let frame = encode_sync();
        assert_eq!(frame.id, 0x80);
        assert_eq!(frame.len, 0);
    }

    #[test]
    fn test_encode_network_start() {
        let frame = encode_network_start();
        assert_eq!(frame.id, 0x00);
        assert_eq!(frame.data_slice(), &[1, 0]);
    }
}
