//! 驱动配置
//!
//! 启动时一次性加载（TOML 反序列化），经 `validate` 校验后只读。
//! 轮组数量由 `wheels` 列表长度决定。

use crate::error::ConfigError;
use serde::Deserialize;
use std::time::Duration;

/// 单个电机轴配置
#[derive(Debug, Clone, Deserialize)]
pub struct MotorConfig {
    /// CAN 节点基地址
    pub can_id: u32,
    /// 关节名（上报关节状态时使用）
    pub joint_name: String,
    /// 旋转方向符号（+1 / -1）
    pub rot_sign: i32,
    /// 减速比（电机转数 / 输出转数）
    pub gear_ratio: f64,
    /// 编码器每转 tick 数
    pub enc_ticks_per_rev: i32,
    /// 速度指令上限 [tick/s]
    #[serde(default = "default_max_vel_enc_s")]
    pub max_vel_enc_s: i32,
    /// 加减速上限 [tick/s^2]
    #[serde(default = "default_max_accel_enc_s")]
    pub max_accel_enc_s: i32,
}

/// 单个轮组配置（行走轴 + 转向轴）
#[derive(Debug, Clone, Deserialize)]
pub struct WheelConfig {
    pub drive: MotorConfig,
    pub steer: MotorConfig,
    /// 轮组安装零位角 [rad]
    pub home_angle: f64,
    /// 回零开关数字输入通道号
    pub home_dig_in: i32,
    /// 回零事件发生时设置的绝对编码器偏移 [tick]
    pub home_enc_offset: i32,
}

/// 全局驱动配置
#[derive(Debug, Clone, Deserialize)]
pub struct DriveConfig {
    /// CAN 接口名（如 "can0"）
    pub can_interface: String,
    /// 电机状态应答超时 [s]
    #[serde(default = "default_motor_timeout")]
    pub motor_timeout_s: f64,
    /// 回零旋转速度 [rad/s]
    #[serde(default = "default_home_vel")]
    pub home_vel: f64,
    /// 控制周期频率 [Hz]
    #[serde(default = "default_update_rate")]
    pub update_rate_hz: f64,
    /// 轮组列表
    pub wheels: Vec<WheelConfig>,
}

fn default_max_vel_enc_s() -> i32 {
    1_000_000
}

fn default_max_accel_enc_s() -> i32 {
    1_000_000
}

fn default_motor_timeout() -> f64 {
    1.0
}

fn default_home_vel() -> f64 {
    -1.0
}

fn default_update_rate() -> f64 {
    50.0
}

impl MotorConfig {
    fn validate(&self, prefix: &str) -> Result<(), ConfigError> {
        if self.joint_name.is_empty() {
            return Err(ConfigError::invalid(
                format!("{prefix}.joint_name"),
                "must not be empty",
            ));
        }
        if self.rot_sign != 1 && self.rot_sign != -1 {
            return Err(ConfigError::invalid(
                format!("{prefix}.rot_sign"),
                "must be +1 or -1",
            ));
        }
        if self.gear_ratio <= 0.0 {
            return Err(ConfigError::invalid(
                format!("{prefix}.gear_ratio"),
                "must be positive",
            ));
        }
        if self.enc_ticks_per_rev <= 0 {
            return Err(ConfigError::invalid(
                format!("{prefix}.enc_ticks_per_rev"),
                "must be positive",
            ));
        }
        if self.max_vel_enc_s <= 0 {
            return Err(ConfigError::invalid(
                format!("{prefix}.max_vel_enc_s"),
                "must be positive",
            ));
        }
        if self.max_accel_enc_s <= 0 {
            return Err(ConfigError::invalid(
                format!("{prefix}.max_accel_enc_s"),
                "must be positive",
            ));
        }
        Ok(())
    }
}

impl DriveConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wheels.is_empty() {
            return Err(ConfigError::NoWheels);
        }
        if self.can_interface.is_empty() {
            return Err(ConfigError::MissingInterface);
        }
        if !(self.motor_timeout_s > 0.0) {
            return Err(ConfigError::invalid("motor_timeout_s", "must be positive"));
        }
        if !(self.update_rate_hz > 0.0) {
            return Err(ConfigError::invalid("update_rate_hz", "must be positive"));
        }
        for (i, wheel) in self.wheels.iter().enumerate() {
            wheel.drive.validate(&format!("wheels[{i}].drive"))?;
            wheel.steer.validate(&format!("wheels[{i}].steer"))?;
        }
        Ok(())
    }

    pub fn motor_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.motor_timeout_s)
    }

    pub fn update_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.update_rate_hz)
    }
}
