//! 单电机轴状态机与单位换算
//!
//! 状态机由状态字驱动：`PreInitialized -> {OperationEnabled, OperationDisabled}`，
//! 任意状态均可进入 `MotorFailure`（粘滞，直到后续状态字清除失效位）。
//! 状态转换与失效分类只在变化时上报一次，避免日志刷屏。

use crate::config::MotorConfig;
use omnidrive_protocol::{FastUpdate, MotorIds};
use std::f64::consts::PI;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// 电机轴运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorState {
    /// 初始状态，尚未收到任何状态字
    PreInitialized,
    /// 电机上电并可接受运动指令
    OperationEnabled,
    /// 电机断电或未使能
    OperationDisabled,
    /// 失效（含状态应答超时），粘滞直到失效位清除
    MotorFailure,
}

/// 回零开关状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingSwitch {
    /// 未收到任何回零状态应答
    Unknown,
    /// 回零事件尚未发生
    Active,
    /// 回零事件已完成
    Finished,
}

/// 状态字的失效子码（位 1-3）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    UnderVoltage,
    OverVoltage,
    ShortCircuit,
    OverHeating,
    Unknown,
}

/// 应用状态字后需要控制器执行的后续动作
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusEffect {
    /// 需要追加查询失效详情通道
    pub request_failure_detail: bool,
    /// 本次上报的失效分类（仅在状态字变化时为 Some）
    pub reported_fault: Option<FaultKind>,
}

/// 状态字位定义
const STATUS_FAULT: i32 = 1;
const STATUS_SUB_CODE_MASK: i32 = 0xE;
const STATUS_ENABLED: i32 = 1 << 4;
const STATUS_FAILURE_LATCHED: i32 = 1 << 6;

fn classify_fault(status: i32) -> FaultKind {
    match status & STATUS_SUB_CODE_MASK {
        2 => FaultKind::UnderVoltage,
        4 => FaultKind::OverVoltage,
        10 => FaultKind::ShortCircuit,
        12 => FaultKind::OverHeating,
        _ => FaultKind::Unknown,
    }
}

/// 单电机轴运行时状态
#[derive(Debug)]
pub struct Motor {
    pub joint_name: String,
    pub ids: MotorIds,
    pub rot_sign: i32,
    pub gear_ratio: f64,
    pub enc_ticks_per_rev: i32,
    pub max_vel_enc_s: i32,
    pub max_accel_enc_s: i32,

    pub state: MotorState,
    pub homing_switch: HomingSwitch,

    /// 当前编码器位置 [tick]
    pub enc_pos: i32,
    /// 当前编码器速度 [tick/s]
    pub enc_vel: i32,
    /// 当前状态字
    pub status_word: i32,
    /// 当前失效详情字
    pub failure_word: i32,

    /// 最近一次状态查询发出的时刻
    pub request_sent: Option<Instant>,
    /// 最近一次状态应答到达的时刻
    pub status_received: Option<Instant>,
    /// 最近一次快速广播帧到达的时刻
    pub last_update: Option<Instant>,
}

impl Motor {
    pub fn new(cfg: &MotorConfig) -> Self {
        Self {
            joint_name: cfg.joint_name.clone(),
            ids: MotorIds::from_base(cfg.can_id),
            rot_sign: cfg.rot_sign,
            gear_ratio: cfg.gear_ratio,
            enc_ticks_per_rev: cfg.enc_ticks_per_rev,
            max_vel_enc_s: cfg.max_vel_enc_s,
            max_accel_enc_s: cfg.max_accel_enc_s,
            state: MotorState::PreInitialized,
            homing_switch: HomingSwitch::Unknown,
            enc_pos: 0,
            enc_vel: 0,
            status_word: 0,
            failure_word: 0,
            request_sent: None,
            status_received: None,
            last_update: None,
        }
    }

    /// 重置状态机（初始化与急停解除时调用）
    pub fn reset(&mut self) {
        self.state = MotorState::PreInitialized;
    }

    /// 应用快速广播帧
    pub fn apply_fast_update(&mut self, update: FastUpdate, now: Instant) {
        self.enc_pos = update.position;
        self.enc_vel = update.velocity;
        self.last_update = Some(now);
    }

    /// 应用状态字，驱动状态机
    ///
    /// 失效分类只在状态字变化时上报；失效详情查询则在每次
    /// 带失效位的应答上都请求，保证详情字不被错过。
    pub fn apply_status(&mut self, word: i32, now: Instant) -> StatusEffect {
        let prev = self.status_word;
        self.status_word = word;

        let mut effect = StatusEffect::default();

        if word & STATUS_FAULT != 0 {
            if word != prev {
                let fault = classify_fault(word);
                error!("{}: drive fault: {:?}", self.joint_name, fault);
                effect.reported_fault = Some(fault);
            }
            effect.request_failure_detail = true;
            self.state = MotorState::MotorFailure;
        } else if word & STATUS_FAILURE_LATCHED != 0 {
            if word != prev {
                error!("{}: failure latched", self.joint_name);
                effect.reported_fault = Some(FaultKind::Unknown);
            }
            effect.request_failure_detail = true;
            self.state = MotorState::MotorFailure;
        } else if word & STATUS_ENABLED != 0 {
            if self.state != MotorState::OperationEnabled {
                info!("{}: operation enabled", self.joint_name);
            }
            self.state = MotorState::OperationEnabled;
        } else {
            if self.state != MotorState::OperationDisabled {
                info!("{}: operation disabled", self.joint_name);
            }
            self.state = MotorState::OperationDisabled;
        }

        self.status_received = Some(now);
        effect
    }

    /// 应用失效详情字（仅上报，不驱动状态机）
    pub fn apply_failure_word(&mut self, word: i32) {
        let prev = self.failure_word;
        self.failure_word = word;

        if word == prev {
            return;
        }
        if word & (1 << 2) != 0 {
            error!("{}: motor failure: feedback loss", self.joint_name);
        } else if word & (1 << 3) != 0 {
            error!("{}: motor failure: peak current exceeded", self.joint_name);
        } else if word & (1 << 7) != 0 {
            error!("{}: motor failure: speed track error", self.joint_name);
        } else if word & (1 << 8) != 0 {
            error!("{}: motor failure: position track error", self.joint_name);
        } else if word & (1 << 17) != 0 {
            error!("{}: motor failure: speed limit exceeded", self.joint_name);
        } else if word & (1 << 21) != 0 {
            error!("{}: motor failure: motor stuck", self.joint_name);
        }
    }

    /// 状态应答超时检查（每控制周期调用，而非帧到达时）
    ///
    /// 已发出状态查询且超时仍无对应应答时强制进入失效态，
    /// 超时上报只在转换进入失效态的那一次发生。
    pub fn check_timeout(&mut self, now: Instant, timeout: Duration) {
        let Some(sent) = self.request_sent else {
            return;
        };
        let unanswered = match self.status_received {
            None => true,
            Some(received) => received < sent,
        };
        if unanswered && now.duration_since(sent) > timeout {
            if self.state != MotorState::MotorFailure {
                error!("{}: motor status timeout!", self.joint_name);
            }
            self.state = MotorState::MotorFailure;
        }
    }

    /// 快速广播是否晚于给定时刻到达
    pub fn updated_after(&self, t: Option<Instant>) -> bool {
        match (self.last_update, t) {
            (Some(update), Some(t)) => update > t,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// 输出轴一圈对应的编码器 tick 数
    pub fn ticks_per_wheel_rev(&self) -> i32 {
        (self.enc_ticks_per_rev as f64 * self.gear_ratio) as i32
    }

    /// 输出轴角速度 [rad/s] 换算为受限的编码器速度 [tick/s]
    ///
    /// 符号在 f64 域施加：饱和截断到 `i32::MIN` 后再取反会溢出。
    pub fn vel_to_ticks(&self, rad_s: f64) -> i32 {
        let motor_rev_s = self.gear_ratio * rad_s / (2.0 * PI);
        let ticks = f64::from(self.rot_sign) * motor_rev_s * f64::from(self.enc_ticks_per_rev);
        (ticks as i32).clamp(-self.max_vel_enc_s, self.max_vel_enc_s)
    }

    /// 输出轴绝对角度 [rad] 换算为编码器位置 [tick]
    pub fn pos_to_ticks(&self, rad: f64) -> i32 {
        let motor_rev = self.gear_ratio * rad / (2.0 * PI);
        (f64::from(self.rot_sign) * motor_rev * f64::from(self.enc_ticks_per_rev)) as i32
    }

    /// 当前编码器位置换算为输出轴角度 [rad]
    ///
    /// 编码器值可达 `i32::MIN`，符号必须在 f64 域施加。
    pub fn pos_rad(&self) -> f64 {
        2.0 * PI * f64::from(self.rot_sign) * f64::from(self.enc_pos)
            / f64::from(self.enc_ticks_per_rev)
            / self.gear_ratio
    }

    /// 当前编码器速度换算为输出轴角速度 [rad/s]
    pub fn vel_rad_s(&self) -> f64 {
        2.0 * PI * f64::from(self.rot_sign) * f64::from(self.enc_vel)
            / f64::from(self.enc_ticks_per_rev)
            / self.gear_ratio
    }
}

/// 单个轮组（行走轴 + 转向轴）
#[derive(Debug)]
pub struct WheelModule {
    pub drive: Motor,
    pub steer: Motor,
    /// 回零开关数字输入通道号
    pub home_dig_in: i32,
    /// 回零事件发生时设置的绝对编码器偏移 [tick]
    pub home_enc_offset: i32,
    /// 轮组安装零位角 [rad]
    pub home_angle: f64,

    /// 最近一次同步周期换算出的关节量
    pub wheel_pos: f64,
    pub wheel_vel: f64,
    pub steer_pos: f64,
    pub steer_vel: f64,
}

impl WheelModule {
    pub fn new(cfg: &crate::config::WheelConfig) -> Self {
        Self {
            drive: Motor::new(&cfg.drive),
            steer: Motor::new(&cfg.steer),
            home_dig_in: cfg.home_dig_in,
            home_enc_offset: cfg.home_enc_offset,
            home_angle: cfg.home_angle,
            wheel_pos: 0.0,
            wheel_vel: 0.0,
            steer_pos: 0.0,
            steer_vel: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn motor() -> Motor {
        Motor::new(&MotorConfig {
            can_id: 5,
            joint_name: "wheel0_steer".to_string(),
            rot_sign: 1,
            gear_ratio: 10.0,
            enc_ticks_per_rev: 4096,
            max_vel_enc_s: 100_000,
            max_accel_enc_s: 1_000_000,
        })
    }

    #[test]
    fn test_status_enabled_and_disabled_transitions() {
        let mut m = motor();
        let now = Instant::now();
        assert_eq!(m.state, MotorState::PreInitialized);

        m.apply_status(1 << 4, now);
        assert_eq!(m.state, MotorState::OperationEnabled);

        m.apply_status(0, now);
        assert_eq!(m.state, MotorState::OperationDisabled);
    }

    #[test]
    fn test_fault_bit_reports_once_per_distinct_word() {
        let mut m = motor();
        let now = Instant::now();

        // 位 1-3 子码 2 => 欠压
        let effect = m.apply_status(0x3, now);
        assert_eq!(m.state, MotorState::MotorFailure);
        assert!(effect.request_failure_detail);
        assert_eq!(effect.reported_fault, Some(FaultKind::UnderVoltage));

        // 同一状态字重复到达：不再上报，但依旧请求失效详情
        let effect = m.apply_status(0x3, now);
        assert_eq!(m.state, MotorState::MotorFailure);
        assert!(effect.request_failure_detail);
        assert_eq!(effect.reported_fault, None);

        // 状态字变化：重新分类上报
        let effect = m.apply_status(0xD, now);
        assert_eq!(effect.reported_fault, Some(FaultKind::OverHeating));
    }

    #[test]
    fn test_fault_classification_sub_codes() {
        assert_eq!(classify_fault(0x3), FaultKind::UnderVoltage);
        assert_eq!(classify_fault(0x5), FaultKind::OverVoltage);
        assert_eq!(classify_fault(0xB), FaultKind::ShortCircuit);
        assert_eq!(classify_fault(0xD), FaultKind::OverHeating);
        assert_eq!(classify_fault(0x1), FaultKind::Unknown);
    }

    #[test]
    fn test_latched_failure_requests_detail() {
        let mut m = motor();
        let effect = m.apply_status(1 << 6, Instant::now());
        assert_eq!(m.state, MotorState::MotorFailure);
        assert!(effect.request_failure_detail);
    }

    #[test]
    fn test_failure_is_sticky_until_cleared() {
        let mut m = motor();
        let now = Instant::now();

        m.apply_status(0x3, now);
        assert_eq!(m.state, MotorState::MotorFailure);

        // 失效位清除且使能位置位 => 恢复运行
        m.apply_status(1 << 4, now);
        assert_eq!(m.state, MotorState::OperationEnabled);
    }

    #[test]
    fn test_timeout_forces_failure_then_recovers() {
        let mut m = motor();
        let timeout = Duration::from_millis(100);
        let sent = Instant::now();
        m.request_sent = Some(sent);

        // 超时前不动作
        m.check_timeout(sent + Duration::from_millis(50), timeout);
        assert_eq!(m.state, MotorState::PreInitialized);

        // 超时且无应答 => 失效
        m.check_timeout(sent + Duration::from_millis(200), timeout);
        assert_eq!(m.state, MotorState::MotorFailure);

        // 新鲜应答（晚于请求）到达后恢复，后续超时检查不再触发
        m.apply_status(1 << 4, sent + Duration::from_millis(250));
        assert_eq!(m.state, MotorState::OperationEnabled);
        m.check_timeout(sent + Duration::from_millis(400), timeout);
        assert_eq!(m.state, MotorState::OperationEnabled);
    }

    #[test]
    fn test_timeout_ignores_stale_response() {
        let mut m = motor();
        let timeout = Duration::from_millis(100);
        let t0 = Instant::now();

        // 应答早于最近一次请求 => 视为未应答
        m.status_received = Some(t0);
        m.request_sent = Some(t0 + Duration::from_millis(10));
        m.check_timeout(t0 + Duration::from_millis(200), timeout);
        assert_eq!(m.state, MotorState::MotorFailure);
    }

    #[test]
    fn test_vel_to_ticks_clamped_and_signed() {
        let mut m = motor();

        // 1 rad/s: 10 * 1 / 2π 转/s * 4096 tick = 6518 tick/s
        let ticks = m.vel_to_ticks(1.0);
        assert_eq!(ticks, 6518);

        m.rot_sign = -1;
        assert_eq!(m.vel_to_ticks(1.0), -6518);

        // 超限截断
        m.rot_sign = 1;
        assert_eq!(m.vel_to_ticks(1e6), m.max_vel_enc_s);
        assert_eq!(m.vel_to_ticks(-1e6), -m.max_vel_enc_s);
    }

    #[test]
    fn test_pos_conversions_roundtrip() {
        let mut m = motor();
        let ticks = m.pos_to_ticks(PI);
        m.enc_pos = ticks;
        assert!((m.pos_rad() - PI).abs() < 1e-3);

        m.rot_sign = -1;
        let ticks = m.pos_to_ticks(PI);
        m.enc_pos = ticks;
        assert!((m.pos_rad() - PI).abs() < 1e-3);
    }

    #[test]
    fn test_conversions_handle_extreme_encoder_values() {
        // 快速广播帧可以携带任意 i32 边界值；rot_sign = -1 时
        // 换算不得在整数域取反（i32::MIN 取反会溢出）
        let mut m = motor();
        m.rot_sign = -1;
        m.apply_fast_update(
            FastUpdate {
                position: i32::MIN,
                velocity: i32::MIN,
            },
            Instant::now(),
        );

        let expected = 2.0 * PI * 2_147_483_648.0 / 4096.0 / 10.0;
        assert!((m.pos_rad() - expected).abs() < 1e-6);
        assert!((m.vel_rad_s() - expected).abs() < 1e-6);

        m.rot_sign = 1;
        assert!((m.pos_rad() + expected).abs() < 1e-6);

        // 指令换算同理：饱和截断后的符号施加不得溢出
        m.rot_sign = -1;
        assert_eq!(m.vel_to_ticks(1e12), -m.max_vel_enc_s);
        assert_eq!(m.pos_to_ticks(1e12), i32::MIN);
    }

    #[test]
    fn test_ticks_per_wheel_rev() {
        let m = motor();
        assert_eq!(m.ticks_per_wheel_rev(), 40960);
    }
}
