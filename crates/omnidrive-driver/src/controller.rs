//! 驱动控制器
//!
//! 持有控制状态锁与总线接收线程。对外暴露三个操作：
//!
//! - `initialize`: 幂等的上电初始化序列
//! - `update`: 单个控制周期（超时检查、回零编排、周期触发帧）
//! - `shutdown`: 尽力停车断电并终止接收线程
//!
//! 所有可变状态由单把粗粒度互斥锁保护，公开操作与帧处理回调
//! 在锁内全程串行化（状态字与时间戳等复合不变量必须一起更新）。

use crate::bus::{BusHandle, run_receive_loop};
use crate::config::DriveConfig;
use crate::error::DriverError;
use crate::motor::{HomingSwitch, Motor, MotorState, WheelModule};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use omnidrive_can::{BusFrame, BusTransport, TransportFactory};
use omnidrive_kinematics::normalize_angle;
use omnidrive_protocol::{
    CmdName, FastUpdate, Response, encode_network_start, encode_param_write, encode_query,
    encode_set_int, encode_sync, names,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};
use tracing::{error, info, warn};

/// 网络启动广播后的等待时间
const NETWORK_START_DELAY: Duration = Duration::from_millis(100);

/// 回零开始转动后、布防回零事件前的稳定等待时间
const HOMING_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// 转向回正判定容差 [rad]
const STEER_RESET_TOLERANCE: f64 = 0.01;

/// 每多少个控制周期请求一次全量状态
const STATUS_REQUEST_INTERVAL: u64 = 10;

/// 位置模式目标到位窗口 [tick]
const POS_TARGET_RADIUS: i32 = 15;

/// 位置模式目标到位时间 [ms]
const POS_TARGET_TIME_MS: i32 = 100;

/// 控制器生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveState {
    /// 尚未回零（初始状态，所有电机使能后自动进入回零）
    NotHomed,
    /// 回零进行中
    Homing,
    /// 回零完成，转向轴正在回正到绝对零位
    SteeringReset,
    /// 正常运行
    Operational,
    /// 回零被中断（电机掉线或急停），恢复后自动重新回零
    Interrupted,
}

/// 电机轴选择
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Drive,
    Steer,
}

/// 单个关节的状态记录
#[derive(Debug, Clone, PartialEq)]
pub struct JointState {
    pub name: String,
    pub position: f64,
    pub velocity: f64,
    pub effort: f64,
}

/// 一个控制周期的全量关节状态记录
///
/// 每个同步周期内所有电机均产生新测量值后发出一条，
/// 关节按配置顺序排列（每轮组先行走轴后转向轴）。
#[derive(Debug, Clone)]
pub struct JointStates {
    pub stamp: SystemTime,
    pub joints: Vec<JointState>,
}

struct Inner {
    wheels: Vec<WheelModule>,
    drive_state: DriveState,
    /// 急停状态（初始视为急停，等待外部解除）
    em_stop: bool,
    /// 电机重置待恢复标志（恢复后上报一次）
    motor_reset: bool,
    sync_counter: u64,
    /// 最近一次周期触发帧发出的时刻
    last_sync: Option<Instant>,
    /// 最近一次关节状态发布的时刻
    last_update: Option<Instant>,
}

struct Shared<T: BusTransport> {
    inner: Mutex<Inner>,
    bus: BusHandle<T>,
    joint_tx: Sender<JointStates>,
    joint_rx: Receiver<JointStates>,
    motor_timeout: Duration,
    home_vel: f64,
}

/// 驱动控制器
pub struct DriveController<T: BusTransport + 'static> {
    shared: Arc<Shared<T>>,
    rx_thread: Option<JoinHandle<()>>,
}

impl<T: BusTransport + 'static> DriveController<T> {
    /// 创建控制器并启动总线接收线程
    ///
    /// 返回的 `Receiver` 用于消费关节状态记录（容量 1，最新值优先）。
    pub fn new<F>(
        config: &DriveConfig,
        factory: F,
    ) -> Result<(Self, Receiver<JointStates>), DriverError>
    where
        F: TransportFactory<Transport = T>,
    {
        config.validate()?;

        let wheels = config.wheels.iter().map(WheelModule::new).collect();
        let (joint_tx, joint_rx) = crossbeam_channel::bounded(1);

        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                wheels,
                drive_state: DriveState::NotHomed,
                em_stop: true,
                motor_reset: true,
                sync_counter: 0,
                last_sync: None,
                last_update: None,
            }),
            bus: BusHandle::new(),
            joint_tx,
            joint_rx: joint_rx.clone(),
            motor_timeout: config.motor_timeout(),
            home_vel: config.home_vel,
        });

        let handler = shared.clone();
        let bus = shared.bus.clone();
        let rx_thread = std::thread::Builder::new()
            .name("omnidrive-can-rx".to_string())
            .spawn(move || {
                run_receive_loop(factory, bus, move |frame| handler.handle_frame(frame));
            })?;

        Ok((
            Self {
                shared,
                rx_thread: Some(rx_thread),
            },
            joint_rx,
        ))
    }

    /// 上电初始化序列（幂等，可在失败后整体重试）
    pub fn initialize(&self) -> Result<(), DriverError> {
        let mut inner = self.shared.inner.lock();

        // 发送侧等待 CAN 传输就绪
        self.shared.bus.set_gate(true);

        for wheel in &mut inner.wheels {
            wheel.drive.reset();
            wheel.steer.reset();
        }
        inner.drive_state = DriveState::NotHomed;

        self.shared.bus.transmit(&encode_network_start())?;
        self.shared.can_sync()?;

        std::thread::sleep(NETWORK_START_DELAY);

        self.shared.all_motors_off(&mut inner)?;
        self.shared.stop_motion(&inner)?;

        // 位置环绕模数设为输出轴一圈，回零后的绝对位置在编码器
        // 有限量程内得以保留
        for wheel in &inner.wheels {
            self.shared.set_motor_modulo(&wheel.drive, 1)?;
            self.shared.set_motor_modulo(&wheel.steer, 1)?;
        }
        self.shared.can_sync()?;

        for wheel in &inner.wheels {
            self.shared.set_motion_vel_ctrl(&wheel.drive)?;
            self.shared.set_motion_vel_ctrl(&wheel.steer)?;
        }
        self.shared.can_sync()?;

        for wheel in &inner.wheels {
            self.shared.reset_pos_counter(&wheel.drive)?;
            self.shared.reset_pos_counter(&wheel.steer)?;
        }
        self.shared.can_sync()?;

        // 快速广播帧映射：位置 + 速度，同步触发
        for wheel in &inner.wheels {
            self.shared.configure_pdo_mapping(&wheel.drive)?;
            self.shared.configure_pdo_mapping(&wheel.steer)?;
        }
        self.shared.can_sync()?;

        self.shared.all_motors_on(&inner)?;
        self.shared.request_status_all(&mut inner)?;

        Ok(())
    }

    /// 单个控制周期
    pub fn update(&self) -> Result<(), DriverError> {
        let mut inner = self.shared.inner.lock();
        let now = Instant::now();

        for wheel in &mut inner.wheels {
            wheel.drive.check_timeout(now, self.shared.motor_timeout);
            wheel.steer.check_timeout(now, self.shared.motor_timeout);
        }

        if !all_operational(&inner) {
            self.shared.stop_motion(&inner)?;
        }

        if inner.motor_reset && all_operational(&inner) {
            info!("All motors operational!");
            inner.motor_reset = false;
        }

        if matches!(
            inner.drive_state,
            DriveState::NotHomed | DriveState::Interrupted
        ) && all_operational(&inner)
        {
            info!("Start homing procedure ...");
            self.shared.start_homing(&mut inner)?;
        }

        if inner.drive_state == DriveState::Homing {
            if !all_operational(&inner) {
                error!("Homing has been interrupted!");
                inner.drive_state = DriveState::Interrupted;
            } else if homing_done(&inner) {
                self.shared.finish_homing(&mut inner)?;
                info!("Homing successful!");
            } else {
                // 继续轮询回零事件状态
                for wheel in &inner.wheels {
                    self.shared.query(&wheel.steer, names::HM, 1)?;
                }
                self.shared.can_sync()?;
            }
        }

        if inner.drive_state == DriveState::SteeringReset && all_operational(&inner) {
            let mut all_reached = true;
            for i in 0..inner.wheels.len() {
                if normalize_angle(inner.wheels[i].steer_pos).abs() > STEER_RESET_TOLERANCE {
                    all_reached = false;
                    self.shared.motor_set_pos_abs(&inner.wheels[i].steer, 0.0)?;
                }
            }
            if all_reached {
                info!("Steering reset successful!");
                inner.drive_state = DriveState::Operational;
            } else {
                self.shared.begin_motion(&inner)?;
            }
        }

        // 上一个同步周期是否有完整的测量数据发布
        let stale = match (inner.last_sync, inner.last_update) {
            (Some(sync), Some(update)) => update < sync,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if stale {
            warn!("Sync update timeout!");
        }

        // 周期触发帧：所有电机锁存并发送快速广播
        self.shared.bus.transmit(&encode_sync())?;
        self.shared.can_sync()?;

        inner.last_sync = Some(Instant::now());
        inner.sync_counter += 1;

        if inner.sync_counter % STATUS_REQUEST_INTERVAL == 0 {
            self.shared.request_status_all(&mut inner)?;
        }

        Ok(())
    }

    /// 急停信号输入
    ///
    /// 从急停到解除的转换触发电机重新布防：状态机复位、
    /// 重新上电并请求新状态。
    pub fn set_emergency_stop(&self, stopped: bool) -> Result<(), DriverError> {
        let mut inner = self.shared.inner.lock();

        if inner.em_stop && !stopped {
            info!("Reactivating motors ...");

            for wheel in &mut inner.wheels {
                wheel.drive.reset();
                wheel.steer.reset();
            }
            inner.motor_reset = true;

            self.shared.all_motors_on(&inner)?;
            self.shared.request_status_all(&mut inner)?;
        }

        inner.em_stop = stopped;
        Ok(())
    }

    /// 轨迹指令挂接点：回零未完成、回正中或未全部使能时丢弃
    pub fn submit_drive_command(&self, _steer_angles: &[f64], _drive_vels: &[f64]) {
        let inner = self.shared.inner.lock();

        if inner.drive_state != DriveState::Operational {
            return;
        }
        if !all_operational(&inner) {
            return;
        }

        // TODO: dispatch steering position and drive velocity targets per wheel
    }

    /// 尽力停车断电并终止接收线程（吞掉传输错误）
    pub fn shutdown(&mut self) {
        {
            let mut inner = self.shared.inner.lock();

            // 关闭期间发送侧不再等待传输就绪
            self.shared.bus.set_gate(false);

            let _ = self.shared.stop_motion(&inner);
            let _ = self.shared.all_motors_off(&mut inner);
            let _ = self.shared.can_sync();
        }

        self.shared.bus.stop();
        if let Some(thread) = self.rx_thread.take() {
            let _ = thread.join();
        }
    }

    pub fn num_wheels(&self) -> usize {
        self.shared.inner.lock().wheels.len()
    }

    pub fn drive_state(&self) -> DriveState {
        self.shared.inner.lock().drive_state
    }

    pub fn all_motors_operational(&self) -> bool {
        all_operational(&self.shared.inner.lock())
    }

    pub fn motor_state(&self, wheel: usize, axis: Axis) -> Option<MotorState> {
        let inner = self.shared.inner.lock();
        let wheel = inner.wheels.get(wheel)?;
        Some(match axis {
            Axis::Drive => wheel.drive.state,
            Axis::Steer => wheel.steer.state,
        })
    }

    pub fn homing_switch(&self, wheel: usize) -> Option<HomingSwitch> {
        let inner = self.shared.inner.lock();
        Some(inner.wheels.get(wheel)?.steer.homing_switch)
    }
}

impl<T: BusTransport + 'static> Drop for DriveController<T> {
    fn drop(&mut self) {
        if self.rx_thread.is_some() {
            self.shutdown();
        }
    }
}

fn all_operational(inner: &Inner) -> bool {
    inner.wheels.iter().all(|wheel| {
        wheel.drive.state == MotorState::OperationEnabled
            && wheel.steer.state == MotorState::OperationEnabled
    }) && !inner.em_stop
}

fn homing_done(inner: &Inner) -> bool {
    inner
        .wheels
        .iter()
        .all(|wheel| wheel.steer.homing_switch == HomingSwitch::Finished)
}

impl<T: BusTransport> Shared<T> {
    fn query(&self, motor: &Motor, name: CmdName, index: u16) -> Result<(), DriverError> {
        self.bus.transmit(&encode_query(motor.ids.request, name, index))
    }

    fn set_int(
        &self,
        motor: &Motor,
        name: CmdName,
        index: u16,
        value: i32,
    ) -> Result<(), DriverError> {
        self.bus
            .transmit(&encode_set_int(motor.ids.request, name, index, value))
    }

    fn param_write(
        &self,
        motor: &Motor,
        obj_index: u16,
        sub_index: u8,
        value: i32,
    ) -> Result<(), DriverError> {
        self.bus.transmit(&encode_param_write(
            motor.ids.param_write,
            obj_index,
            sub_index,
            value,
        ))
    }

    /// 发送冲刷屏障：后续协议步骤依赖之前的写入已经生效
    fn can_sync(&self) -> Result<(), DriverError> {
        self.bus.flush()
    }

    fn request_status(&self, motor: &mut Motor) -> Result<(), DriverError> {
        self.query(motor, names::SR, 0)?;
        motor.request_sent = Some(Instant::now());
        Ok(())
    }

    fn request_status_all(&self, inner: &mut Inner) -> Result<(), DriverError> {
        for wheel in &mut inner.wheels {
            self.request_status(&mut wheel.drive)?;
            self.request_status(&mut wheel.steer)?;
        }
        self.can_sync()
    }

    fn all_motors_on(&self, inner: &Inner) -> Result<(), DriverError> {
        for wheel in &inner.wheels {
            self.set_int(&wheel.drive, names::MO, 0, 1)?;
            self.set_int(&wheel.steer, names::MO, 0, 1)?;
        }
        self.can_sync()
    }

    fn all_motors_off(&self, inner: &mut Inner) -> Result<(), DriverError> {
        for wheel in &inner.wheels {
            self.set_int(&wheel.drive, names::MO, 0, 0)?;
            self.set_int(&wheel.steer, names::MO, 0, 0)?;
        }
        self.can_sync()?;

        inner.motor_reset = true;
        Ok(())
    }

    /// 速度控制模式：单位模式 2、速度曲线模式 1、加减速上限
    fn set_motion_vel_ctrl(&self, motor: &Motor) -> Result<(), DriverError> {
        self.set_int(motor, names::UM, 0, 2)?;
        self.set_int(motor, names::PM, 0, 1)?;
        self.set_int(motor, names::AC, 0, motor.max_accel_enc_s)?;
        self.set_int(motor, names::DC, 0, motor.max_accel_enc_s)?;
        self.can_sync()
    }

    /// 位置控制模式：单位模式 5、到位窗口与到位时间、加减速上限
    fn set_motion_pos_ctrl(&self, motor: &Motor) -> Result<(), DriverError> {
        self.set_int(motor, names::UM, 0, 5)?;
        self.set_int(motor, names::TR, 1, POS_TARGET_RADIUS)?;
        self.set_int(motor, names::TR, 2, POS_TARGET_TIME_MS)?;
        self.set_int(motor, names::AC, 0, motor.max_accel_enc_s)?;
        self.set_int(motor, names::DC, 0, motor.max_accel_enc_s)?;
        self.can_sync()
    }

    fn set_motor_modulo(&self, motor: &Motor, num_wheel_rev: i32) -> Result<(), DriverError> {
        let ticks_per_rev = motor.ticks_per_wheel_rev();
        self.set_int(motor, names::XM, 1, -num_wheel_rev * ticks_per_rev)?;
        self.set_int(motor, names::XM, 2, num_wheel_rev * ticks_per_rev)?;
        self.can_sync()
    }

    fn reset_pos_counter(&self, motor: &Motor) -> Result<(), DriverError> {
        self.set_int(motor, names::PX, 0, 0)
    }

    fn configure_pdo_mapping(&self, motor: &Motor) -> Result<(), DriverError> {
        // 停止快速广播帧的所有发射
        self.param_write(motor, 0x1A00, 0, 0)?;
        // 映射位置（4 字节）
        self.param_write(motor, 0x1A00, 1, 0x6064_0020)?;
        // 映射速度（4 字节）
        self.param_write(motor, 0x1A00, 2, 0x6069_0020)?;
        // 传输类型：同步触发
        self.param_write(motor, 0x1800, 2, 1)?;
        // 激活两个映射对象
        self.param_write(motor, 0x1A00, 0, 2)?;
        self.can_sync()
    }

    fn begin_motion(&self, inner: &Inner) -> Result<(), DriverError> {
        for wheel in &inner.wheels {
            self.query(&wheel.drive, names::BG, 0)?;
            self.query(&wheel.steer, names::BG, 0)?;
        }
        self.can_sync()
    }

    fn stop_motion(&self, inner: &Inner) -> Result<(), DriverError> {
        for wheel in &inner.wheels {
            self.query(&wheel.drive, names::ST, 0)?;
            self.query(&wheel.steer, names::ST, 0)?;
        }
        self.can_sync()
    }

    fn motor_set_vel(&self, motor: &Motor, rad_s: f64) -> Result<(), DriverError> {
        self.set_int(motor, names::JV, 0, motor.vel_to_ticks(rad_s))
    }

    fn motor_set_pos_abs(&self, motor: &Motor, rad: f64) -> Result<(), DriverError> {
        self.set_int(motor, names::PA, 0, motor.pos_to_ticks(rad))
    }

    /// 启动回零流程：五步配置握手、起转、布防
    fn start_homing(&self, inner: &mut Inner) -> Result<(), DriverError> {
        if !all_operational(inner) {
            return Ok(());
        }

        self.stop_motion(inner)?;

        for wheel in &inner.wheels {
            // 撤防回零事件
            self.set_int(&wheel.steer, names::HM, 1, 0)?;
            self.can_sync()?;

            // 回零事件发生时设置的绝对位置计数值
            self.set_int(&wheel.steer, names::HM, 2, wheel.home_enc_offset)?;
            self.can_sync()?;

            // 选择监听回零事件的数字输入通道
            self.set_int(&wheel.steer, names::HM, 3, wheel.home_dig_in)?;
            self.can_sync()?;

            // 事件发生后的动作：0 = 立即停止
            self.set_int(&wheel.steer, names::HM, 4, 0)?;
            self.can_sync()?;

            // 事件发生后位置计数器行为：0 = 绝对设置为 HM[2]
            self.set_int(&wheel.steer, names::HM, 5, 0)?;
            self.can_sync()?;
        }

        // 行走轴保持静止，转向轴以回零速度旋转
        for wheel in &inner.wheels {
            self.motor_set_vel(&wheel.drive, 0.0)?;
            self.motor_set_vel(&wheel.steer, self.home_vel)?;
        }
        self.can_sync()?;

        self.begin_motion(inner)?;

        // 等待电机进入稳定转动后再布防，避免误触发
        std::thread::sleep(HOMING_SETTLE_DELAY);

        for wheel in &mut inner.wheels {
            self.set_int(&wheel.steer, names::HM, 1, 1)?;
            wheel.steer.homing_switch = HomingSwitch::Unknown;
        }
        self.can_sync()?;

        inner.drive_state = DriveState::Homing;
        Ok(())
    }

    /// 回零完成：停车、电机重新上电、转向轴切位置模式、进入回正
    fn finish_homing(&self, inner: &mut Inner) -> Result<(), DriverError> {
        self.stop_motion(inner)?;
        self.all_motors_off(inner)?;

        for wheel in &inner.wheels {
            self.set_motion_pos_ctrl(&wheel.steer)?;
        }
        self.can_sync()?;

        self.all_motors_on(inner)?;

        inner.drive_state = DriveState::SteeringReset;
        Ok(())
    }

    /// 接收线程帧处理回调（在控制状态锁内运行）
    fn handle_frame(&self, frame: BusFrame) {
        let mut inner = self.inner.lock();

        // 回调内的发送不等待传输就绪，避免自我死锁
        self.bus.set_gate(false);
        if let Err(err) = self.dispatch_frame(&mut inner, &frame) {
            warn!("Dropping CAN frame 0x{:X}: {err}", frame.id);
        }
        self.bus.set_gate(true);
    }

    fn dispatch_frame(&self, inner: &mut Inner, frame: &BusFrame) -> Result<(), DriverError> {
        let now = Instant::now();
        let last_sync = inner.last_sync;
        let mut fresh = 0usize;

        for wheel in &mut inner.wheels {
            if frame.id == wheel.drive.ids.fast_update {
                wheel.drive.apply_fast_update(FastUpdate::parse(frame)?, now);
            }
            if frame.id == wheel.steer.ids.fast_update {
                wheel.steer.apply_fast_update(FastUpdate::parse(frame)?, now);
            }
            if frame.id == wheel.drive.ids.response {
                self.handle_response(&mut wheel.drive, frame, now)?;
            }
            if frame.id == wheel.steer.ids.response {
                self.handle_response(&mut wheel.steer, frame, now)?;
            }

            // 同步周期内有新测量值的电机，重算关节量
            if wheel.drive.updated_after(last_sync) {
                wheel.wheel_pos = wheel.drive.pos_rad();
                wheel.wheel_vel = wheel.drive.vel_rad_s();
                fresh += 1;
            }
            if wheel.steer.updated_after(last_sync) {
                wheel.steer_pos = wheel.steer.pos_rad();
                wheel.steer_vel = wheel.steer.vel_rad_s();
                fresh += 1;
            }
        }

        // 本周期所有电机数据齐备且尚未发布时，发出关节状态记录
        let awaiting_publish = match (last_sync, inner.last_update) {
            (Some(sync), Some(update)) => update < sync,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if fresh >= inner.wheels.len() * 2 && awaiting_publish {
            self.publish_joint_states(inner);
            inner.last_update = Some(Instant::now());
        }

        Ok(())
    }

    fn handle_response(
        &self,
        motor: &mut Motor,
        frame: &BusFrame,
        now: Instant,
    ) -> Result<(), DriverError> {
        match Response::parse(frame)? {
            Response::Status(word) => {
                let effect = motor.apply_status(word, now);
                if effect.request_failure_detail {
                    self.query(motor, names::MF, 0)?;
                }
            }
            Response::Failure(word) => motor.apply_failure_word(word),
            Response::Homing { finished } => {
                motor.homing_switch = if finished {
                    HomingSwitch::Finished
                } else {
                    HomingSwitch::Active
                };
            }
            Response::Other { .. } => {}
        }
        Ok(())
    }

    /// 发出关节状态记录（容量 1 的通道，最新值优先）
    fn publish_joint_states(&self, inner: &Inner) {
        let mut joints = Vec::with_capacity(inner.wheels.len() * 2);
        for wheel in &inner.wheels {
            joints.push(JointState {
                name: wheel.drive.joint_name.clone(),
                position: wheel.wheel_pos,
                velocity: wheel.wheel_vel,
                effort: 0.0,
            });
            joints.push(JointState {
                name: wheel.steer.joint_name.clone(),
                position: wheel.steer_pos,
                velocity: wheel.steer_vel,
                effort: 0.0,
            });
        }

        let mut states = JointStates {
            stamp: SystemTime::now(),
            joints,
        };
        loop {
            match self.joint_tx.try_send(states) {
                Ok(()) => break,
                Err(TrySendError::Full(unsent)) => {
                    // 丢弃未被消费的旧记录
                    let _ = self.joint_rx.try_recv();
                    states = unsent;
                }
                Err(TrySendError::Disconnected(_)) => break,
            }
        }
    }
}
