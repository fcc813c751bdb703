//! 回零流程端到端测试（mock 传输）
//!
//! 覆盖两轮组配置下的完整回零编排：
//! 全部转向轴上报回零完成后才进入回正阶段；中途任一电机掉线则回零中止。

use crossbeam_channel::Receiver;
use omnidrive_can::mock::{MockBus, MockFactory, MockTransport};
use omnidrive_driver::{
    Axis, DriveConfig, DriveController, DriveState, HomingSwitch, JointStates, MotorConfig,
    MotorState, WheelConfig,
};
use omnidrive_protocol::{BusFrame, OFFSET_FAST_UPDATE, OFFSET_RESPONSE};
use std::sync::Arc;
use std::time::{Duration, Instant};

const STATUS_ENABLED: i32 = 1 << 4;

fn motor_config(can_id: u32, name: &str) -> MotorConfig {
    MotorConfig {
        can_id,
        joint_name: name.to_string(),
        rot_sign: 1,
        gear_ratio: 10.0,
        enc_ticks_per_rev: 4096,
        max_vel_enc_s: 100_000,
        max_accel_enc_s: 1_000_000,
    }
}

fn two_wheel_config() -> DriveConfig {
    DriveConfig {
        can_interface: "mock0".to_string(),
        motor_timeout_s: 30.0,
        home_vel: -1.0,
        update_rate_hz: 50.0,
        wheels: (0..2u32)
            .map(|i| WheelConfig {
                drive: motor_config(1 + i * 2, &format!("wheel{i}_drive")),
                steer: motor_config(2 + i * 2, &format!("wheel{i}_steer")),
                home_angle: 0.0,
                home_dig_in: 5,
                home_enc_offset: 1000,
            })
            .collect(),
    }
}

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn status_frame(base: u32, word: i32) -> BusFrame {
    let v = word.to_le_bytes();
    BusFrame::new(
        base + OFFSET_RESPONSE,
        &[b'S', b'R', 0, 0, v[0], v[1], v[2], v[3]],
    )
}

fn homing_finished_frame(base: u32) -> BusFrame {
    BusFrame::new(base + OFFSET_RESPONSE, &[b'H', b'M', 0, 0, 0, 0, 0, 0])
}

fn fast_update_frame(base: u32, pos: i32, vel: i32) -> BusFrame {
    let mut data = [0u8; 8];
    data[0..4].copy_from_slice(&pos.to_le_bytes());
    data[4..8].copy_from_slice(&vel.to_le_bytes());
    BusFrame::new(base + OFFSET_FAST_UPDATE, &data)
}

/// 启动控制器并推进到所有电机使能、回零可以开始的状态
fn operational_controller() -> (
    DriveController<MockTransport>,
    Receiver<JointStates>,
    Arc<MockBus>,
) {
    let bus = MockBus::new();
    let (controller, joint_rx) =
        DriveController::new(&two_wheel_config(), MockFactory::new(bus.clone())).unwrap();
    wait_until(|| bus.open_count() >= 1);

    controller.set_emergency_stop(false).unwrap();
    controller.initialize().unwrap();

    for base in 1..=4 {
        bus.push_inbound(status_frame(base, STATUS_ENABLED));
    }
    wait_until(|| controller.all_motors_operational());

    (controller, joint_rx, bus)
}

#[test]
fn test_homing_completes_only_after_all_switches_finish() {
    let (controller, _joint_rx, bus) = operational_controller();

    // 第一个周期启动回零
    controller.update().unwrap();
    assert_eq!(controller.drive_state(), DriveState::Homing);

    // 只有一个轮组完成回零：流程继续
    bus.push_inbound(homing_finished_frame(2));
    wait_until(|| controller.homing_switch(0) == Some(HomingSwitch::Finished));
    controller.update().unwrap();
    assert_eq!(controller.drive_state(), DriveState::Homing);

    // 转向轴停在偏离零位的位置（2048 tick ~= 0.314 rad）
    bus.push_inbound(fast_update_frame(2, 2048, 0));
    bus.push_inbound(fast_update_frame(4, 2048, 0));

    // 第二个轮组也完成：进入转向回正
    bus.push_inbound(homing_finished_frame(4));
    wait_until(|| controller.homing_switch(1) == Some(HomingSwitch::Finished));
    bus.take_sent();
    controller.update().unwrap();
    assert_eq!(controller.drive_state(), DriveState::SteeringReset);

    let sent = bus.take_sent();

    // 回零收尾把两个转向轴切到位置控制模式
    for steer_request_id in [0x302, 0x304] {
        assert!(
            sent.iter().any(|f| {
                f.id == steer_request_id
                    && f.data[0..2] == *b"UM"
                    && i32::from_le_bytes(f.data[4..8].try_into().unwrap()) == 5
            }),
            "missing position mode switch for 0x{steer_request_id:X}"
        );
    }

    // 偏离零位的转向轴收到绝对回正指令
    assert!(
        sent.iter()
            .any(|f| f.id == 0x302 && f.data[0..2] == *b"PA")
    );

    // 转向轴回到零位后回正完成
    bus.push_inbound(fast_update_frame(2, 0, 0));
    bus.push_inbound(fast_update_frame(4, 0, 0));
    wait_until(|| {
        controller.update().unwrap();
        controller.drive_state() == DriveState::Operational
    });
}

#[test]
fn test_homing_aborts_when_motor_drops_out() {
    let (controller, _joint_rx, bus) = operational_controller();

    controller.update().unwrap();
    assert_eq!(controller.drive_state(), DriveState::Homing);

    // 一个行走轴掉线
    bus.push_inbound(status_frame(3, 0));
    wait_until(|| controller.motor_state(1, Axis::Drive) == Some(MotorState::OperationDisabled));
    controller.update().unwrap();
    assert_eq!(controller.drive_state(), DriveState::Interrupted);

    // 掉线期间即使回零开关全部上报完成也不会继续
    bus.push_inbound(homing_finished_frame(2));
    bus.push_inbound(homing_finished_frame(4));
    wait_until(|| controller.homing_switch(1) == Some(HomingSwitch::Finished));
    controller.update().unwrap();
    assert_eq!(controller.drive_state(), DriveState::Interrupted);

    // 电机恢复使能后自动重新开始回零
    bus.push_inbound(status_frame(3, STATUS_ENABLED));
    wait_until(|| controller.motor_state(1, Axis::Drive) == Some(MotorState::OperationEnabled));
    controller.update().unwrap();
    assert_eq!(controller.drive_state(), DriveState::Homing);
}

#[test]
fn test_joint_states_published_once_all_motors_fresh() {
    let (controller, joint_rx, bus) = operational_controller();

    // 发出周期触发帧，开始一个同步周期
    controller.update().unwrap();

    // 三个电机就绪时尚未发布
    bus.push_inbound(fast_update_frame(1, 20480, 0));
    bus.push_inbound(fast_update_frame(2, 0, 6518));
    bus.push_inbound(fast_update_frame(3, 0, 0));
    assert!(joint_rx.recv_timeout(Duration::from_millis(100)).is_err());

    // 第四个电机到达后发布一条完整记录
    bus.push_inbound(fast_update_frame(4, 0, 0));
    let states = joint_rx.recv_timeout(Duration::from_secs(2)).unwrap();

    let names: Vec<_> = states.joints.iter().map(|j| j.name.as_str()).collect();
    assert_eq!(
        names,
        ["wheel0_drive", "wheel0_steer", "wheel1_drive", "wheel1_steer"]
    );

    // 20480 tick = 半圈 (gear 10 x 4096 tick/圈)
    assert!((states.joints[0].position - std::f64::consts::PI).abs() < 1e-3);
    // 6518 tick/s ~= 1 rad/s
    assert!((states.joints[1].velocity - 1.0).abs() < 1e-3);
    assert!(states.joints.iter().all(|j| j.effort == 0.0));

    // 同一同步周期内不再重复发布
    bus.push_inbound(fast_update_frame(4, 0, 0));
    assert!(joint_rx.recv_timeout(Duration::from_millis(100)).is_err());
}
