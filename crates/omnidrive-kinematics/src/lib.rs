//! # Omnidrive Kinematics
//!
//! 逆运动学求解器：将平台速度指令（vx, vy, yaw rate）转换为每个舵轮的
//! 目标转向角和驱动速度。
//!
//! 一个舵轮有两个运动学等价的表示：(angle, speed) 与 (angle+π, -speed)。
//! 朴素的解选择会在判定边界附近抖动，因此求解器记住上一次选择的分支，
//! 只有越过明确的滞回余量才会切换回去。

pub mod angles;

pub use angles::{normalize_angle, shortest_angular_distance};
use std::f64::consts::PI;
use thiserror::Error;

/// 运动学求解错误
#[derive(Error, Debug)]
pub enum KinematicsError {
    /// 传入的轮子数量与配置数量不一致（编程契约违反）
    #[error("Wheel count mismatch: expected {expected}, got {actual}")]
    WheelCountMismatch { expected: usize, actual: usize },
}

/// 静态轮子安装描述（配置时创建，之后只读）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelGeometry {
    /// 轮子在平台上的极坐标半径 [m]
    pub pos_radius: f64,
    /// 轮子在平台上的极坐标角度 [rad]
    pub pos_angle: f64,
    /// 转向中心相对轮子的偏移 x [m]
    pub center_x: f64,
    /// 转向中心相对轮子的偏移 y [m]
    pub center_y: f64,
    /// 停车转向角 [rad]
    pub home_angle: f64,
}

/// 单个轮子的当前测量状态
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WheelState {
    /// 当前转向角 [rad]
    pub steer_angle: f64,
    /// 当前驱动速度 [m/s]（带符号）
    pub drive_vel: f64,
}

/// 单个轮子的目标输出
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelTarget {
    /// 目标转向角 [rad]，归一化到 (-π, π]
    pub steer_angle: f64,
    /// 目标驱动速度 [m/s]（带符号）
    pub drive_vel: f64,
}

/// 单轮滞回记忆（只由求解器更新，跨调用保持）
#[derive(Debug, Clone, Copy, Default)]
struct WheelMemory {
    is_driving: bool,
    is_alternate: bool,
}

/// 逆运动学引擎
///
/// 每个轮子持有滞回状态：`is_driving` / `is_alternate` 表达的是历史选择，
/// 而非瞬时事实。
#[derive(Debug)]
pub struct OmniKinematics {
    /// 判定轮子是否在行驶的速度阈值 [m/s]
    pub zero_vel_threshold: f64,
    /// 转向分支切换的滞回余量 [rad]
    pub steering_hysteresis: f64,
    /// 零指令时是否将转向回到停车角
    pub home_on_stop: bool,

    wheels: Vec<WheelGeometry>,
    memory: Vec<WheelMemory>,
}

impl OmniKinematics {
    pub fn new(wheels: Vec<WheelGeometry>) -> Self {
        let memory = vec![WheelMemory::default(); wheels.len()];
        Self {
            zero_vel_threshold: 0.01,
            steering_hysteresis: 0.1,
            home_on_stop: false,
            wheels,
            memory,
        }
    }

    /// 配置的轮子数量
    pub fn num_wheels(&self) -> usize {
        self.wheels.len()
    }

    /// 指定轮子当前是否处于行驶分类（测试与诊断用）
    pub fn is_driving(&self, index: usize) -> bool {
        self.memory[index].is_driving
    }

    /// 指定轮子当前是否处于反向分支（测试与诊断用）
    pub fn is_alternate(&self, index: usize) -> bool {
        self.memory[index].is_alternate
    }

    /// 根据平台速度指令计算每个轮子的目标转向角和驱动速度
    ///
    /// `states` 必须与配置的轮子一一对应（数量不符立即失败）。
    ///
    /// 全零指令：所有轮子速度为 0；若启用 `home_on_stop`，转向角指向
    /// 各自的停车角。滞回状态保持不变，下一个非零指令从原分支继续。
    pub fn compute(
        &mut self,
        states: &[WheelState],
        move_vel_x: f64,
        move_vel_y: f64,
        move_yaw_rate: f64,
    ) -> Result<Vec<WheelTarget>, KinematicsError> {
        if states.len() != self.wheels.len() {
            return Err(KinematicsError::WheelCountMismatch {
                expected: self.wheels.len(),
                actual: states.len(),
            });
        }

        if move_vel_x == 0.0 && move_vel_y == 0.0 && move_yaw_rate == 0.0 {
            return Ok(self
                .wheels
                .iter()
                .zip(states)
                .map(|(geom, state)| WheelTarget {
                    steer_angle: if self.home_on_stop {
                        geom.home_angle
                    } else {
                        state.steer_angle
                    },
                    drive_vel: 0.0,
                })
                .collect());
        }

        let mut result = Vec::with_capacity(self.wheels.len());

        for ((geom, state), mem) in self.wheels.iter().zip(states).zip(&mut self.memory) {
            // 切向速度相对径向角旋转了 90°（φ=0 时指向 y 方向）
            let tangential = geom.pos_radius * move_yaw_rate;
            let vel_x = move_vel_x - tangential * geom.pos_angle.sin();
            let vel_y = move_vel_y + tangential * geom.pos_angle.cos();

            let mut new_angle = vel_y.atan2(vel_x);
            let mut new_vel = vel_x.hypot(vel_y);

            // 行驶/静止分类本身带滞回：未标记行驶时需要两倍阈值才进入行驶
            let threshold = if mem.is_driving {
                self.zero_vel_threshold
            } else {
                2.0 * self.zero_vel_threshold
            };

            if state.drive_vel.abs() > threshold {
                // 行驶中：选择速度方向连续的解
                if new_vel * state.drive_vel < 0.0 {
                    new_angle = normalize_angle(new_angle + PI);
                    new_vel = -new_vel;
                    mem.is_alternate = true;
                } else {
                    mem.is_alternate = false;
                }
                mem.is_driving = true;
            } else {
                // 静止：选择更接近外侧转向角的解（Schmitt 触发）
                let center_angle = geom.center_y.atan2(geom.center_x);
                let outer_angle = normalize_angle(center_angle - PI / 2.0);

                let margin = if mem.is_alternate {
                    -self.steering_hysteresis
                } else {
                    self.steering_hysteresis
                };

                if shortest_angular_distance(new_angle, outer_angle).abs() > PI / 2.0 + margin {
                    new_angle = normalize_angle(new_angle + PI);
                    new_vel = -new_vel;
                    mem.is_alternate = true;
                } else {
                    mem.is_alternate = false;
                }
                mem.is_driving = false;
            }

            result.push(WheelTarget {
                steer_angle: new_angle,
                drive_vel: new_vel,
            });
        }

        Ok(result)
    }
}
