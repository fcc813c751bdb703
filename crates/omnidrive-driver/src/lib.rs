//! # Omnidrive Driver
//!
//! 全向平台 CAN 总线电机驱动层。
//!
//! 职责划分：
//!
//! - `config`: 启动期一次性加载的驱动配置（轮组、电机、全局参数）
//! - `motor`: 单电机轴状态机、超时检查与单位换算
//! - `controller`: 驱动控制器（初始化 / 控制周期 / 回零编排 / 关机）
//!
//! 并发模型：控制线程按外部节拍调用 `initialize` / `update` / `shutdown`，
//! 接收线程在构造时启动并持续运行；两者通过单把控制状态锁完全串行化。

mod bus;
pub mod config;
pub mod controller;
pub mod error;
pub mod motor;

pub use config::{DriveConfig, MotorConfig, WheelConfig};
pub use controller::{Axis, DriveController, DriveState, JointState, JointStates};
pub use error::{ConfigError, DriverError};
pub use motor::{FaultKind, HomingSwitch, Motor, MotorState, WheelModule};
