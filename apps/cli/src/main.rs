//! # Omnidrive CLI
//!
//! 全向驱动控制器的命令行入口。
//!
//! ```bash
//! # 校验配置
//! omnidrive-cli check --config drive.toml
//!
//! # 运行控制循环（Ctrl-C 停止）
//! omnidrive-cli run --config drive.toml
//!
//! # 离线求解轮组目标（调试运动学配置）
//! omnidrive-cli solve --config drive.toml --vx 1.0 --vy 0.0 --yaw 0.0
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use omnidrive_can::SocketCanFactory;
use omnidrive_driver::{DriveConfig, DriveController};
use omnidrive_kinematics::{OmniKinematics, WheelGeometry, WheelState, WheelTarget};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 应用配置：驱动配置 + 可选的运动学几何段
#[derive(Debug, Deserialize)]
struct AppConfig {
    drive: DriveConfig,
    /// 轮组安装几何（`solve` 子命令使用，与 `drive.wheels` 顺序一致）
    #[serde(default)]
    geometry: Vec<GeometryConfig>,
}

#[derive(Debug, Deserialize)]
struct GeometryConfig {
    /// 安装极径 [m]
    pos_radius: f64,
    /// 安装极角 [rad]
    pos_angle: f64,
    /// 转向中心偏移 x [m]
    center_x: f64,
    /// 转向中心偏移 y [m]
    center_y: f64,
    /// 零位角 [rad]
    home_angle: f64,
}

/// Omnidrive CLI - 全向驱动控制器命令行工具
#[derive(Parser, Debug)]
#[command(name = "omnidrive-cli")]
#[command(about = "Command-line runner for the omnidirectional drive controller", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 校验配置文件
    Check {
        /// 配置文件路径
        #[arg(short, long)]
        config: PathBuf,
    },

    /// 运行控制循环
    Run {
        /// 配置文件路径
        #[arg(short, long)]
        config: PathBuf,

        /// 覆盖配置中的 CAN 接口名
        #[arg(short, long)]
        interface: Option<String>,
    },

    /// 离线求解一组平台速度指令对应的轮组目标
    Solve {
        /// 配置文件路径
        #[arg(short, long)]
        config: PathBuf,

        /// 平移速度 x [m/s]
        #[arg(long, default_value_t = 0.0)]
        vx: f64,

        /// 平移速度 y [m/s]
        #[arg(long, default_value_t = 0.0)]
        vy: f64,

        /// 旋转速度 [rad/s]
        #[arg(long, default_value_t = 0.0)]
        yaw: f64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("omnidrive_cli=info".parse().unwrap())
                .add_directive("omnidrive_driver=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Check { config } => cmd_check(&config),
        Commands::Run { config, interface } => cmd_run(&config, interface),
        Commands::Solve {
            config,
            vx,
            vy,
            yaw,
        } => cmd_solve(&config, vx, vy, yaw),
    }
}

fn load_config(path: &Path) -> Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: AppConfig = toml::from_str(&text)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}

fn cmd_check(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    config.drive.validate()?;

    if !config.geometry.is_empty() && config.geometry.len() != config.drive.wheels.len() {
        anyhow::bail!(
            "geometry section has {} entries but drive has {} wheels",
            config.geometry.len(),
            config.drive.wheels.len()
        );
    }

    println!("OK: {} wheel modules on {}", config.drive.wheels.len(), config.drive.can_interface);
    for (i, wheel) in config.drive.wheels.iter().enumerate() {
        println!(
            "  wheel {i}: drive={} (id {}), steer={} (id {})",
            wheel.drive.joint_name, wheel.drive.can_id, wheel.steer.joint_name, wheel.steer.can_id
        );
    }
    Ok(())
}

fn cmd_run(path: &Path, interface: Option<String>) -> Result<()> {
    let mut config = load_config(path)?.drive;
    if let Some(interface) = interface {
        config.can_interface = interface;
    }
    config.validate()?;

    let factory = SocketCanFactory::new(&config.can_interface);
    let (mut controller, joint_rx) = DriveController::new(&config, factory)?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::Release);
        })
        .context("Failed to install Ctrl-C handler")?;
    }

    // 关节状态消费线程：仅做日志输出
    let printer = std::thread::spawn(move || {
        loop {
            match joint_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(states) => {
                    for joint in &states.joints {
                        debug!(
                            "{}: pos={:.4} rad, vel={:.4} rad/s",
                            joint.name, joint.position, joint.velocity
                        );
                    }
                }
                Err(err) => {
                    if err.is_disconnected() {
                        break;
                    }
                }
            }
        }
    });

    // 初始化重试直到成功或被 Ctrl-C 终止
    info!("Initializing drive controller on {} ...", config.can_interface);
    while running.load(Ordering::Acquire) {
        match controller.initialize() {
            Ok(()) => break,
            Err(err) => {
                warn!("Initialization failed: {err}");
                std::thread::sleep(Duration::from_secs(1));
            }
        }
    }

    // 无外部急停信号源，直接解除初始急停
    if running.load(Ordering::Acquire) {
        controller.set_emergency_stop(false)?;
    }

    let period = config.update_period();
    while running.load(Ordering::Acquire) {
        let start = Instant::now();
        if let Err(err) = controller.update() {
            warn!("Update cycle failed: {err}");
        }
        if let Some(rest) = period.checked_sub(start.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    info!("Shutting down ...");
    controller.shutdown();
    drop(controller);
    let _ = printer.join();
    Ok(())
}

fn cmd_solve(path: &Path, vx: f64, vy: f64, yaw: f64) -> Result<()> {
    let config = load_config(path)?;
    if config.geometry.is_empty() {
        anyhow::bail!("config has no [[geometry]] section");
    }
    if config.geometry.len() != config.drive.wheels.len() {
        anyhow::bail!(
            "geometry section has {} entries but drive has {} wheels",
            config.geometry.len(),
            config.drive.wheels.len()
        );
    }

    let wheels = config
        .geometry
        .iter()
        .map(|g| WheelGeometry {
            pos_radius: g.pos_radius,
            pos_angle: g.pos_angle,
            center_x: g.center_x,
            center_y: g.center_y,
            home_angle: g.home_angle,
        })
        .collect();
    let mut kinematics = OmniKinematics::new(wheels);

    // 离线求解假设所有轮子静止
    let states = vec![WheelState::default(); config.drive.wheels.len()];
    let targets = kinematics.compute(&states, vx, vy, yaw)?;

    println!("command: vx={vx} m/s, vy={vy} m/s, yaw={yaw} rad/s");
    for (i, target) in targets.iter().enumerate() {
        println!("{}", format_target(i, target));
    }
    Ok(())
}

/// 轮组目标的单行输出：转向角为 rad，驱动速度为平台坐标系下的 m/s
fn format_target(index: usize, target: &WheelTarget) -> String {
    format!(
        "  wheel {index}: steer={:+.4} rad, drive={:+.4} m/s",
        target.steer_angle, target.drive_vel
    )
}
