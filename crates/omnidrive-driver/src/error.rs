//! 驱动层错误类型

use thiserror::Error;

/// 配置校验错误（启动期致命，不重试）
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No wheel modules configured")]
    NoWheels,

    #[error("CAN interface name is empty")]
    MissingInterface,

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 驱动层统一错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Config Error: {0}")]
    Config(#[from] ConfigError),

    #[error("CAN Error: {0}")]
    Can(#[from] omnidrive_can::CanError),

    #[error("Protocol Error: {0}")]
    Protocol(#[from] omnidrive_protocol::ProtocolError),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    /// 控制器正在关闭，挂起的发送被放弃
    #[error("Driver is shutting down")]
    ShuttingDown,
}
