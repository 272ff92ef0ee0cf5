use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const APP_MAJOR_VERSION: u8 = 0;
pub const APP_MINOR_VERSION: u8 = 1;
pub const APP_REVISION: u8 = 0;
pub const APP_MISSION_REV: u8 = 0;

pub const DEFAULT_CMD_MID: u16 = 0x18FA;
pub const DEFAULT_REQ_HK_MID: u16 = 0x18FB;
pub const DEFAULT_HK_TLM_MID: u16 = 0x08FA;
pub const DEFAULT_DEVICE_TLM_MID: u16 = 0x08FB;

pub const DEFAULT_PIPE_DEPTH: u16 = 32;
pub const DEFAULT_PIPE_NAME: &str = "EPS_CMD_PIPE";

const DEFAULT_DEVICE_PORT: &str = "/dev/usart_16";
const DEFAULT_DEVICE_HANDLE: i32 = 16;
const DEFAULT_BAUD_RATE: u32 = 115_200;
const DEFAULT_READ_POLL_BUDGET: u32 = 1_000;
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8090";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Bus message identifiers this application consumes and produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageIds {
    pub cmd: u16,
    pub req_hk: u16,
    pub hk_tlm: u16,
    pub device_tlm: u16,
}

impl Default for MessageIds {
    fn default() -> Self {
        Self {
            cmd: DEFAULT_CMD_MID,
            req_hk: DEFAULT_REQ_HK_MID,
            hk_tlm: DEFAULT_HK_TLM_MID,
            device_tlm: DEFAULT_DEVICE_TLM_MID,
        }
    }
}

/// Serial port settings for the power board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub port: String,
    pub handle: i32,
    pub baud_rate: u32,
    /// Number of empty polls tolerated while waiting on a reply byte.
    pub read_poll_budget: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_DEVICE_PORT.to_string(),
            handle: DEFAULT_DEVICE_HANDLE,
            baud_rate: DEFAULT_BAUD_RATE,
            read_poll_budget: DEFAULT_READ_POLL_BUDGET,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub message_ids: MessageIds,
    pub pipe_depth: u16,
    pub pipe_name: String,
    /// `None` pends forever on the command pipe.
    pub receive_timeout_ms: Option<u64>,
    pub device: DeviceConfig,
    pub listen_addr: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            message_ids: MessageIds::default(),
            pipe_depth: DEFAULT_PIPE_DEPTH,
            pipe_name: DEFAULT_PIPE_NAME.to_string(),
            receive_timeout_ms: None,
            device: DeviceConfig::default(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ids = &self.message_ids;
        if ids.cmd == ids.req_hk {
            return Err(ConfigError::Invalid("command and telemetry request ids must differ"));
        }
        if ids.hk_tlm == ids.device_tlm {
            return Err(ConfigError::Invalid("housekeeping and device telemetry ids must differ"));
        }
        if self.pipe_depth == 0 || usize::from(self.pipe_depth) > crate::bus::MAX_PIPE_DEPTH {
            return Err(ConfigError::Invalid("pipe depth out of range"));
        }
        if self.device.read_poll_budget == 0 {
            return Err(ConfigError::Invalid("device read poll budget must be non-zero"));
        }
        Ok(())
    }

    pub fn version_string() -> String {
        format!(
            "{}.{}.{}.{}",
            APP_MAJOR_VERSION, APP_MINOR_VERSION, APP_REVISION, APP_MISSION_REV
        )
    }
}
