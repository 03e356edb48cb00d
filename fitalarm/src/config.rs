//! Daemon configuration from `FITALARM_*` environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use crate::alarm::{AlarmConfig, parse_time_of_day};
use crate::endpoint::{DEFAULT_SENSOR_TIMEOUT, EndpointSettings};
use crate::sensor::DEFAULT_WINDOW_SIZE;
use crate::transport::tcp::TcpRole;

pub const ENV_ROLE: &str = "FITALARM_ROLE";
pub const ENV_LISTEN: &str = "FITALARM_LISTEN";
pub const ENV_CONNECT: &str = "FITALARM_CONNECT";
pub const ENV_API_ADDR: &str = "FITALARM_API_ADDR";
pub const ENV_WINDOW_SIZE: &str = "FITALARM_WINDOW_SIZE";
pub const ENV_BPM_THRESHOLD: &str = "FITALARM_BPM_THRESHOLD";
pub const ENV_SCHEDULED_TIME: &str = "FITALARM_SCHEDULED_TIME";
pub const ENV_SENSOR_TIMEOUT_SECS: &str = "FITALARM_SENSOR_TIMEOUT_SECS";

pub const DEFAULT_API_ADDR: &str = "127.0.0.1:7790";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Role {
    /// Carries the heart rate sensor.
    #[default]
    Wearable,
    /// Configures the wearable and mirrors its alarm.
    Companion,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("exactly one of FITALARM_LISTEN or FITALARM_CONNECT must be set")]
    PeerAddress,

    #[error("FITALARM_SCHEDULED_TIME requires FITALARM_BPM_THRESHOLD")]
    ScheduleWithoutThreshold,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub role: Role,
    pub peer: TcpRole,
    pub api_addr: SocketAddr,
    pub window_size: usize,
    pub sensor_timeout: Duration,
    /// Arm on startup with this configuration.
    pub initial_alarm: Option<AlarmConfig>,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let role = parse_var(ENV_ROLE, get(ENV_ROLE), |v| v.trim().parse::<Role>())?
            .unwrap_or_default();

        let listen = parse_var(ENV_LISTEN, get(ENV_LISTEN), |v| v.trim().parse::<SocketAddr>())?;
        let connect = parse_var(ENV_CONNECT, get(ENV_CONNECT), |v| {
            v.trim().parse::<SocketAddr>()
        })?;
        let peer = match (listen, connect) {
            (Some(addr), None) => TcpRole::Listen(addr),
            (None, Some(addr)) => TcpRole::Connect(addr),
            _ => return Err(ConfigError::PeerAddress),
        };

        let api_addr = parse_var(ENV_API_ADDR, get(ENV_API_ADDR), |v| {
            v.trim().parse::<SocketAddr>()
        })?
        .map_or_else(default_api_addr, Ok)?;

        let window_size = parse_var(ENV_WINDOW_SIZE, get(ENV_WINDOW_SIZE), parse_positive)?
            .map_or(DEFAULT_WINDOW_SIZE, |n| n as usize);

        let sensor_timeout = parse_var(
            ENV_SENSOR_TIMEOUT_SECS,
            get(ENV_SENSOR_TIMEOUT_SECS),
            parse_positive,
        )?
        .map_or(DEFAULT_SENSOR_TIMEOUT, Duration::from_secs);

        let threshold = parse_var(ENV_BPM_THRESHOLD, get(ENV_BPM_THRESHOLD), |v| {
            parse_positive(v).and_then(|n| u32::try_from(n).map_err(|e| e.to_string()))
        })?;
        let scheduled = parse_var(ENV_SCHEDULED_TIME, get(ENV_SCHEDULED_TIME), |v| {
            parse_time_of_day(v)
        })?;

        let initial_alarm = match (threshold, scheduled) {
            (Some(bpm), Some(at)) => Some(AlarmConfig::new(bpm).with_scheduled_time(at)),
            (Some(bpm), None) => Some(AlarmConfig::new(bpm)),
            (None, Some(_)) => return Err(ConfigError::ScheduleWithoutThreshold),
            (None, None) => None,
        };

        Ok(Self {
            role,
            peer,
            api_addr,
            window_size,
            sensor_timeout,
            initial_alarm,
        })
    }

    pub fn endpoint_settings(&self) -> EndpointSettings {
        let mut settings = EndpointSettings::new(self.role.to_string());
        settings.window_size = self.window_size;
        settings.sensor_timeout = self.sensor_timeout;
        settings.share_threshold = self.role == Role::Companion;
        settings
    }
}

fn default_api_addr() -> Result<SocketAddr, ConfigError> {
    DEFAULT_API_ADDR
        .parse()
        .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
            var: ENV_API_ADDR,
            value: DEFAULT_API_ADDR.into(),
            reason: e.to_string(),
        })
}

fn parse_positive(value: &str) -> Result<u64, String> {
    match value.trim().parse::<u64>() {
        Ok(0) => Err("must be greater than zero".into()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

fn parse_var<T, E: std::fmt::Display>(
    var: &'static str,
    value: Option<String>,
    parse: impl FnOnce(&str) -> Result<T, E>,
) -> Result<Option<T>, ConfigError> {
    let Some(value) = value else {
        return Ok(None);
    };
    parse(&value).map(Some).map_err(|e| ConfigError::Invalid {
        var,
        reason: e.to_string(),
        value,
    })
}
