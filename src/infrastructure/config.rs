use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

use crate::domain::alarm::Limits;
use crate::domain::parameters::{MM_TO_IN, MPA_TO_PSI, UnitSystem};
use crate::domain::protocol::ANALOG_CHANNELS;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be positive")]
    NotPositive(&'static str),
    #[error("board port must be non-zero")]
    ZeroPort,
    #[error("{0} must be at least 1")]
    ZeroCount(&'static str),
    #[error("A/D channel {channel} out of range 0..{max}", max = ANALOG_CHANNELS)]
    ChannelOutOfRange { channel: usize },
    #[error("A/D channel {channel} has an empty engineering-unit range")]
    EmptyRange { channel: usize },
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MonitorConfig {
    #[serde(default)]
    pub board: BoardSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub machine: MachineSettings,
    #[serde(default)]
    pub part: PartSettings,
    #[serde(default)]
    pub channels: ChannelSettings,
    #[serde(default)]
    pub alarm: AlarmSettings,
    #[serde(default)]
    pub influx: Option<InfluxSettings>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BoardSettings {
    pub host: String,
    pub port: u16,
    pub connect_retries: u32,
    pub connect_retry_ms: u64,
    pub recv_timeout_ms: u64,
    /// Byte-level read timeouts tolerated inside one message.
    pub read_retry_limit: u32,
    pub heartbeat_period_ms: u64,
    pub heartbeat_miss_limit: u32,
    pub echo_verbose: bool,
    pub input_bitmask: u32,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            host: "10.1.10.155".to_string(),
            port: 31000,
            connect_retries: 10,
            connect_retry_ms: 1000,
            recv_timeout_ms: 3000,
            read_retry_limit: 3,
            heartbeat_period_ms: 30000,
            heartbeat_miss_limit: 3,
            echo_verbose: false,
            input_bitmask: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Machine geometry, SI units (mm, mm²).
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MachineSettings {
    pub rod_pitch_mm: f64,
    pub head_area_mm2: f64,
    pub rod_area_mm2: f64,
    pub plunger_area_mm2: f64,
}

impl Default for MachineSettings {
    fn default() -> Self {
        // 20 threads/in rod, 2 in² areas
        let area = 2.0 / (MM_TO_IN * MM_TO_IN);
        Self {
            rod_pitch_mm: 1.0 / 20.0 / MM_TO_IN,
            head_area_mm2: area,
            rod_area_mm2: area,
            plunger_area_mm2: area,
        }
    }
}

/// Part thresholds driving the parameter calculations, SI units.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PartSettings {
    pub total_stroke_mm: f64,
    /// Distance P3 - P2 used for the fill-time search.
    pub plunger_p2_p3_mm: f64,
    pub csfs_min_pos_mm: f64,
    pub csfs_min_vel_mm_s: f64,
    pub intens_target_mpa: f64,
    pub intens_peak_skip: usize,
    pub ss_var_start_pos_user_mm: f64,
    pub ss_var_end_pos_user_mm: f64,
    pub ss_var_start_pos_init_mm: f64,
    pub ss_var_start_pos_bias_mm: f64,
    pub ss_var_start_pos_gain: f64,
    pub ss_var_end_pos_bias_mm: f64,
    /// Cycle time reported for the first shot in history.
    pub cycle_time_default_s: f64,
}

impl Default for PartSettings {
    fn default() -> Self {
        Self {
            total_stroke_mm: 609.6,
            plunger_p2_p3_mm: 50.8,
            csfs_min_pos_mm: 100.0,
            csfs_min_vel_mm_s: 1500.0,
            intens_target_mpa: 20.0,
            intens_peak_skip: 10,
            ss_var_start_pos_user_mm: 50.0,
            ss_var_end_pos_user_mm: 300.0,
            ss_var_start_pos_init_mm: 25.0,
            ss_var_start_pos_bias_mm: 5.0,
            ss_var_start_pos_gain: 0.5,
            ss_var_end_pos_bias_mm: 10.0,
            cycle_time_default_s: 15.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AdMode {
    #[default]
    Unsigned,
    Signed,
}

/// Calibration of one A/D input.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AdChannelConfig {
    pub channel: usize,
    pub mode: AdMode,
    pub volts_min: f64,
    pub volts_max: f64,
    pub eu_min: f64,
    pub eu_max: f64,
    pub resolution: f64,
}

impl Default for AdChannelConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            mode: AdMode::Unsigned,
            volts_min: 0.0,
            volts_max: 5.0,
            eu_min: 0.0,
            eu_max: 5000.0 / MPA_TO_PSI,
            resolution: 65535.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChannelSettings {
    pub press_head: AdChannelConfig,
    pub press_rod: AdChannelConfig,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            press_head: AdChannelConfig::default(),
            press_rod: AdChannelConfig {
                channel: 1,
                ..AdChannelConfig::default()
            },
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AlarmSettings {
    pub unit_system: UnitSystem,
    /// Shots kept in the rolling alarm-state window.
    pub window_shots: usize,
    /// Shots kept in the in-memory history.
    pub history_shots: usize,
}

impl Default for AlarmSettings {
    fn default() -> Self {
        Self {
            unit_system: UnitSystem::Si,
            window_shots: 50,
            history_shots: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InfluxSettings {
    pub host: String,
    pub token: String,
    pub database: String,
    pub retention_policy: String,
}

/// Operator limits keyed by parameter name, expressed in the configured
/// unit system.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LimitsConfig {
    #[serde(default)]
    pub limits: HashMap<String, Limits>,
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.board;
        if b.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if b.connect_retries == 0 {
            return Err(ConfigError::ZeroCount("board.connect_retries"));
        }
        if b.heartbeat_period_ms == 0 {
            return Err(ConfigError::ZeroCount("board.heartbeat_period_ms"));
        }

        let m = &self.machine;
        for (name, value) in [
            ("machine.rod_pitch_mm", m.rod_pitch_mm),
            ("machine.head_area_mm2", m.head_area_mm2),
            ("machine.rod_area_mm2", m.rod_area_mm2),
            ("machine.plunger_area_mm2", m.plunger_area_mm2),
            ("part.total_stroke_mm", self.part.total_stroke_mm),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::NotPositive(name));
            }
        }

        for ch in [&self.channels.press_head, &self.channels.press_rod] {
            if ch.channel >= ANALOG_CHANNELS {
                return Err(ConfigError::ChannelOutOfRange { channel: ch.channel });
            }
            if !(ch.eu_max > ch.eu_min) {
                return Err(ConfigError::EmptyRange { channel: ch.channel });
            }
            if !(ch.resolution > 0.0) {
                return Err(ConfigError::NotPositive("channel resolution"));
            }
        }

        if self.alarm.window_shots == 0 {
            return Err(ConfigError::ZeroCount("alarm.window_shots"));
        }
        if self.alarm.history_shots == 0 {
            return Err(ConfigError::ZeroCount("alarm.history_shots"));
        }

        Ok(())
    }
}

pub fn load_monitor_config() -> anyhow::Result<MonitorConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/monitor").required(false))
        .add_source(config::Environment::with_prefix("FT3MON").separator("__"))
        .build()?;

    let config: MonitorConfig = settings.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

pub fn load_limits_config() -> anyhow::Result<LimitsConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/limits").required(false))
        .build()?;

    Ok(settings.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> MonitorConfig {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let cfg = parse(
            r#"
            [board]
            host = "192.168.130.45"

            [part]
            plunger_p2_p3_mm = 15.0
            "#,
        );
        assert_eq!(cfg.board.host, "192.168.130.45");
        assert_eq!(cfg.board.port, 31000);
        assert_eq!(cfg.board.connect_retries, 10);
        assert_eq!(cfg.part.plunger_p2_p3_mm, 15.0);
        assert_eq!(cfg.part.cycle_time_default_s, 15.0);
        assert_eq!(cfg.channels.press_rod.channel, 1);
        assert!(cfg.influx.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_channel_mode_and_unit_system() {
        let cfg = parse(
            r#"
            [channels.press_head]
            channel = 2
            mode = "signed"
            eu_min = -10.0
            eu_max = 10.0

            [alarm]
            unit_system = "bg"
            "#,
        );
        assert_eq!(cfg.channels.press_head.mode, AdMode::Signed);
        assert_eq!(cfg.channels.press_head.resolution, 65535.0);
        assert_eq!(cfg.alarm.unit_system, UnitSystem::Bg);
    }

    #[test]
    fn test_validation_failures() {
        let mut cfg = MonitorConfig::default();
        assert!(cfg.validate().is_ok());

        cfg.machine.plunger_area_mm2 = 0.0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::NotPositive("machine.plunger_area_mm2"))
        );

        let mut cfg = MonitorConfig::default();
        cfg.channels.press_rod.channel = 8;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ChannelOutOfRange { channel: 8 })
        );

        let mut cfg = MonitorConfig::default();
        cfg.board.port = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroPort));
    }

    #[test]
    fn test_limits_file() {
        let cfg: LimitsConfig = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [limits.fill_time]
                target = 25.0
                warn_low = 22.0
                warn_high = 28.0
                alarm_low = 20.0
                alarm_high = 30.0
                wires = { alarm_high = 4 }
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        let fill = &cfg.limits["fill_time"];
        assert_eq!(fill.alarm_high, 30.0);
        assert_eq!(fill.wires.alarm_high, 4);
        assert_eq!(fill.wires.warn_low, 0);
    }
}
