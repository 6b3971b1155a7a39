//! Configuration management for the capture tool

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use clap::Parser;
use crate::capture::PcmFormat;
use crate::error::{CaptureError, Result};
use crate::probe::WireInterface;

/// Command line arguments
///
/// Every option that also exists in the TOML file is optional here so that a
/// config file value is only overridden when the flag is given explicitly.
#[derive(Parser, Debug)]
#[command(name = "rtt-mic-capture")]
#[command(about = "Stream microphone PCM from a target over RTT and convert it to WAV")]
#[command(version)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Target device name as known to probe-rs [default: nRF5340_xxAA]
    #[arg(long = "target_cpu", visible_alias = "target-cpu")]
    pub target_cpu: Option<String>,

    /// Number of PCM bytes to collect, must match what the firmware sends [default: 156800]
    #[arg(long)]
    pub samples: Option<usize>,

    /// Probe identifier or serial number substring, or "auto"
    #[arg(long)]
    pub probe: Option<String>,

    /// Wire protocol between probe and target
    #[arg(long, value_enum)]
    pub protocol: Option<WireInterface>,

    /// Probe clock speed in kHz
    #[arg(long)]
    pub speed: Option<u32>,

    /// RTT up channel index carrying PCM data [default: 1]
    #[arg(long)]
    pub channel: Option<usize>,

    /// RTT up channel name carrying PCM data, takes precedence over --channel when found
    #[arg(long)]
    pub channel_name: Option<String>,

    /// Firmware ELF used to locate the _SEGGER_RTT control block
    #[arg(long)]
    pub elf: Option<PathBuf>,

    /// Leading bytes dropped before WAV conversion [default: 16000]
    #[arg(long)]
    pub discard: Option<usize>,

    /// Directory receiving the .raw and .wav artifacts [default: .]
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Print the capture report as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// List attached debug probes and exit
    #[arg(long)]
    pub list_probes: bool,

    /// Generate default configuration file
    #[arg(long)]
    pub generate_config: bool,

    /// Show current configuration and exit
    #[arg(long)]
    pub show_config: bool,
}

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    pub probe: ProbeConfig,
    pub rtt: RttConfig,
    pub capture: CaptureConfig,
    pub audio: AudioConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file or create default
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            let content = std::fs::read_to_string(path)
                .map_err(|e| CaptureError::InvalidConfig(format!("Failed to read config file: {}", e)))?;
            Self::from_toml(&content)
        } else {
            Ok(Config::default())
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| CaptureError::InvalidConfig(format!("Invalid TOML syntax: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Merge command line arguments into configuration
    pub fn merge_args(&mut self, args: &Args) {
        if let Some(target) = &args.target_cpu {
            self.probe.target_cpu = target.clone();
        }
        if let Some(selector) = &args.probe {
            self.probe.selector = selector.clone();
        }
        if let Some(protocol) = args.protocol {
            self.probe.protocol = protocol;
        }
        if args.speed.is_some() {
            self.probe.speed_khz = args.speed;
        }
        if let Some(samples) = args.samples {
            self.capture.samples = samples;
        }
        if let Some(channel) = args.channel {
            self.rtt.channel = channel;
        }
        if args.channel_name.is_some() {
            self.rtt.channel_name = args.channel_name.clone();
        }
        if args.elf.is_some() {
            self.rtt.elf_path = args.elf.clone();
        }
        if let Some(discard) = args.discard {
            self.audio.discard_bytes = discard;
        }
        if let Some(dir) = &args.output_dir {
            self.output.directory = dir.clone();
        }
        if args.json {
            self.output.json_report = true;
        }
        self.logging.level = args.log_level.clone();
        if args.log_file.is_some() {
            self.logging.file = args.log_file.clone();
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.probe.target_cpu.trim().is_empty() {
            return Err(CaptureError::InvalidConfig("probe.target_cpu must not be empty".to_string()));
        }
        if self.probe.speed_khz == Some(0) {
            return Err(CaptureError::InvalidConfig("probe.speed_khz must be > 0".to_string()));
        }
        if self.rtt.chunk_size == 0 {
            return Err(CaptureError::InvalidConfig("rtt.chunk_size must be > 0".to_string()));
        }
        if self.rtt.start_timeout_ms == 0 {
            return Err(CaptureError::InvalidConfig("rtt.start_timeout_ms must be > 0".to_string()));
        }
        PcmFormat::from(&self.audio).validate()
    }

    /// Generate TOML configuration string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| CaptureError::InvalidConfig(format!("Failed to serialize config: {}", e)))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProbeConfig {
    pub target_cpu: String,
    pub selector: String,
    pub protocol: WireInterface,
    pub speed_khz: Option<u32>,
    /// Leave the core halted after the connect-time reset
    pub halt_after_reset: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            target_cpu: "nRF5340_xxAA".to_string(),
            selector: "auto".to_string(),
            protocol: WireInterface::Swd,
            speed_khz: None,
            halt_after_reset: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RttConfig {
    pub channel: usize,
    pub channel_name: Option<String>,
    pub chunk_size: usize,
    pub settle_ms: u64,
    pub start_retry_ms: u64,
    pub start_timeout_ms: u64,
    /// Pause after an empty pull; 0 busy-polls
    pub idle_backoff_us: u64,
    pub elf_path: Option<PathBuf>,
}

impl Default for RttConfig {
    fn default() -> Self {
        Self {
            channel: 1,
            channel_name: None,
            chunk_size: 4096,
            settle_ms: 2000,
            start_retry_ms: 100,
            start_timeout_ms: 10_000,
            idle_backoff_us: 1000,
            elf_path: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CaptureConfig {
    pub samples: usize,
    pub overshoot_tolerance: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            samples: 156_800,
            overshoot_tolerance: 5,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AudioConfig {
    pub discard_bytes: usize,
    pub sample_rate: u32,
    pub sample_width: u16,
    pub channels: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            discard_bytes: 16_000,  // 500 ms at 16 kHz / 16-bit / mono
            sample_rate: 16_000,
            sample_width: 2,
            channels: 1,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub json_report: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            json_report: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capture.samples, 156_800);
        assert_eq!(config.rtt.channel, 1);
        assert_eq!(config.rtt.chunk_size, 4096);
        assert_eq!(config.audio.discard_bytes, 16_000);
    }

    #[test]
    fn test_toml_round_trip_keeps_sections() {
        let toml_str = Config::default().to_toml().unwrap();
        assert!(toml_str.contains("[probe]"));
        assert!(toml_str.contains("[rtt]"));
        assert!(toml_str.contains("[audio]"));
        let parsed = Config::from_toml(&toml_str).unwrap();
        assert_eq!(parsed.probe.target_cpu, "nRF5340_xxAA");
    }

    #[test]
    fn test_invalid_sample_width_rejected() {
        for width in [0, 3, 4] {
            let mut config = Config::default();
            config.audio.sample_width = width;
            assert!(matches!(config.validate(), Err(CaptureError::InvalidConfig(_))), "width {}", width);
        }
    }

    #[test]
    fn test_audio_layout_limited_to_plain_pcm() {
        let mut config = Config::default();
        config.audio.sample_width = 1;
        config.audio.channels = 2;
        assert!(config.validate().is_ok());

        config.audio.channels = 3;
        assert!(matches!(config.validate(), Err(CaptureError::InvalidConfig(_))));
        config.audio.channels = 0;
        assert!(matches!(config.validate(), Err(CaptureError::InvalidConfig(_))));
    }

    #[test]
    fn test_oversized_sample_rate_rejected() {
        let toml_str = Config::default()
            .to_toml()
            .unwrap()
            .replace("sample_rate = 16000", &format!("sample_rate = {}", u32::MAX));
        assert!(toml_str.contains(&u32::MAX.to_string()));
        assert!(matches!(Config::from_toml(&toml_str), Err(CaptureError::InvalidConfig(_))));
    }

    #[test]
    fn test_args_override_only_when_given() {
        let args = Args::parse_from([
            "rtt-mic-capture",
            "--target_cpu", "nRF52840_xxAA",
            "--samples", "32000",
            "--protocol", "jtag",
        ]);
        let mut config = Config::default();
        config.rtt.channel = 3;
        config.merge_args(&args);

        assert_eq!(config.probe.target_cpu, "nRF52840_xxAA");
        assert_eq!(config.capture.samples, 32_000);
        assert_eq!(config.probe.protocol, WireInterface::Jtag);
        assert_eq!(config.rtt.channel, 3);
        assert_eq!(config.audio.discard_bytes, 16_000);
    }

    #[test]
    fn test_dashed_target_alias() {
        let args = Args::parse_from(["rtt-mic-capture", "--target-cpu", "STM32F407VGTx"]);
        assert_eq!(args.target_cpu.as_deref(), Some("STM32F407VGTx"));
    }
}
