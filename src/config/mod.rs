/// 统一配置系统
///
/// 提供TOML/JSON配置文件、环境变量覆盖和配置验证
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use thiserror::Error;

pub mod performance;
pub mod render;

pub use performance::{BufferConfig, ThreadingConfig};
pub use render::{ParticleRenderMode, RenderConfig};

use crate::impl_default;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 文件读取错误
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),
    /// 验证错误
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 上采样主配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpsamplingConfig {
    /// 放大倍数：每个名义粗粒子质量对应的细粒子数
    pub upscaling: f32,

    /// 体素尺寸覆盖值（None 表示使用地形单元尺寸）
    pub voxel_size: Option<f32>,

    /// 每步动画相位变化量
    pub ease_step: f32,

    /// 生成位置随机数种子（None 表示按时钟取种子）
    pub seed: Option<u64>,

    /// 缓冲区配置
    pub buffers: BufferConfig,

    /// 多线程配置
    pub threading: ThreadingConfig,

    /// 渲染提示
    pub render: RenderConfig,

    /// 日志配置
    pub logging: LoggingConfig,
}

impl_default!(UpsamplingConfig {
    upscaling: 100.0,
    voxel_size: None,
    ease_step: 0.1,
    seed: None,
    buffers: BufferConfig::default(),
    threading: ThreadingConfig::default(),
    render: RenderConfig::default(),
    logging: LoggingConfig::default(),
});

impl UpsamplingConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置放大倍数
    pub fn with_upscaling(mut self, upscaling: f32) -> Self {
        self.upscaling = upscaling;
        self
    }

    /// 设置体素尺寸覆盖值
    pub fn with_voxel_size(mut self, voxel_size: f32) -> Self {
        self.voxel_size = Some(voxel_size);
        self
    }

    /// 设置动画步长
    pub fn with_ease_step(mut self, ease_step: f32) -> Self {
        self.ease_step = ease_step;
        self
    }

    /// 设置随机数种子
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// 从TOML文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// 从JSON字符串解析配置
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 保存为TOML文件
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 保存为JSON文件
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 从环境变量覆盖配置
    ///
    /// 无法解析的值被忽略，保留原配置。
    pub fn apply_env_overrides(&mut self) {
        if let Some(upscaling) = parse_env("UPSAMPLING_UPSCALING") {
            self.upscaling = upscaling;
        }
        if let Some(voxel_size) = parse_env("UPSAMPLING_VOXEL_SIZE") {
            self.voxel_size = Some(voxel_size);
        }
        if let Some(ease_step) = parse_env("UPSAMPLING_EASE_STEP") {
            self.ease_step = ease_step;
        }
        if let Some(threads) = parse_env("UPSAMPLING_WORKER_THREADS") {
            self.threading.worker_threads = threads;
        }
        if let Some(seed) = parse_env("UPSAMPLING_SEED") {
            self.seed = Some(seed);
        }
    }

    /// 验证配置
    ///
    /// 非法值在这里被拒绝，不会在步进过程中被悄悄截断。
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.upscaling.is_finite() && self.upscaling > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "upscaling must be positive, got {}",
                self.upscaling
            )));
        }
        if let Some(voxel_size) = self.voxel_size {
            if !(voxel_size.is_finite() && voxel_size > 0.0) {
                return Err(ConfigError::ValidationError(format!(
                    "voxel_size must be positive, got {}",
                    voxel_size
                )));
            }
        }
        if !(self.ease_step.is_finite() && self.ease_step > 0.0 && self.ease_step <= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "ease_step must be in (0, 1], got {}",
                self.ease_step
            )));
        }
        self.buffers.validate()?;
        self.threading.validate()?;
        Ok(())
    }

    /// 自动查找并加载配置文件
    ///
    /// 按以下顺序查找：
    /// 1. ./upsampling.toml
    /// 2. ./upsampling.json
    /// 3. <用户配置目录>/granule_upsampler/upsampling.toml
    /// 4. 使用默认配置
    pub fn load_or_default() -> Self {
        if let Ok(config) = Self::from_toml_file("upsampling.toml") {
            tracing::info!(target: "upsampling", "Loaded config from upsampling.toml");
            return config;
        }

        if let Ok(config) = Self::from_json_file("upsampling.json") {
            tracing::info!(target: "upsampling", "Loaded config from upsampling.json");
            return config;
        }

        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("granule_upsampler").join("upsampling.toml");
            if let Ok(config) = Self::from_toml_file(&config_path) {
                tracing::info!(target: "upsampling", "Loaded config from {:?}", config_path);
                return config;
            }
        }

        tracing::info!(target: "upsampling", "Using default configuration");
        Self::default()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|val| val.trim().parse().ok())
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,

    /// 是否输出到控制台
    pub log_to_console: bool,

    /// 是否显示日志目标
    pub show_targets: bool,
}

impl_default!(LoggingConfig {
    level: LogLevel::Info,
    log_to_console: true,
    show_targets: true,
});

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// 跟踪
    Trace,
    /// 调试
    Debug,
    /// 信息
    Info,
    /// 警告
    Warn,
    /// 错误
    Error,
}

impl LogLevel {
    /// 转换为 `EnvFilter` 指令
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = UpsamplingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.upscaling, 100.0);
        assert_eq!(config.ease_step, 0.1);
        assert!(config.voxel_size.is_none());
    }

    #[test]
    fn test_rejects_non_positive_upscaling() {
        for upscaling in [0.0, -2.0, f32::NAN] {
            let config = UpsamplingConfig::default().with_upscaling(upscaling);
            assert!(matches!(
                config.validate(),
                Err(ConfigError::ValidationError(_))
            ));
        }
    }

    #[test]
    fn test_rejects_non_positive_voxel_size() {
        let config = UpsamplingConfig::default().with_voxel_size(0.0);
        assert!(config.validate().is_err());
        let config = UpsamplingConfig::default().with_voxel_size(-0.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_ease_step() {
        assert!(UpsamplingConfig::default().with_ease_step(0.0).validate().is_err());
        assert!(UpsamplingConfig::default().with_ease_step(1.5).validate().is_err());
        assert!(UpsamplingConfig::default().with_ease_step(1.0).validate().is_ok());
    }

    #[test]
    fn test_toml_serialization() {
        let config = UpsamplingConfig::default().with_voxel_size(0.25).with_seed(7);
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = UpsamplingConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed = UpsamplingConfig::from_toml_str("upscaling = 8.0\n").unwrap();
        assert_eq!(parsed.upscaling, 8.0);
        assert_eq!(parsed.ease_step, 0.1);
        assert_eq!(parsed.buffers, BufferConfig::default());
    }

    #[test]
    fn test_json_serialization() {
        let config = UpsamplingConfig::default().with_upscaling(250.0);
        let json_str = serde_json::to_string(&config).unwrap();
        let parsed = UpsamplingConfig::from_json_str(&json_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_parse_error() {
        let err = UpsamplingConfig::from_toml_str("upscaling = \"lots\"").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upsampling.toml");
        let config = UpsamplingConfig::default().with_ease_step(0.25);
        config.save_toml(&path).unwrap();
        assert_eq!(UpsamplingConfig::from_toml_file(&path).unwrap(), config);

        let json_path = dir.path().join("upsampling.json");
        config.save_json(&json_path).unwrap();
        assert_eq!(UpsamplingConfig::from_json_file(&json_path).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        let err = UpsamplingConfig::from_toml_file("/nonexistent/upsampling.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileError(_)));
    }

    #[test]
    fn test_env_overrides() {
        env::set_var("UPSAMPLING_EASE_STEP", "0.05");
        env::set_var("UPSAMPLING_SEED", "not a number");
        let mut config = UpsamplingConfig::default();
        config.apply_env_overrides();
        env::remove_var("UPSAMPLING_EASE_STEP");
        env::remove_var("UPSAMPLING_SEED");

        assert_eq!(config.ease_step, 0.05);
        assert_eq!(config.seed, None);
    }

    #[test]
    fn test_log_level_filter() {
        assert_eq!(LogLevel::Warn.as_filter(), "warn");
        assert_eq!(LoggingConfig::default().level.as_filter(), "info");
    }
}
