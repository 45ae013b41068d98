//! 统一错误处理模块
//!
//! 上采样核心只有两类可返回的错误：配置非法，以及单步输入非法。
//! 容量耗尽不是错误，由下一步之前的扩容自愈（见 `upsampling::upsampler`）。

use crate::config::ConfigError;
use thiserror::Error;

/// 上采样核心错误类型
#[derive(Error, Debug)]
pub enum UpsamplingError {
    /// 参数非法（体素尺寸、放大倍数、材料属性等）
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// 单步输入非法（例如负的时间步长）
    #[error("Invalid step input: {0}")]
    InvalidInput(String),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type UpsamplingResult<T> = Result<T, UpsamplingError>;

/// 检查一个必须为正的有限参数
pub(crate) fn ensure_positive(name: &str, value: f32) -> UpsamplingResult<f32> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(UpsamplingError::InvalidConfig(format!(
            "{name} must be a positive finite number, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_positive_accepts_positive() {
        assert_eq!(ensure_positive("voxel_size", 0.5).unwrap(), 0.5);
    }

    #[test]
    fn test_ensure_positive_rejects_invalid() {
        for value in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            let err = ensure_positive("upscaling", value).unwrap_err();
            assert!(matches!(err, UpsamplingError::InvalidConfig(_)));
            assert!(err.to_string().contains("upscaling"));
        }
    }

    #[test]
    fn test_config_error_conversion() {
        let err: UpsamplingError = ConfigError::ValidationError("bad".to_string()).into();
        assert!(matches!(err, UpsamplingError::Config(ConfigError::ValidationError(_))));
    }
}
