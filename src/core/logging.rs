//! 日志初始化

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// 初始化日志系统
///
/// 安装 `tracing_subscriber::fmt` 订阅者。`RUST_LOG` 环境变量优先，
/// 未设置时使用配置中的日志级别。重复调用是安全的。
///
/// # 返回
///
/// 如果本次调用安装了订阅者返回`true`，已存在订阅者或控制台输出被关闭时返回`false`。
pub fn init_logging(config: &LoggingConfig) -> bool {
    if !config.log_to_console {
        return false;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_filter()));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.show_targets)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(target: "upsampling", "Logging initialized at level {:?}", config.level);
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_console_installs_nothing() {
        let config = LoggingConfig {
            log_to_console: false,
            ..Default::default()
        };
        assert!(!init_logging(&config));
    }

    #[test]
    fn test_repeated_init_is_harmless() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        assert!(!init_logging(&config));
    }
}
