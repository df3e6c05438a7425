//! 日志初始化
//!
//! 使用 tracing-subscriber 的 fmt 输出；`RUST_LOG` 存在时优先于配置中的过滤指令。

use tracing_subscriber::EnvFilter;

/// 安装全局 subscriber
///
/// 已有 subscriber 时不做任何事，返回 false。
pub fn init_logging(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        let _ = init_logging("info");
        assert!(!init_logging("debug"));
    }
}
