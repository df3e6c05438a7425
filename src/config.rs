//! 运行配置
//!
//! 加载顺序（后者覆盖前者）：
//! 1. 内置默认值
//! 2. `config/organizer.toml`（可选）
//! 3. `ORGANIZER__*` 环境变量（`.env` 会先被 dotenvy 载入）

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 配置文件（不含扩展名）
const CONFIG_FILE: &str = "config/organizer";

/// 环境变量前缀
const ENV_PREFIX: &str = "ORGANIZER";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizerConfig {
    /// 数据目录，数据库位于 `{data_dir}/databases/organizer.db`
    pub data_dir: PathBuf,
    /// 连接池最大连接数
    pub pool_max_size: u32,
    /// 连接池最小空闲连接
    pub pool_min_idle: u32,
    /// 获取连接超时（秒）
    pub connection_timeout_secs: u64,
    /// SQLite busy_timeout（毫秒）
    pub busy_timeout_ms: u64,
    /// tracing EnvFilter 指令
    pub log_filter: String,
}

impl Default for OrganizerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            pool_max_size: 8,
            pool_min_idle: 1,
            connection_timeout_secs: 5,
            busy_timeout_ms: 5000,
            log_filter: "info".to_string(),
        }
    }
}

impl OrganizerConfig {
    /// 使用指定数据目录、其余取默认值
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// 从环境变量与配置文件加载
    pub fn from_env_and_file() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut builder = config::Config::builder();
        if Path::new(&format!("{}.toml", CONFIG_FILE)).exists() {
            builder = builder.add_source(config::File::with_name(CONFIG_FILE));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );
        Self::from_config(builder.build()?)
    }

    fn from_config(loaded: config::Config) -> anyhow::Result<Self> {
        let cfg: OrganizerConfig = loaded.try_deserialize()?;
        if cfg.pool_max_size == 0 {
            anyhow::bail!("pool_max_size must be at least 1");
        }
        Ok(cfg)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }
}
