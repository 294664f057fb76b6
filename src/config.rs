use crate::error::{AppResult, ConfigError};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// 程序配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 考试服务地址
    pub api_base_url: String,
    /// 认证令牌（Bearer）
    pub auth_token: String,
    /// 服务器时间接口路径
    pub time_endpoint: String,
    /// 要打开的考核结果 ID
    pub result_id: String,
    /// 本地答案缓存目录，为空时只缓存在内存中
    pub cache_dir: Option<String>,
    /// 防抖保存的静默期（毫秒）
    pub debounce_ms: u64,
    /// 定时同步间隔（秒）
    pub periodic_sync_secs: u64,
    /// 服务器时间校准间隔（秒）
    pub clock_sync_secs: u64,
    /// 网络请求超时（秒）
    pub request_timeout_secs: u64,
    /// 无操作提醒阈值（秒）
    pub idle_warning_secs: u64,
    /// 无操作自动交卷阈值（秒）
    pub idle_submit_secs: u64,
    /// 剩余时间提醒点（秒），从大到小
    pub time_warnings: Vec<u64>,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3001".to_string(),
            auth_token: String::new(),
            time_endpoint: "/api/time/server".to_string(),
            result_id: String::new(),
            cache_dir: Some(".exam_cache".to_string()),
            debounce_ms: 3_000,
            periodic_sync_secs: 30,
            clock_sync_secs: 5 * 60,
            request_timeout_secs: 10,
            idle_warning_secs: 5 * 60,
            idle_submit_secs: 10 * 60,
            time_warnings: vec![300, 60],
            verbose_logging: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            api_base_url: std::env::var("EXAM_API_BASE_URL").unwrap_or(default.api_base_url),
            auth_token: std::env::var("EXAM_AUTH_TOKEN").unwrap_or(default.auth_token),
            time_endpoint: std::env::var("EXAM_TIME_ENDPOINT").unwrap_or(default.time_endpoint),
            result_id: std::env::var("EXAM_RESULT_ID").unwrap_or(default.result_id),
            cache_dir: std::env::var("EXAM_CACHE_DIR").ok().or(default.cache_dir),
            debounce_ms: env_parse("EXAM_DEBOUNCE_MS").unwrap_or(default.debounce_ms),
            periodic_sync_secs: env_parse("EXAM_PERIODIC_SYNC_SECS").unwrap_or(default.periodic_sync_secs),
            clock_sync_secs: env_parse("EXAM_CLOCK_SYNC_SECS").unwrap_or(default.clock_sync_secs),
            request_timeout_secs: env_parse("EXAM_REQUEST_TIMEOUT_SECS").unwrap_or(default.request_timeout_secs),
            idle_warning_secs: env_parse("EXAM_IDLE_WARNING_SECS").unwrap_or(default.idle_warning_secs),
            idle_submit_secs: env_parse("EXAM_IDLE_SUBMIT_SECS").unwrap_or(default.idle_submit_secs),
            time_warnings: default.time_warnings,
            verbose_logging: env_parse("VERBOSE_LOGGING").unwrap_or(default.verbose_logging),
        }
    }

    /// 从 TOML 文件加载配置，缺省字段使用默认值
    pub fn from_toml_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::TomlParseFailed {
            path: path.display().to_string(),
            source,
        })?;
        Ok(config)
    }

    /// 校验运行必需的字段
    pub fn require_result_id(&self) -> AppResult<&str> {
        if self.result_id.trim().is_empty() {
            return Err(ConfigError::EnvVarNotFound {
                var_name: "EXAM_RESULT_ID".to_string(),
            }
            .into());
        }
        Ok(&self.result_id)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn periodic_sync(&self) -> Duration {
        Duration::from_secs(self.periodic_sync_secs)
    }

    pub fn clock_sync(&self) -> Duration {
        Duration::from_secs(self.clock_sync_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn idle_warning(&self) -> Duration {
        Duration::from_secs(self.idle_warning_secs)
    }

    pub fn idle_submit(&self) -> Duration {
        Duration::from_secs(self.idle_submit_secs)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
