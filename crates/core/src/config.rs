use serde::{Deserialize, Serialize};

/// 全局应用配置
///
/// 任何缺省的段落或字段都落回内置默认值，允许部分配置文件。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub api_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub data_dir: String,
}

/// 调度与租约相关参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    // Worker 心跳上报的建议间隔 (秒)
    pub heartbeat_interval_secs: u64,
    // 租约超时阈值 (秒)，约定为心跳间隔的 3 倍
    pub lease_timeout_secs: u64,
    // 租约监视器扫描周期 (秒)
    pub sweep_interval_secs: u64,
    // 单个信号允许被重新排队的最大次数，超出后落入终态 failed
    pub max_retries: i32,
    // 未携带 account_id 的信号成交时记账的默认账户路由
    pub default_account: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            api_token: "YOUR_SUPER_SECRET_TOKEN".to_string(), // Default for dev, should be overwritten by config
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 20,
            lease_timeout_secs: 60,
            sweep_interval_secs: 10,
            max_retries: 3,
            default_account: "primary".to_string(),
        }
    }
}
