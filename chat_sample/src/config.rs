//! 示例应用的配置：从 `app_settings.json` 加载，文件缺失或损坏时写入默认配置。

use log::{info, warn};
use rust_websocket_session::ClusterConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::AppError;

/// 配置文件名
pub const CONFIG_FILE_NAME: &str = "app_settings.json";

/// 聊天服务端的监听与会话配置
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct WebSocketConfig {
    /// 绑定的主机地址
    pub host: String,
    /// 监听的端口号
    pub port: u16,
    /// 会话活性检查间隔（秒）
    pub liveness_interval_seconds: u64,
    /// 会话空闲超时（秒），0 表示不启用
    pub idle_timeout_seconds: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8088,
            liveness_interval_seconds: 15,
            idle_timeout_seconds: 0,
        }
    }
}

impl WebSocketConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, AppError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AppError::ConfigError(format!("无效的监听地址 {}:{}: {}", self.host, self.port, e)))
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_seconds > 0).then(|| Duration::from_secs(self.idle_timeout_seconds))
    }
}

/// 会话集群配置
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ClusterSettings {
    pub max_connection: usize,
    pub max_lifetime_seconds: u64,
    pub watchdog_interval_seconds: u64,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        let defaults = ClusterConfig::default();
        Self {
            max_connection: defaults.max_connection,
            max_lifetime_seconds: defaults.max_lifetime.as_secs(),
            watchdog_interval_seconds: defaults.watchdog_interval.as_secs(),
        }
    }
}

impl ClusterSettings {
    pub fn to_cluster_config(&self) -> ClusterConfig {
        ClusterConfig {
            max_connection: self.max_connection,
            max_lifetime: Duration::from_secs(self.max_lifetime_seconds),
            watchdog_interval: Duration::from_secs(self.watchdog_interval_seconds),
            ..ClusterConfig::default()
        }
    }
}

/// 聊天客户端配置
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ClientSettings {
    /// 服务端地址
    pub url: String,
    /// 固定重连延迟（秒），不得小于 15
    pub retry_delay_seconds: u64,
    /// 健康检查间隔（秒），0 表示不启用
    pub health_check_interval_seconds: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8088".to_string(),
            retry_delay_seconds: 15,
            health_check_interval_seconds: 30,
        }
    }
}

impl ClientSettings {
    pub fn health_check_interval(&self) -> Option<Duration> {
        (self.health_check_interval_seconds > 0)
            .then(|| Duration::from_secs(self.health_check_interval_seconds))
    }
}

/// 应用的主配置结构体
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub websocket: WebSocketConfig,
    pub cluster: ClusterSettings,
    pub client: ClientSettings,
}

// 全局静态应用配置实例
static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// 从指定路径加载配置；文件不存在或无法解析时使用默认配置并写回该路径。
pub fn load_or_create_config(config_file_path: &Path) -> AppConfig {
    match fs::read_to_string(config_file_path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => {
                info!("[配置模块] 已从配置文件 {:?} 加载应用配置。", config_file_path);
                config
            }
            Err(e) => {
                warn!(
                    "[配置模块] 从 {:?} 反序列化配置失败: {}。将使用默认配置并覆盖该文件。",
                    config_file_path, e
                );
                let default_config = AppConfig::default();
                save_config(&default_config, config_file_path);
                default_config
            }
        },
        Err(e) => {
            info!(
                "[配置模块] 未能读取配置文件 {:?} ({})，将使用默认配置并创建新文件。",
                config_file_path, e
            );
            let default_config = AppConfig::default();
            save_config(&default_config, config_file_path);
            default_config
        }
    }
}

/// 配置文件路径：当前工作目录下的 `app_settings.json`。
fn get_config_file_path() -> PathBuf {
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(CONFIG_FILE_NAME)
}

fn save_config(config: &AppConfig, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("[配置模块] 创建配置目录 {:?} 失败: {}", parent, e);
                return;
            }
        }
    }

    match serde_json::to_string_pretty(config) {
        Ok(content) => {
            if let Err(e) = fs::write(path, content) {
                warn!("[配置模块] 将配置写入文件 {:?} 时失败: {}", path, e);
            } else {
                info!("[配置模块] 已将当前配置保存到 {:?}。", path);
            }
        }
        Err(e) => warn!("[配置模块] 序列化配置失败: {}", e),
    }
}

/// 初始化全局应用配置。重复调用不会覆盖已有配置。
pub fn init_config() {
    let loaded_config = load_or_create_config(&get_config_file_path());
    if APP_CONFIG.set(loaded_config).is_err() {
        warn!("[配置模块] 全局应用配置已被初始化，本次 init_config 调用未覆盖已有配置。");
    }
}

/// 获取全局应用配置；尚未初始化时先从默认位置加载。
pub fn get_config() -> &'static AppConfig {
    APP_CONFIG.get_or_init(|| load_or_create_config(&get_config_file_path()))
}
