//! 配置管理
//!
//! 按默认值、配置文件、环境变量的顺序合并配置，支持验证和写回文件

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

/// 环境变量前缀，层级之间以双下划线分隔，如 `HMS_DATABASE__URL`
pub const ENV_PREFIX: &str = "HMS";

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    /// 配置数据
    config: Arc<RwLock<HmsConfig>>,
    /// 配置文件路径
    config_path: Option<PathBuf>,
    /// 配置验证器
    validator: ConfigValidator,
}

/// HMS系统完整配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HmsConfig {
    /// 数据库配置
    pub database: DatabaseConfig,
    /// 存储配置
    pub storage: StorageConfig,
    /// 安全配置
    pub security: SecurityConfig,
    /// 仪表盘配置
    pub dashboard: DashboardConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// 数据库URL
    pub url: String,
    /// 最大连接数
    pub max_connections: u32,
    /// 锁等待超时（秒）
    pub busy_timeout_secs: u64,
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// 影像文件根目录
    pub root_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityConfig {
    /// PBKDF2迭代次数
    pub pbkdf2_iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardConfig {
    /// 医生仪表盘展示的最近诊断条数
    pub recent_diagnoses_limit: u32,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// 日志级别或过滤指令
    pub level: String,
    /// 是否输出目标模块
    pub with_target: bool,
    /// 是否使用ANSI颜色
    pub ansi: bool,
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    /// 验证规则
    validation_rules: Vec<ValidationRule>,
}

/// 验证规则
#[derive(Debug)]
struct ValidationRule {
    /// 字段路径
    field_path: &'static str,
    /// 验证函数
    validator: fn(&HmsConfig) -> Result<()>,
}

impl ConfigManager {
    /// 加载配置，未指定文件时只使用默认值和环境变量
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = Self::load_config(config_path)?;
        let validator = ConfigValidator::new();
        validator.validate(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path: config_path.map(Path::to_path_buf),
            validator,
        })
    }

    /// 合并配置来源
    fn load_config(config_path: Option<&Path>) -> Result<HmsConfig> {
        let mut builder = Config::builder().add_source(
            Config::try_from(&HmsConfig::default()).context("Failed to build default configuration")?,
        );

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?;

        let config: HmsConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        match config_path {
            Some(path) => info!("Configuration loaded from: {}", path.display()),
            None => info!("Configuration loaded from defaults and environment"),
        }
        Ok(config)
    }

    /// 获取配置
    pub async fn get_config(&self) -> HmsConfig {
        let config = self.config.read().await;
        config.clone()
    }

    /// 更新配置并写回文件
    pub async fn update_config(&self, new_config: HmsConfig) -> Result<()> {
        self.validator.validate(&new_config)?;

        {
            let mut config = self.config.write().await;
            *config = new_config;
        }

        if let Some(path) = &self.config_path {
            self.save_config(path).await?;
        }

        info!("Configuration updated successfully");
        Ok(())
    }

    /// 保存配置到文件
    pub async fn save_config(&self, path: &Path) -> Result<()> {
        let config = self.config.read().await;
        let config_str = toml::to_string_pretty(&*config).context("Failed to serialize configuration")?;

        tokio::fs::write(path, config_str)
            .await
            .context("Failed to write configuration file")?;

        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// 重新加载配置
    pub async fn reload_config(&self) -> Result<()> {
        let new_config = Self::load_config(self.config_path.as_deref())?;
        self.validator.validate(&new_config)?;

        let mut config = self.config.write().await;
        *config = new_config;
        Ok(())
    }

    /// 按点分路径读取配置值
    pub async fn get_value<T>(&self, path: &str) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let config = self.config.read().await;
        let mut current = serde_json::to_value(&*config).context("Failed to serialize config to JSON")?;

        for part in path.split('.') {
            current = match current {
                serde_json::Value::Object(mut map) => map
                    .remove(part)
                    .ok_or_else(|| anyhow::anyhow!("Configuration path not found: {}", path))?,
                _ => return Err(anyhow::anyhow!("Invalid path at segment: {}", part)),
            };
        }

        serde_json::from_value(current).context("Failed to deserialize configuration value")
    }
}

impl ConfigValidator {
    /// 创建新的配置验证器
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "database.url",
                validator: |config| {
                    if config.database.url.trim().is_empty() {
                        Err(anyhow::anyhow!("Database URL cannot be empty"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "database.max_connections",
                validator: |config| {
                    if config.database.max_connections == 0 {
                        Err(anyhow::anyhow!("Database max connections cannot be 0"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "storage.root_path",
                validator: |config| {
                    if config.storage.root_path.trim().is_empty() {
                        Err(anyhow::anyhow!("Storage root path cannot be empty"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "security.pbkdf2_iterations",
                validator: |config| {
                    if config.security.pbkdf2_iterations == 0 {
                        Err(anyhow::anyhow!("PBKDF2 iterations must be at least 1"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "dashboard.recent_diagnoses_limit",
                validator: |config| {
                    if config.dashboard.recent_diagnoses_limit == 0 {
                        Err(anyhow::anyhow!("Recent diagnoses limit cannot be 0"))
                    } else {
                        Ok(())
                    }
                },
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置
    pub fn validate(&self, config: &HmsConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, e);
                return Err(anyhow::anyhow!("Invalid {}: {}", rule.field_path, e));
            }
        }
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://hms.db".to_string(),
            max_connections: 8,
            busy_timeout_secs: 5,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_path: "./data".to_string(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: 210_000,
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            recent_diagnoses_limit: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: false,
            ansi: true,
        }
    }
}
