use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 后端连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            base_url: std::env::var("AWB_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            api_key: std::env::var("AWB_API_KEY").ok().filter(|k| !k.is_empty()),
            timeout_secs: 30,
        }
    }
}

/// 执行步骤日志在多轮对话间的保留方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRetention {
    /// 整个会话共用一个不断增长的日志
    #[default]
    Conversation,
    /// 每轮开始时清空
    PerTurn,
}

/// Playground 配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaygroundConfig {
    pub step_retention: StepRetention,
    pub show_steps: bool,
}

/// 本地存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            data_dir: base_dir().join("data"),
        }
    }
}

impl StorageConfig {
    pub fn store_file(&self) -> PathBuf {
        self.data_dir.join("storage.json")
    }
}

/// 统一配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub playground: PlaygroundConfig,
    pub storage: StorageConfig,
}

fn base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".awb")
}

impl Config {
    /// 默认配置文件位置
    pub fn default_path() -> PathBuf {
        base_dir().join("config.toml")
    }

    /// 从文件加载配置，文件不存在时使用默认值
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败：{}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("解析配置文件失败：{}", path.display()))?;

        Ok(config)
    }

    /// 保存配置到文件
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn load_default() -> Result<Self> {
        Self::load(&Self::default_path())
    }

    /// 确保数据目录存在
    pub fn ensure_storage(&self) -> Result<()> {
        fs::create_dir_all(&self.storage.data_dir)
            .with_context(|| format!("创建数据目录失败：{}", self.storage.data_dir.display()))?;
        Ok(())
    }
}
