//! 模型服务凭据的本地持久化。
//!
//! 凭据以单个 JSON 值保存在键值存储的固定键下，只在设置命令里读写；
//! 需要凭据的组件通过注入的 [`SettingsStore`] 获取，不直接读存储。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

pub const SETTINGS_KEY: &str = "azure_openai_settings";
pub const DEFAULT_API_VERSION: &str = "2025-03-01-preview";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("存储读写失败：{0}")]
    Io(#[from] std::io::Error),
    #[error("存储内容不是合法 JSON：{0}")]
    Json(#[from] serde_json::Error),
    #[error("存储文件根节点必须是对象")]
    NotAnObject,
}

/// 持久化的键值存储，值为 JSON 文本
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// 以单个 JSON 对象文件保存所有键
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        FileStore { path }
    }

    fn read_all(&self) -> Result<Map<String, Value>, StoreError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&content)? {
            Value::Object(map) => Ok(map),
            _ => Err(StoreError::NotAnObject),
        }
    }

    fn write_all(&self, map: &Map<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(map)?)?;
        debug!(path = %self.path.display(), keys = map.len(), "store written");
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_all()?.get(key).and_then(|v| v.as_str().map(str::to_string)))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut map = self.read_all()?;
        map.insert(key.to_string(), Value::String(value.to_string()));
        self.write_all(&map)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut map = self.read_all()?;
        if map.remove(key).is_some() {
            self.write_all(&map)?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// 模型服务凭据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    pub api_key: String,
    pub endpoint: String,
    pub api_version: String,
    /// 模型名 -> 部署名
    pub deployments: BTreeMap<String, String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        ProviderSettings {
            api_key: String::new(),
            endpoint: String::new(),
            api_version: DEFAULT_API_VERSION.to_string(),
            deployments: BTreeMap::new(),
        }
    }
}

impl ProviderSettings {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.endpoint.is_empty()
    }

    /// 展示用，密钥只保留末尾四位
    pub fn masked_api_key(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        if chars.is_empty() {
            return "(未设置)".to_string();
        }
        if chars.len() <= 4 {
            return "*".repeat(chars.len());
        }
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}{}", "*".repeat(chars.len() - 4), tail)
    }
}

pub struct SettingsStore<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> SettingsStore<S> {
    pub fn new(store: S) -> Self {
        SettingsStore { store }
    }

    /// 读取设置，没有保存过时返回默认值
    pub fn load(&self) -> Result<ProviderSettings, StoreError> {
        match self.store.get(SETTINGS_KEY)? {
            Some(blob) => Ok(serde_json::from_str(&blob)?),
            None => Ok(ProviderSettings::default()),
        }
    }

    pub fn save(&self, settings: &ProviderSettings) -> Result<(), StoreError> {
        let blob = serde_json::to_string(settings)?;
        self.store.set(SETTINGS_KEY, &blob)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.remove(SETTINGS_KEY)
    }
}
