//! 文档存储管理

use async_trait::async_trait;
use cdss_core::{utils::sanitize_file_name, CdssError, Result};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio::sync::RwLock;
use uuid::Uuid;

/// 文档字节存储接口，按相对路径存取
#[async_trait]
pub trait DocumentStorage: Send + Sync {
    /// 获取存储后端名称
    fn name(&self) -> &str;

    /// 存储文件，返回存储引用
    async fn store(&self, path: &str, data: &[u8]) -> Result<String>;

    /// 读取文件
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// 删除文件
    async fn delete(&self, path: &str) -> Result<()>;
}

/// 文档的存储路径：`{patient_id}/{document_id}_{file_name}`
pub fn document_path(patient_id: Uuid, document_id: Uuid, file_name: &str) -> String {
    format!("{}/{}_{}", patient_id, document_id, sanitize_file_name(file_name))
}

/// 校验存储引用为不含 `..` 的相对路径
fn checked_relative(path: &str) -> Result<PathBuf> {
    let relative = Path::new(path);
    let safe = !path.is_empty()
        && relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));

    if safe {
        Ok(relative.to_path_buf())
    } else {
        Err(CdssError::Validation(format!("非法的存储路径: {}", path)))
    }
}

fn map_io(path: &str, e: std::io::Error) -> CdssError {
    if e.kind() == std::io::ErrorKind::NotFound {
        CdssError::NotFound(format!("存储文件 {}", path))
    } else {
        CdssError::Storage(format!("{}: {}", path, e))
    }
}

/// 本地文件系统存储
#[derive(Debug, Clone)]
pub struct LocalDocumentStorage {
    base_path: PathBuf,
}

impl LocalDocumentStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }
}

#[async_trait]
impl DocumentStorage for LocalDocumentStorage {
    fn name(&self) -> &str {
        "local"
    }

    async fn store(&self, path: &str, data: &[u8]) -> Result<String> {
        let full_path = self.base_path.join(checked_relative(path)?);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| map_io(path, e))?;
        }

        tokio::fs::write(&full_path, data).await.map_err(|e| map_io(path, e))?;
        tracing::debug!("Stored {} bytes at {}", data.len(), full_path.display());
        Ok(path.to_string())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.base_path.join(checked_relative(path)?);
        tokio::fs::read(full_path).await.map_err(|e| map_io(path, e))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.base_path.join(checked_relative(path)?);
        tokio::fs::remove_file(full_path).await.map_err(|e| map_io(path, e))
    }
}

/// 内存存储，用于测试和无盘部署
#[derive(Debug, Default)]
pub struct MemoryDocumentStorage {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryDocumentStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }
}

#[async_trait]
impl DocumentStorage for MemoryDocumentStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn store(&self, path: &str, data: &[u8]) -> Result<String> {
        checked_relative(path)?;
        self.files.write().await.insert(path.to_string(), data.to_vec());
        Ok(path.to_string())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| CdssError::NotFound(format!("存储文件 {}", path)))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.files
            .write()
            .await
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| CdssError::NotFound(format!("存储文件 {}", path)))
    }
}
