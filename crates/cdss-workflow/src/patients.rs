//! 患者身份查询
//!
//! 患者主数据由外部系统维护，这里只校验 `patientId` 是否存在

use async_trait::async_trait;
use cdss_core::{CdssError, Result};
use std::collections::HashSet;
use uuid::Uuid;

/// 患者目录接口
#[async_trait]
pub trait PatientDirectory: Send + Sync {
    /// 获取目录名称
    fn name(&self) -> &str;

    /// 患者是否存在
    async fn patient_exists(&self, patient_id: Uuid) -> Result<bool>;

    /// 患者不存在时返回 `NotFound`
    async fn ensure_exists(&self, patient_id: Uuid) -> Result<()> {
        if self.patient_exists(patient_id).await? {
            Ok(())
        } else {
            Err(CdssError::NotFound(format!("患者 {}", patient_id)))
        }
    }
}

/// 接受任意患者ID，用于未接入患者主索引的部署
#[derive(Debug, Default, Clone)]
pub struct OpenPatientDirectory;

#[async_trait]
impl PatientDirectory for OpenPatientDirectory {
    fn name(&self) -> &str {
        "open"
    }

    async fn patient_exists(&self, _patient_id: Uuid) -> Result<bool> {
        Ok(true)
    }
}

/// 固定患者列表
#[derive(Debug, Default, Clone)]
pub struct StaticPatientDirectory {
    patients: HashSet<Uuid>,
}

impl StaticPatientDirectory {
    pub fn new(patients: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            patients: patients.into_iter().collect(),
        }
    }
}

#[async_trait]
impl PatientDirectory for StaticPatientDirectory {
    fn name(&self) -> &str {
        "static"
    }

    async fn patient_exists(&self, patient_id: Uuid) -> Result<bool> {
        Ok(self.patients.contains(&patient_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_directory() {
        let known = Uuid::new_v4();
        let directory = StaticPatientDirectory::new([known]);
        assert!(directory.ensure_exists(known).await.is_ok());
        assert!(matches!(
            directory.ensure_exists(Uuid::new_v4()).await,
            Err(CdssError::NotFound(_))
        ));
        assert!(OpenPatientDirectory.patient_exists(Uuid::new_v4()).await.unwrap());
    }
}
