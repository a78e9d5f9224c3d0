//! 临床数据存储接口

use async_trait::async_trait;
use cdss_core::{Document, MedicalEntity, Recommendation, Result};
use uuid::Uuid;

/// 文档、实体与推荐的持久化接口
///
/// 所有写操作都限定在单个文档或单条推荐范围内。
#[async_trait]
pub trait ClinicalStore: Send + Sync {
    /// 获取存储后端名称
    fn name(&self) -> &str;

    async fn insert_document(&self, document: &Document) -> Result<()>;

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>>;

    /// 更新文档，文档不存在时返回 `NotFound`
    async fn update_document(&self, document: &Document) -> Result<()>;

    async fn list_patient_documents(&self, patient_id: Uuid) -> Result<Vec<Document>>;

    /// 删除文档并级联删除其实体，返回文档是否存在
    async fn delete_document(&self, id: Uuid) -> Result<bool>;

    /// 用新的实体批次替换文档已有实体
    async fn replace_entities(&self, document_id: Uuid, entities: &[MedicalEntity]) -> Result<()>;

    /// 原位更新实体（术语标准化结果）
    async fn update_entities(&self, entities: &[MedicalEntity]) -> Result<()>;

    /// 按提取顺序列出文档实体
    async fn list_entities(&self, document_id: Uuid) -> Result<Vec<MedicalEntity>>;

    async fn append_recommendations(&self, recommendations: &[Recommendation]) -> Result<()>;

    async fn get_recommendation(&self, id: Uuid) -> Result<Option<Recommendation>>;

    /// 写入审核结果，仅当存储中的记录仍为 `Unreviewed` 时成功
    async fn save_review(&self, recommendation: &Recommendation) -> Result<bool>;

    /// 列出患者的推荐，最新的在前
    async fn list_patient_recommendations(&self, patient_id: Uuid) -> Result<Vec<Recommendation>>;

    /// 查找某文档指定运行指纹生成的推荐批次
    async fn find_run_by_fingerprint(
        &self,
        document_id: Uuid,
        fingerprint: &str,
    ) -> Result<Vec<Recommendation>>;
}
