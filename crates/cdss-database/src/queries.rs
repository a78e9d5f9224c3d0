//! PostgreSQL存储

use async_trait::async_trait;
use cdss_core::{CdssError, Document, MedicalEntity, Recommendation, Result, ReviewState};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::connection::DatabasePool;
use crate::models::*;
use crate::store::ClinicalStore;

const RECOMMENDATION_COLUMNS: &str = "id, patient_id, document_id, encounter_id, recommendation_type, \
     text, severity, confidence, evidence, rules_fired, generated_at, run_id, run_fingerprint, \
     review_state, reviewed_by, reviewed_at, review_notes";

/// 基于PostgreSQL的临床数据存储
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DatabasePool,
}

impl PgStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &PgPool {
        self.pool.pool()
    }

    /// 创建数据库表
    pub async fn create_tables(&self) -> Result<()> {
        let pool = self.pool();

        // 创建文档表
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id UUID PRIMARY KEY,
                patient_id UUID NOT NULL,
                file_name VARCHAR(255) NOT NULL,
                storage_path VARCHAR(512) NOT NULL,
                document_type VARCHAR(64) NOT NULL,
                content_sha256 CHAR(64) NOT NULL,
                size_bytes BIGINT NOT NULL,
                uploaded_at TIMESTAMP WITH TIME ZONE NOT NULL,
                processed BOOLEAN NOT NULL DEFAULT FALSE,
                processed_at TIMESTAMP WITH TIME ZONE,
                ocr_text TEXT
            )
        "#,
        )
        .execute(pool)
        .await?;

        // 创建实体表，随文档级联删除
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS medical_entities (
                seq BIGSERIAL,
                id UUID PRIMARY KEY,
                document_id UUID NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                entity_type VARCHAR(16) NOT NULL,
                text TEXT NOT NULL,
                normalized_text TEXT NOT NULL,
                ontology_code VARCHAR(32),
                ontology_system VARCHAR(16),
                ontology_description TEXT,
                ontology_match VARCHAR(16),
                confidence DOUBLE PRECISION NOT NULL CHECK (confidence BETWEEN 0 AND 1),
                metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
                extracted_at TIMESTAMP WITH TIME ZONE NOT NULL
            )
        "#,
        )
        .execute(pool)
        .await?;

        // 创建推荐表，文档删除后推荐仍归属患者
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS recommendations (
                seq BIGSERIAL,
                id UUID PRIMARY KEY,
                patient_id UUID NOT NULL,
                document_id UUID REFERENCES documents(id) ON DELETE SET NULL,
                encounter_id UUID,
                recommendation_type VARCHAR(16) NOT NULL,
                text TEXT NOT NULL,
                severity VARCHAR(16) NOT NULL,
                confidence DOUBLE PRECISION NOT NULL CHECK (confidence BETWEEN 0 AND 1),
                evidence TEXT[] NOT NULL DEFAULT '{}',
                rules_fired TEXT[] NOT NULL DEFAULT '{}',
                generated_at TIMESTAMP WITH TIME ZONE NOT NULL,
                run_id UUID,
                run_fingerprint CHAR(64),
                review_state VARCHAR(16) NOT NULL DEFAULT 'Unreviewed',
                reviewed_by VARCHAR(128),
                reviewed_at TIMESTAMP WITH TIME ZONE,
                review_notes TEXT
            )
        "#,
        )
        .execute(pool)
        .await?;

        self.create_indexes().await?;

        tracing::info!("Database tables created successfully");
        Ok(())
    }

    /// 创建数据库索引
    async fn create_indexes(&self) -> Result<()> {
        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_documents_patient_id ON documents(patient_id)",
            "CREATE INDEX IF NOT EXISTS idx_entities_document_id ON medical_entities(document_id, seq)",
            "CREATE INDEX IF NOT EXISTS idx_recommendations_patient_id ON recommendations(patient_id, seq)",
            "CREATE INDEX IF NOT EXISTS idx_recommendations_fingerprint ON recommendations(document_id, run_fingerprint)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql).execute(self.pool()).await?;
        }

        tracing::info!("Database indexes created successfully");
        Ok(())
    }

    async fn insert_entity<'c, E>(executor: E, entity: &MedicalEntity) -> Result<()>
    where
        E: sqlx::Executor<'c, Database = sqlx::Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO medical_entities (id, document_id, entity_type, text, normalized_text,
                ontology_code, ontology_system, ontology_description, ontology_match,
                confidence, metadata, extracted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
        )
        .bind(entity.id)
        .bind(entity.document_id)
        .bind(entity.entity_type.as_str())
        .bind(&entity.text)
        .bind(&entity.normalized_text)
        .bind(&entity.ontology_code)
        .bind(entity.ontology_system.map(|s| s.as_str()))
        .bind(&entity.ontology_description)
        .bind(entity.ontology_match.map(|m| m.as_str()))
        .bind(entity.confidence)
        .bind(Json(&entity.metadata))
        .bind(entity.extracted_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    fn convert_recommendations(rows: Vec<DbRecommendation>) -> Result<Vec<Recommendation>> {
        rows.into_iter().map(Recommendation::try_from).collect()
    }
}

#[async_trait]
impl ClinicalStore for PgStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn insert_document(&self, document: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, patient_id, file_name, storage_path, document_type,
                content_sha256, size_bytes, uploaded_at, processed, processed_at, ocr_text)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
        )
        .bind(document.id)
        .bind(document.patient_id)
        .bind(&document.file_name)
        .bind(&document.storage_path)
        .bind(&document.document_type)
        .bind(&document.content_sha256)
        .bind(document.size_bytes)
        .bind(document.uploaded_at)
        .bind(document.processed)
        .bind(document.processed_at)
        .bind(&document.ocr_text)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        let result = sqlx::query_as::<_, DbDocument>("SELECT * FROM documents WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(result.map(Document::from))
    }

    async fn update_document(&self, document: &Document) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE documents
            SET file_name = $2, storage_path = $3, document_type = $4, processed = $5,
                processed_at = $6, ocr_text = $7
            WHERE id = $1
        "#,
        )
        .bind(document.id)
        .bind(&document.file_name)
        .bind(&document.storage_path)
        .bind(&document.document_type)
        .bind(document.processed)
        .bind(document.processed_at)
        .bind(&document.ocr_text)
        .execute(self.pool())
        .await?;

        if updated.rows_affected() == 0 {
            return Err(CdssError::NotFound(format!("文档 {}", document.id)));
        }
        Ok(())
    }

    async fn list_patient_documents(&self, patient_id: Uuid) -> Result<Vec<Document>> {
        let results = sqlx::query_as::<_, DbDocument>(
            "SELECT * FROM documents WHERE patient_id = $1 ORDER BY uploaded_at DESC",
        )
        .bind(patient_id)
        .fetch_all(self.pool())
        .await?;

        Ok(results.into_iter().map(Document::from).collect())
    }

    async fn delete_document(&self, id: Uuid) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(deleted.rows_affected() > 0)
    }

    async fn replace_entities(&self, document_id: Uuid, entities: &[MedicalEntity]) -> Result<()> {
        if let Some(foreign) = entities.iter().find(|e| e.document_id != document_id) {
            return Err(CdssError::Validation(format!(
                "实体 {} 不属于文档 {}",
                foreign.id, document_id
            )));
        }

        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM medical_entities WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for entity in entities {
            Self::insert_entity(&mut *tx, entity).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_entities(&self, entities: &[MedicalEntity]) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        for entity in entities {
            let updated = sqlx::query(
                r#"
                UPDATE medical_entities
                SET normalized_text = $2, ontology_code = $3, ontology_system = $4,
                    ontology_description = $5, ontology_match = $6, confidence = $7, metadata = $8
                WHERE id = $1
            "#,
            )
            .bind(entity.id)
            .bind(&entity.normalized_text)
            .bind(&entity.ontology_code)
            .bind(entity.ontology_system.map(|s| s.as_str()))
            .bind(&entity.ontology_description)
            .bind(entity.ontology_match.map(|m| m.as_str()))
            .bind(entity.confidence)
            .bind(Json(&entity.metadata))
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                return Err(CdssError::NotFound(format!("实体 {}", entity.id)));
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_entities(&self, document_id: Uuid) -> Result<Vec<MedicalEntity>> {
        let results = sqlx::query_as::<_, DbMedicalEntity>(
            r#"
            SELECT id, document_id, entity_type, text, normalized_text, ontology_code,
                ontology_system, ontology_description, ontology_match, confidence, metadata,
                extracted_at
            FROM medical_entities WHERE document_id = $1 ORDER BY seq
        "#,
        )
        .bind(document_id)
        .fetch_all(self.pool())
        .await?;

        results.into_iter().map(MedicalEntity::try_from).collect()
    }

    async fn append_recommendations(&self, recommendations: &[Recommendation]) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        for rec in recommendations {
            sqlx::query(
                r#"
                INSERT INTO recommendations (id, patient_id, document_id, encounter_id,
                    recommendation_type, text, severity, confidence, evidence, rules_fired,
                    generated_at, run_id, run_fingerprint, review_state, reviewed_by,
                    reviewed_at, review_notes)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
            )
            .bind(rec.id)
            .bind(rec.patient_id)
            .bind(rec.document_id)
            .bind(rec.encounter_id)
            .bind(rec.recommendation_type.as_str())
            .bind(&rec.text)
            .bind(rec.severity.as_str())
            .bind(rec.confidence)
            .bind(&rec.evidence)
            .bind(&rec.rules_fired)
            .bind(rec.generated_at)
            .bind(rec.run_id)
            .bind(&rec.run_fingerprint)
            .bind(rec.review_state.as_str())
            .bind(&rec.reviewed_by)
            .bind(rec.reviewed_at)
            .bind(&rec.review_notes)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_recommendation(&self, id: Uuid) -> Result<Option<Recommendation>> {
        let sql = format!("SELECT {} FROM recommendations WHERE id = $1", RECOMMENDATION_COLUMNS);
        let result = sqlx::query_as::<_, DbRecommendation>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        result.map(Recommendation::try_from).transpose()
    }

    async fn save_review(&self, recommendation: &Recommendation) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE recommendations
            SET review_state = $2, reviewed_by = $3, reviewed_at = $4, review_notes = $5
            WHERE id = $1 AND review_state = $6
        "#,
        )
        .bind(recommendation.id)
        .bind(recommendation.review_state.as_str())
        .bind(&recommendation.reviewed_by)
        .bind(recommendation.reviewed_at)
        .bind(&recommendation.review_notes)
        .bind(ReviewState::Unreviewed.as_str())
        .execute(self.pool())
        .await?;

        if updated.rows_affected() == 1 {
            return Ok(true);
        }

        // 区分记录不存在与已审核
        match self.get_recommendation(recommendation.id).await? {
            Some(_) => Ok(false),
            None => Err(CdssError::NotFound(format!("推荐 {}", recommendation.id))),
        }
    }

    async fn list_patient_recommendations(&self, patient_id: Uuid) -> Result<Vec<Recommendation>> {
        let sql = format!(
            "SELECT {} FROM recommendations WHERE patient_id = $1 ORDER BY seq DESC",
            RECOMMENDATION_COLUMNS
        );
        let results = sqlx::query_as::<_, DbRecommendation>(&sql)
            .bind(patient_id)
            .fetch_all(self.pool())
            .await?;

        Self::convert_recommendations(results)
    }

    async fn find_run_by_fingerprint(
        &self,
        document_id: Uuid,
        fingerprint: &str,
    ) -> Result<Vec<Recommendation>> {
        let sql = format!(
            r#"
            SELECT {cols} FROM recommendations
            WHERE run_id = (
                SELECT run_id FROM recommendations
                WHERE document_id = $1 AND run_fingerprint = $2
                ORDER BY seq DESC LIMIT 1
            )
            ORDER BY seq
        "#,
            cols = RECOMMENDATION_COLUMNS
        );
        let results = sqlx::query_as::<_, DbRecommendation>(&sql)
            .bind(document_id)
            .bind(fingerprint)
            .fetch_all(self.pool())
            .await?;

        Self::convert_recommendations(results)
    }
}
