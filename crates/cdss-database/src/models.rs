//! 数据库模型

use cdss_core::models::*;
use cdss_core::{CdssError, Result};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

// 数据库表模型 - 使用FromRow trait用于SQL查询，枚举存储为字符串

/// 数据库文档表
#[derive(Debug, FromRow)]
pub struct DbDocument {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub file_name: String,
    pub storage_path: String,
    pub document_type: String,
    pub content_sha256: String,
    pub size_bytes: i64,
    pub uploaded_at: DateTime<Utc>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub ocr_text: Option<String>,
}

impl From<DbDocument> for Document {
    fn from(db: DbDocument) -> Self {
        Document {
            id: db.id,
            patient_id: db.patient_id,
            file_name: db.file_name,
            storage_path: db.storage_path,
            document_type: db.document_type,
            content_sha256: db.content_sha256,
            size_bytes: db.size_bytes,
            uploaded_at: db.uploaded_at,
            processed: db.processed,
            processed_at: db.processed_at,
            ocr_text: db.ocr_text,
        }
    }
}

/// 数据库实体表
#[derive(Debug, FromRow)]
pub struct DbMedicalEntity {
    pub id: Uuid,
    pub document_id: Uuid,
    pub entity_type: String,
    pub text: String,
    pub normalized_text: String,
    pub ontology_code: Option<String>,
    pub ontology_system: Option<String>,
    pub ontology_description: Option<String>,
    pub ontology_match: Option<String>,
    pub confidence: f64,
    pub metadata: Json<BTreeMap<String, String>>,
    pub extracted_at: DateTime<Utc>,
}

fn stored<T: std::str::FromStr<Err = CdssError>>(column: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|e| CdssError::Database(format!("列 {} 中的值无效: {}", column, e)))
}

impl TryFrom<DbMedicalEntity> for MedicalEntity {
    type Error = CdssError;

    fn try_from(db: DbMedicalEntity) -> Result<Self> {
        Ok(MedicalEntity {
            id: db.id,
            document_id: db.document_id,
            entity_type: stored("entity_type", &db.entity_type)?,
            text: db.text,
            normalized_text: db.normalized_text,
            ontology_code: db.ontology_code,
            ontology_system: db
                .ontology_system
                .as_deref()
                .map(|s| stored("ontology_system", s))
                .transpose()?,
            ontology_description: db.ontology_description,
            ontology_match: db
                .ontology_match
                .as_deref()
                .map(|s| stored("ontology_match", s))
                .transpose()?,
            confidence: db.confidence,
            metadata: db.metadata.0,
            extracted_at: db.extracted_at,
        })
    }
}

/// 数据库推荐表
#[derive(Debug, FromRow)]
pub struct DbRecommendation {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub document_id: Option<Uuid>,
    pub encounter_id: Option<Uuid>,
    pub recommendation_type: String,
    pub text: String,
    pub severity: String,
    pub confidence: f64,
    pub evidence: Vec<String>,
    pub rules_fired: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub run_id: Option<Uuid>,
    pub run_fingerprint: Option<String>,
    pub review_state: String,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
}

impl TryFrom<DbRecommendation> for Recommendation {
    type Error = CdssError;

    fn try_from(db: DbRecommendation) -> Result<Self> {
        Ok(Recommendation {
            id: db.id,
            patient_id: db.patient_id,
            document_id: db.document_id,
            encounter_id: db.encounter_id,
            recommendation_type: stored("recommendation_type", &db.recommendation_type)?,
            text: db.text,
            severity: stored("severity", &db.severity)?,
            confidence: db.confidence,
            evidence: db.evidence,
            rules_fired: db.rules_fired,
            generated_at: db.generated_at,
            run_id: db.run_id,
            run_fingerprint: db.run_fingerprint,
            review_state: stored("review_state", &db.review_state)?,
            reviewed_by: db.reviewed_by,
            reviewed_at: db.reviewed_at,
            review_notes: db.review_notes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_row_conversion() {
        let row = DbMedicalEntity {
            id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            entity_type: "VitalSign".to_string(),
            text: "BP 150/95 mmHg".to_string(),
            normalized_text: "bp 150/95 mmhg".to_string(),
            ontology_code: None,
            ontology_system: Some("SNOMED CT".to_string()),
            ontology_description: None,
            ontology_match: Some("Fallback".to_string()),
            confidence: 0.95,
            metadata: Json(BTreeMap::from([("type".to_string(), "blood_pressure".to_string())])),
            extracted_at: Utc::now(),
        };

        let entity = MedicalEntity::try_from(row).unwrap();
        assert_eq!(entity.entity_type, EntityType::VitalSign);
        assert_eq!(entity.ontology_system, Some(CodingSystem::SnomedCt));
        assert_eq!(entity.ontology_match, Some(MatchKind::Fallback));
        assert_eq!(entity.metadata_value("type"), Some("blood_pressure"));
    }

    #[test]
    fn test_unknown_enum_value_is_database_error() {
        let row = DbRecommendation {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            document_id: None,
            encounter_id: None,
            recommendation_type: "Alert".to_string(),
            text: "x".to_string(),
            severity: "Catastrophic".to_string(),
            confidence: 0.9,
            evidence: vec![],
            rules_fired: vec![],
            generated_at: Utc::now(),
            run_id: None,
            run_fingerprint: None,
            review_state: "Unreviewed".to_string(),
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
        };

        assert!(matches!(Recommendation::try_from(row), Err(CdssError::Database(_))));
    }
}
