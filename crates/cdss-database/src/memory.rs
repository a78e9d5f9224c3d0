//! 内存存储

use async_trait::async_trait;
use cdss_core::{CdssError, Document, MedicalEntity, Recommendation, Result, ReviewState};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::ClinicalStore;

#[derive(Debug, Default)]
struct Tables {
    documents: HashMap<Uuid, Document>,
    entities: HashMap<Uuid, Vec<MedicalEntity>>,
    recommendations: HashMap<Uuid, Recommendation>,
    // 推荐的插入顺序
    recommendation_order: Vec<Uuid>,
}

/// 进程内存储，重启后数据丢失
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClinicalStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn insert_document(&self, document: &Document) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.documents.contains_key(&document.id) {
            return Err(CdssError::Conflict(format!("文档 {} 已存在", document.id)));
        }
        tables.documents.insert(document.id, document.clone());
        Ok(())
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        Ok(self.tables.read().await.documents.get(&id).cloned())
    }

    async fn update_document(&self, document: &Document) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.documents.get_mut(&document.id) {
            Some(stored) => {
                *stored = document.clone();
                Ok(())
            }
            None => Err(CdssError::NotFound(format!("文档 {}", document.id))),
        }
    }

    async fn list_patient_documents(&self, patient_id: Uuid) -> Result<Vec<Document>> {
        let tables = self.tables.read().await;
        let mut documents: Vec<Document> = tables
            .documents
            .values()
            .filter(|d| d.patient_id == patient_id)
            .cloned()
            .collect();
        documents.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(documents)
    }

    async fn delete_document(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        tables.entities.remove(&id);
        let existed = tables.documents.remove(&id).is_some();

        // 推荐保留给患者，解除与文档的关联
        for recommendation in tables.recommendations.values_mut() {
            if recommendation.document_id == Some(id) {
                recommendation.document_id = None;
            }
        }
        Ok(existed)
    }

    async fn replace_entities(&self, document_id: Uuid, entities: &[MedicalEntity]) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.documents.contains_key(&document_id) {
            return Err(CdssError::NotFound(format!("文档 {}", document_id)));
        }
        if let Some(foreign) = entities.iter().find(|e| e.document_id != document_id) {
            return Err(CdssError::Validation(format!(
                "实体 {} 不属于文档 {}",
                foreign.id, document_id
            )));
        }
        tables.entities.insert(document_id, entities.to_vec());
        Ok(())
    }

    async fn update_entities(&self, entities: &[MedicalEntity]) -> Result<()> {
        let mut tables = self.tables.write().await;
        for entity in entities {
            let stored = tables
                .entities
                .get_mut(&entity.document_id)
                .and_then(|list| list.iter_mut().find(|e| e.id == entity.id))
                .ok_or_else(|| CdssError::NotFound(format!("实体 {}", entity.id)))?;
            *stored = entity.clone();
        }
        Ok(())
    }

    async fn list_entities(&self, document_id: Uuid) -> Result<Vec<MedicalEntity>> {
        Ok(self
            .tables
            .read()
            .await
            .entities
            .get(&document_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append_recommendations(&self, recommendations: &[Recommendation]) -> Result<()> {
        let mut tables = self.tables.write().await;
        for recommendation in recommendations {
            if tables.recommendations.contains_key(&recommendation.id) {
                return Err(CdssError::Conflict(format!("推荐 {} 已存在", recommendation.id)));
            }
        }
        for recommendation in recommendations {
            tables.recommendation_order.push(recommendation.id);
            tables.recommendations.insert(recommendation.id, recommendation.clone());
        }
        Ok(())
    }

    async fn get_recommendation(&self, id: Uuid) -> Result<Option<Recommendation>> {
        Ok(self.tables.read().await.recommendations.get(&id).cloned())
    }

    async fn save_review(&self, recommendation: &Recommendation) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .recommendations
            .get_mut(&recommendation.id)
            .ok_or_else(|| CdssError::NotFound(format!("推荐 {}", recommendation.id)))?;

        if stored.review_state != ReviewState::Unreviewed {
            return Ok(false);
        }

        stored.review_state = recommendation.review_state;
        stored.reviewed_by = recommendation.reviewed_by.clone();
        stored.reviewed_at = recommendation.reviewed_at;
        stored.review_notes = recommendation.review_notes.clone();
        Ok(true)
    }

    async fn list_patient_recommendations(&self, patient_id: Uuid) -> Result<Vec<Recommendation>> {
        let tables = self.tables.read().await;
        Ok(tables
            .recommendation_order
            .iter()
            .rev()
            .filter_map(|id| tables.recommendations.get(id))
            .filter(|r| r.patient_id == patient_id)
            .cloned()
            .collect())
    }

    async fn find_run_by_fingerprint(
        &self,
        document_id: Uuid,
        fingerprint: &str,
    ) -> Result<Vec<Recommendation>> {
        let tables = self.tables.read().await;
        let matching: Vec<&Recommendation> = tables
            .recommendation_order
            .iter()
            .filter_map(|id| tables.recommendations.get(id))
            .filter(|r| {
                r.document_id == Some(document_id) && r.run_fingerprint.as_deref() == Some(fingerprint)
            })
            .collect();

        // 只返回最近一次运行的批次
        let latest_run = matching.last().and_then(|r| r.run_id);
        Ok(matching
            .into_iter()
            .filter(|r| r.run_id == latest_run)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdss_core::{EntityType, RecommendationType, Severity};

    fn document(patient_id: Uuid) -> Document {
        Document::new(
            patient_id,
            "note.txt".to_string(),
            "p/note.txt".to_string(),
            "clinical_note".to_string(),
            String::new(),
            4,
        )
    }

    fn recommendation(patient_id: Uuid, document_id: Uuid) -> Recommendation {
        let mut rec = Recommendation::new(patient_id, RecommendationType::Alert, "alert", Severity::Warning, 0.9);
        rec.document_id = Some(document_id);
        rec
    }

    #[tokio::test]
    async fn test_document_lifecycle() {
        let store = MemoryStore::new();
        let patient = Uuid::new_v4();
        let mut doc = document(patient);

        store.insert_document(&doc).await.unwrap();
        assert!(store.insert_document(&doc).await.is_err());

        doc.record_text("Fever".to_string());
        store.update_document(&doc).await.unwrap();
        let loaded = store.get_document(doc.id).await.unwrap().unwrap();
        assert!(loaded.processed);
        assert_eq!(loaded.ocr_text.as_deref(), Some("Fever"));

        let missing = document(patient);
        assert!(matches!(store.update_document(&missing).await, Err(CdssError::NotFound(_))));
        assert_eq!(store.list_patient_documents(patient).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_entities_replace_and_cascade() {
        let store = MemoryStore::new();
        let doc = document(Uuid::new_v4());
        store.insert_document(&doc).await.unwrap();

        let first = vec![MedicalEntity::new(doc.id, EntityType::Symptom, "fever", "fever", 0.95)];
        store.replace_entities(doc.id, &first).await.unwrap();

        let mut second = vec![
            MedicalEntity::new(doc.id, EntityType::Symptom, "cough", "cough", 0.92),
            MedicalEntity::new(doc.id, EntityType::Diagnosis, "asthma", "asthma", 0.93),
        ];
        store.replace_entities(doc.id, &second).await.unwrap();
        assert_eq!(store.list_entities(doc.id).await.unwrap().len(), 2);

        second[0].ontology_code = Some("49727002".to_string());
        store.update_entities(&second[..1]).await.unwrap();
        let listed = store.list_entities(doc.id).await.unwrap();
        assert_eq!(listed[0].ontology_code.as_deref(), Some("49727002"));

        assert!(store.delete_document(doc.id).await.unwrap());
        assert!(store.list_entities(doc.id).await.unwrap().is_empty());
        assert!(!store.delete_document(doc.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_review_is_compare_and_set() {
        let store = MemoryStore::new();
        let patient = Uuid::new_v4();
        let rec = recommendation(patient, Uuid::new_v4());
        store.append_recommendations(&[rec.clone()]).await.unwrap();

        let mut accepted = rec.clone();
        accepted.review_state = ReviewState::Accepted;
        accepted.reviewed_by = Some("dr-house".to_string());
        assert!(store.save_review(&accepted).await.unwrap());

        let mut rejected = rec.clone();
        rejected.review_state = ReviewState::Rejected;
        assert!(!store.save_review(&rejected).await.unwrap());

        let stored = store.get_recommendation(rec.id).await.unwrap().unwrap();
        assert_eq!(stored.review_state, ReviewState::Accepted);
        assert_eq!(stored.reviewed_by.as_deref(), Some("dr-house"));
    }

    #[tokio::test]
    async fn test_recommendations_newest_first_and_fingerprint_lookup() {
        let store = MemoryStore::new();
        let patient = Uuid::new_v4();
        let document_id = Uuid::new_v4();

        let mut older = recommendation(patient, document_id);
        older.run_id = Some(Uuid::new_v4());
        older.run_fingerprint = Some("abc".to_string());
        let mut newer = recommendation(patient, document_id);
        newer.run_id = Some(Uuid::new_v4());
        newer.run_fingerprint = Some("abc".to_string());

        store.append_recommendations(&[older.clone()]).await.unwrap();
        store.append_recommendations(&[newer.clone()]).await.unwrap();

        let listed = store.list_patient_recommendations(patient).await.unwrap();
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);

        let run = store.find_run_by_fingerprint(document_id, "abc").await.unwrap();
        assert_eq!(run.len(), 1);
        assert_eq!(run[0].id, newer.id);
        assert!(store.find_run_by_fingerprint(document_id, "zzz").await.unwrap().is_empty());
    }
}
