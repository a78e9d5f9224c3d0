//! 患者分析汇总

use cdss_core::{Document, EntityType, MedicalEntity, Recommendation, ReviewState, Severity};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// 汇总中返回的最近推荐数量
pub const RECENT_RECOMMENDATIONS: usize = 10;

/// 患者级别的文档、实体与推荐统计
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSummary {
    pub patient_id: Uuid,
    pub document_count: usize,
    pub processed_document_count: usize,
    pub entity_count: usize,
    pub entities_by_type: BTreeMap<String, usize>,
    pub recommendation_count: usize,
    pub recommendations_by_severity: BTreeMap<String, usize>,
    pub unreviewed_count: usize,
    pub recent_recommendations: Vec<Recommendation>,
}

impl PatientSummary {
    /// `recommendations` 需按最新在前排列
    pub fn build(
        patient_id: Uuid,
        documents: &[Document],
        entities: &[MedicalEntity],
        recommendations: Vec<Recommendation>,
    ) -> Self {
        let mut entities_by_type: BTreeMap<String, usize> = EntityType::all()
            .iter()
            .map(|t| (t.as_str().to_string(), 0))
            .collect();
        for entity in entities {
            *entities_by_type.entry(entity.entity_type.as_str().to_string()).or_default() += 1;
        }

        let mut recommendations_by_severity: BTreeMap<String, usize> = Severity::all()
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        for recommendation in &recommendations {
            *recommendations_by_severity
                .entry(recommendation.severity.as_str().to_string())
                .or_default() += 1;
        }

        let unreviewed_count = recommendations
            .iter()
            .filter(|r| r.review_state == ReviewState::Unreviewed)
            .count();
        let recommendation_count = recommendations.len();

        Self {
            patient_id,
            document_count: documents.len(),
            processed_document_count: documents.iter().filter(|d| d.processed).count(),
            entity_count: entities.len(),
            entities_by_type,
            recommendation_count,
            recommendations_by_severity,
            unreviewed_count,
            recent_recommendations: recommendations.into_iter().take(RECENT_RECOMMENDATIONS).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdss_core::RecommendationType;

    #[test]
    fn test_counts_and_recent_window() {
        let patient = Uuid::new_v4();
        let document_id = Uuid::new_v4();
        let entities = vec![
            MedicalEntity::new(document_id, EntityType::Symptom, "fever", "fever", 0.95),
            MedicalEntity::new(document_id, EntityType::Symptom, "cough", "cough", 0.92),
        ];
        let mut recommendations: Vec<Recommendation> = (0..12)
            .map(|i| {
                let severity = if i % 2 == 0 { Severity::Warning } else { Severity::Info };
                Recommendation::new(patient, RecommendationType::Alert, format!("r{}", i), severity, 0.9)
            })
            .collect();
        recommendations[0].review_state = ReviewState::Accepted;

        let summary = PatientSummary::build(patient, &[], &entities, recommendations);

        assert_eq!(summary.entity_count, 2);
        assert_eq!(summary.entities_by_type["Symptom"], 2);
        assert_eq!(summary.entities_by_type["VitalSign"], 0);
        assert_eq!(summary.recommendation_count, 12);
        assert_eq!(summary.recommendations_by_severity["Warning"], 6);
        assert_eq!(summary.recommendations_by_severity["Urgent"], 0);
        assert_eq!(summary.unreviewed_count, 11);
        assert_eq!(summary.recent_recommendations.len(), RECENT_RECOMMENDATIONS);
        assert_eq!(summary.recent_recommendations[0].text, "r0");
    }
}
