//! 医学实体识别
//!
//! 五类实体各自使用独立的匹配策略：症状与诊断走词典子串匹配，药物、检验值、
//! 生命体征走正则匹配。识别过程是纯函数，不做I/O，也不修改共享状态。

use cdss_core::{utils::normalize_term, CdssError, EntityType, MedicalEntity, Result};
use regex::Regex;
use std::collections::HashSet;
use uuid::Uuid;

use crate::knowledge::{KnowledgeBase, TermEntry};

/// 药物实体置信度
pub const MEDICATION_CONFIDENCE: f64 = 0.90;
/// 检验值实体置信度
pub const LAB_VALUE_CONFIDENCE: f64 = 0.95;
/// 生命体征实体置信度
pub const VITAL_SIGN_CONFIDENCE: f64 = 0.95;

/// 生命体征类型标识，写入实体元数据的 `type` 字段
pub const VITAL_BLOOD_PRESSURE: &str = "blood_pressure";
pub const VITAL_HEART_RATE: &str = "heart_rate";
pub const VITAL_TEMPERATURE: &str = "temperature";

const MEDICATION_PATTERN: &str = r"(?i)\b([a-z][a-z-]*)\s+(\d+(?:\.\d+)?)\s*mg\b";
const BLOOD_PRESSURE_PATTERN: &str =
    r"(?i)\b(?:blood\s+pressure|bp)\s*:?\s*(\d{2,3})\s*/\s*(\d{2,3})\s*mm\s*hg";
const HEART_RATE_PATTERN: &str = r"(?i)\b(?:heart\s+rate|pulse|hr)\s*:?\s*(\d{2,3})\s*bpm\b";
const TEMPERATURE_PATTERN: &str =
    r"(?i)\b(?:temperature|temp)\s*:?\s*(\d{2}(?:\.\d+)?)\s*°?\s*c\b";

struct CompiledLab {
    test: String,
    unit: String,
    pattern: Regex,
}

/// 医学实体识别器
pub struct EntityExtractor {
    symptoms: Vec<TermEntry>,
    diagnoses: Vec<TermEntry>,
    medications: HashSet<String>,
    medication_pattern: Regex,
    lab_patterns: Vec<CompiledLab>,
    blood_pressure: Regex,
    heart_rate: Regex,
    temperature: Regex,
}

impl std::fmt::Debug for EntityExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityExtractor")
            .field("symptoms", &self.symptoms.len())
            .field("diagnoses", &self.diagnoses.len())
            .field("medications", &self.medications.len())
            .field("lab_patterns", &self.lab_patterns.len())
            .finish()
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| CdssError::Config(format!("正则表达式无效 {}: {}", pattern, e)))
}

impl EntityExtractor {
    /// 根据知识库创建识别器，所有正则在此一次性编译
    pub fn new(knowledge: &KnowledgeBase) -> Result<Self> {
        let lab_patterns = knowledge
            .lab_tests
            .iter()
            .map(|lab| {
                let pattern = format!(
                    r"(?i)\b(?:{})\s*:?\s*(\d+(?:\.\d+)?)\s*{}",
                    lab.label,
                    regex::escape(&lab.unit)
                );
                Ok(CompiledLab {
                    test: lab.test.clone(),
                    unit: lab.unit.clone(),
                    pattern: compile(&pattern)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            symptoms: normalized_terms(&knowledge.symptoms),
            diagnoses: normalized_terms(&knowledge.diagnoses),
            medications: knowledge.medications.iter().map(|m| normalize_term(m)).collect(),
            medication_pattern: compile(MEDICATION_PATTERN)?,
            lab_patterns,
            blood_pressure: compile(BLOOD_PRESSURE_PATTERN)?,
            heart_rate: compile(HEART_RATE_PATTERN)?,
            temperature: compile(TEMPERATURE_PATTERN)?,
        })
    }

    /// 从文本中识别实体
    ///
    /// 空文本返回空列表。输出顺序固定：生命体征、检验值、药物、症状、诊断。
    pub fn extract(&self, document_id: Uuid, text: &str) -> Vec<MedicalEntity> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut entities = Vec::new();
        entities.extend(self.extract_vital_signs(document_id, text));
        entities.extend(self.extract_lab_values(document_id, text));
        entities.extend(self.extract_medications(document_id, text));
        entities.extend(self.extract_terms(document_id, text, &self.symptoms, EntityType::Symptom));
        entities.extend(self.extract_terms(document_id, text, &self.diagnoses, EntityType::Diagnosis));

        tracing::debug!("Extracted {} entities from document {}", entities.len(), document_id);
        entities
    }

    /// 词典子串匹配，同一术语每个文档只报告一次
    fn extract_terms(
        &self,
        document_id: Uuid,
        text: &str,
        terms: &[TermEntry],
        entity_type: EntityType,
    ) -> Vec<MedicalEntity> {
        let haystack = text.to_lowercase();

        terms
            .iter()
            .filter(|entry| haystack.contains(entry.term.as_str()))
            .map(|entry| {
                MedicalEntity::new(document_id, entity_type, &entry.term, &entry.term, entry.confidence)
            })
            .collect()
    }

    fn extract_medications(&self, document_id: Uuid, text: &str) -> Vec<MedicalEntity> {
        self.medication_pattern
            .captures_iter(text)
            .filter_map(|caps| {
                let name = caps[1].to_lowercase();
                if !self.medications.contains(&name) {
                    return None;
                }
                let dose = format!("{} mg", &caps[2]);
                Some(
                    MedicalEntity::new(
                        document_id,
                        EntityType::Medication,
                        &caps[0],
                        name.as_str(),
                        MEDICATION_CONFIDENCE,
                    )
                    .with_metadata("name", name.as_str())
                    .with_metadata("dose", dose),
                )
            })
            .collect()
    }

    fn extract_lab_values(&self, document_id: Uuid, text: &str) -> Vec<MedicalEntity> {
        let mut entities = Vec::new();

        for lab in &self.lab_patterns {
            for caps in lab.pattern.captures_iter(text) {
                entities.push(
                    MedicalEntity::new(
                        document_id,
                        EntityType::LabValue,
                        &caps[0],
                        normalize_term(&caps[0]),
                        LAB_VALUE_CONFIDENCE,
                    )
                    .with_metadata("test", lab.test.as_str())
                    .with_metadata("value", &caps[1])
                    .with_metadata("unit", lab.unit.as_str()),
                );
            }
        }

        entities
    }

    fn extract_vital_signs(&self, document_id: Uuid, text: &str) -> Vec<MedicalEntity> {
        let mut entities = Vec::new();

        for caps in self.blood_pressure.captures_iter(text) {
            let value = format!("{}/{}", &caps[1], &caps[2]);
            entities.push(vital(document_id, &caps[0], VITAL_BLOOD_PRESSURE, value));
        }

        for caps in self.heart_rate.captures_iter(text) {
            entities.push(vital(document_id, &caps[0], VITAL_HEART_RATE, caps[1].to_string()));
        }

        for caps in self.temperature.captures_iter(text) {
            entities.push(vital(document_id, &caps[0], VITAL_TEMPERATURE, caps[1].to_string()));
        }

        entities
    }
}

fn vital(document_id: Uuid, matched: &str, vital_type: &str, value: String) -> MedicalEntity {
    MedicalEntity::new(
        document_id,
        EntityType::VitalSign,
        matched,
        normalize_term(matched),
        VITAL_SIGN_CONFIDENCE,
    )
    .with_metadata("type", vital_type)
    .with_metadata("value", value)
}

fn normalized_terms(entries: &[TermEntry]) -> Vec<TermEntry> {
    entries
        .iter()
        .map(|entry| TermEntry {
            term: normalize_term(&entry.term),
            confidence: entry.confidence,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> EntityExtractor {
        EntityExtractor::new(&KnowledgeBase::default()).unwrap()
    }

    fn of_type(entities: &[MedicalEntity], entity_type: EntityType) -> Vec<&MedicalEntity> {
        entities.iter().filter(|e| e.entity_type == entity_type).collect()
    }

    #[test]
    fn test_empty_text_yields_no_entities() {
        let ex = extractor();
        assert!(ex.extract(Uuid::new_v4(), "").is_empty());
        assert!(ex.extract(Uuid::new_v4(), "   \n\t").is_empty());
    }

    #[test]
    fn test_blood_pressure_vital_sign() {
        let ex = extractor();
        let doc = Uuid::new_v4();
        let entities = ex.extract(doc, "Blood Pressure: 180/120 mmHg");

        assert_eq!(entities.len(), 1);
        let bp = &entities[0];
        assert_eq!(bp.entity_type, EntityType::VitalSign);
        assert_eq!(bp.document_id, doc);
        assert_eq!(bp.metadata_value("type"), Some("blood_pressure"));
        assert_eq!(bp.metadata_value("value"), Some("180/120"));
        assert_eq!(bp.confidence, VITAL_SIGN_CONFIDENCE);
    }

    #[test]
    fn test_heart_rate_and_temperature() {
        let ex = extractor();
        let entities = ex.extract(Uuid::new_v4(), "Heart rate: 112 bpm. Temperature: 38.6°C");
        let vitals = of_type(&entities, EntityType::VitalSign);

        assert_eq!(vitals.len(), 2);
        assert_eq!(vitals[0].metadata_value("type"), Some("heart_rate"));
        assert_eq!(vitals[0].metadata_value("value"), Some("112"));
        assert_eq!(vitals[1].metadata_value("type"), Some("temperature"));
        assert_eq!(vitals[1].metadata_value("value"), Some("38.6"));
    }

    #[test]
    fn test_medications_require_known_name() {
        let ex = extractor();
        let entities = ex.extract(Uuid::new_v4(), "Started Warfarin 5 mg daily and foo 20 mg, aspirin 81mg.");
        let meds = of_type(&entities, EntityType::Medication);

        assert_eq!(meds.len(), 2);
        assert_eq!(meds[0].normalized_text, "warfarin");
        assert_eq!(meds[0].metadata_value("dose"), Some("5 mg"));
        assert_eq!(meds[1].normalized_text, "aspirin");
        assert_eq!(meds[1].confidence, MEDICATION_CONFIDENCE);
    }

    #[test]
    fn test_lab_values() {
        let ex = extractor();
        let entities = ex.extract(Uuid::new_v4(), "Blood Glucose: 182 mg/dL\nHbA1c: 7.9%");
        let labs = of_type(&entities, EntityType::LabValue);

        assert_eq!(labs.len(), 2);
        assert_eq!(labs[0].metadata_value("test"), Some("glucose"));
        assert_eq!(labs[0].metadata_value("value"), Some("182"));
        assert_eq!(labs[1].metadata_value("test"), Some("hba1c"));
        assert_eq!(labs[1].metadata_value("value"), Some("7.9"));
        assert!(labs.iter().all(|l| l.confidence == LAB_VALUE_CONFIDENCE));
    }

    #[test]
    fn test_dictionary_terms_case_insensitive() {
        let ex = extractor();
        let entities = ex.extract(
            Uuid::new_v4(),
            "Patient reports HEADACHE, dizziness and Nausea. History of Hypertension.",
        );

        let symptoms: Vec<_> = of_type(&entities, EntityType::Symptom)
            .into_iter()
            .map(|e| e.normalized_text.as_str())
            .collect();
        assert_eq!(symptoms, vec!["headache", "nausea", "dizziness"]);

        let diagnoses = of_type(&entities, EntityType::Diagnosis);
        assert_eq!(diagnoses.len(), 1);
        assert_eq!(diagnoses[0].normalized_text, "hypertension");
        assert_eq!(diagnoses[0].confidence, 0.95);
    }

    #[test]
    fn test_unmatched_text_is_not_an_error() {
        let ex = extractor();
        assert!(ex.extract(Uuid::new_v4(), "The weather was pleasant today.").is_empty());
    }

    #[test]
    fn test_extraction_is_repeatable() {
        let ex = extractor();
        let doc = Uuid::new_v4();
        let text = "BP 150/95 mmHg, fever, cough, metformin 500 mg";
        let first: Vec<_> = ex.extract(doc, text).into_iter().map(|e| (e.entity_type, e.normalized_text, e.metadata)).collect();
        let second: Vec<_> = ex.extract(doc, text).into_iter().map(|e| (e.entity_type, e.normalized_text, e.metadata)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_lab_label_rejected() {
        let mut kb = KnowledgeBase::default();
        kb.lab_tests[0].label = "(unclosed".to_string();
        assert!(matches!(EntityExtractor::new(&kb), Err(CdssError::Config(_))));
    }
}
