//! 核心数据模型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{CdssError, Result};
use crate::utils::clamp_confidence;

/// 上传的临床文档
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub file_name: String,
    pub storage_path: String,  // 外部文档存储中的路径
    pub document_type: String, // 文档类型标签 (lab_report, discharge_summary等)
    pub content_sha256: String,
    pub size_bytes: i64,
    pub uploaded_at: DateTime<Utc>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub ocr_text: Option<String>,
}

impl Document {
    pub fn new(
        patient_id: Uuid,
        file_name: String,
        storage_path: String,
        document_type: String,
        content_sha256: String,
        size_bytes: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id,
            file_name,
            storage_path,
            document_type,
            content_sha256,
            size_bytes,
            uploaded_at: Utc::now(),
            processed: false,
            processed_at: None,
            ocr_text: None,
        }
    }

    /// 记录文本提取结果
    pub fn record_text(&mut self, text: String) {
        self.ocr_text = Some(text);
        self.processed = true;
        self.processed_at = Some(Utc::now());
    }

    pub fn has_text(&self) -> bool {
        self.ocr_text.is_some()
    }
}

/// 医学实体类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityType {
    Symptom,
    Medication,
    Diagnosis,
    LabValue,
    VitalSign,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Symptom => "Symptom",
            EntityType::Medication => "Medication",
            EntityType::Diagnosis => "Diagnosis",
            EntityType::LabValue => "LabValue",
            EntityType::VitalSign => "VitalSign",
        }
    }

    pub fn all() -> [EntityType; 5] {
        [
            EntityType::Symptom,
            EntityType::Medication,
            EntityType::Diagnosis,
            EntityType::LabValue,
            EntityType::VitalSign,
        ]
    }

    /// 实体对应的术语族，没有术语族的实体不参与标准化
    pub fn ontology_family(&self) -> Option<OntologyFamily> {
        match self {
            EntityType::Symptom => Some(OntologyFamily::Symptom),
            EntityType::Diagnosis => Some(OntologyFamily::Diagnosis),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = CdssError;

    fn from_str(s: &str) -> Result<Self> {
        EntityType::all()
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CdssError::Validation(format!("未知的实体类型: {}", s)))
    }
}

/// 从文本中提取的医学实体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MedicalEntity {
    pub id: Uuid,
    pub document_id: Uuid,
    pub entity_type: EntityType,
    pub text: String,            // 原文片段
    pub normalized_text: String, // 小写、去空白后的文本
    pub ontology_code: Option<String>,
    pub ontology_system: Option<CodingSystem>,
    pub ontology_description: Option<String>,
    pub ontology_match: Option<MatchKind>,
    pub confidence: f64,
    pub metadata: BTreeMap<String, String>,
    pub extracted_at: DateTime<Utc>,
}

impl MedicalEntity {
    pub fn new(
        document_id: Uuid,
        entity_type: EntityType,
        text: impl Into<String>,
        normalized_text: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            entity_type,
            text: text.into(),
            normalized_text: normalized_text.into(),
            ontology_code: None,
            ontology_system: None,
            ontology_description: None,
            ontology_match: None,
            confidence: clamp_confidence(confidence),
            metadata: BTreeMap::new(),
            extracted_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// 写入术语映射结果
    pub fn apply_mapping(&mut self, mapping: &OntologyMapping) {
        self.ontology_code = Some(mapping.code.clone());
        self.ontology_system = Some(mapping.system);
        self.ontology_description = Some(mapping.description.clone());
        self.ontology_match = Some(mapping.match_kind);
    }
}

/// 术语族
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OntologyFamily {
    Symptom,
    Diagnosis,
    Procedure,
}

impl OntologyFamily {
    pub fn coding_system(&self) -> CodingSystem {
        match self {
            OntologyFamily::Symptom => CodingSystem::SnomedCt,
            OntologyFamily::Diagnosis => CodingSystem::Icd10,
            OntologyFamily::Procedure => CodingSystem::Umls,
        }
    }
}

impl FromStr for OntologyFamily {
    type Err = CdssError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "symptom" => Ok(OntologyFamily::Symptom),
            "diagnosis" => Ok(OntologyFamily::Diagnosis),
            "procedure" => Ok(OntologyFamily::Procedure),
            _ => Err(CdssError::Validation(format!("未知的术语族: {}", s))),
        }
    }
}

/// 编码体系
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CodingSystem {
    #[serde(rename = "SNOMED CT")]
    SnomedCt,
    #[serde(rename = "ICD-10")]
    Icd10,
    #[serde(rename = "UMLS")]
    Umls,
}

impl CodingSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodingSystem::SnomedCt => "SNOMED CT",
            CodingSystem::Icd10 => "ICD-10",
            CodingSystem::Umls => "UMLS",
        }
    }
}

impl fmt::Display for CodingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodingSystem {
    type Err = CdssError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SNOMED CT" => Ok(CodingSystem::SnomedCt),
            "ICD-10" => Ok(CodingSystem::Icd10),
            "UMLS" => Ok(CodingSystem::Umls),
            _ => Err(CdssError::Validation(format!("未知的编码体系: {}", s))),
        }
    }
}

/// 映射来源：精确命中术语表，或回退到通用编码
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MatchKind {
    Exact,
    Fallback,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Exact => "Exact",
            MatchKind::Fallback => "Fallback",
        }
    }
}

impl FromStr for MatchKind {
    type Err = CdssError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Exact" => Ok(MatchKind::Exact),
            "Fallback" => Ok(MatchKind::Fallback),
            _ => Err(CdssError::Validation(format!("未知的映射来源: {}", s))),
        }
    }
}

/// 术语映射结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OntologyMapping {
    pub code: String,
    pub system: CodingSystem,
    pub description: String,
    pub confidence: f64,
    #[serde(rename = "match")]
    pub match_kind: MatchKind,
}

impl OntologyMapping {
    pub fn is_fallback(&self) -> bool {
        self.match_kind == MatchKind::Fallback
    }
}

/// 推荐类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RecommendationType {
    Alert,
    Diagnosis,
    Treatment,
    FollowUp,
}

impl RecommendationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationType::Alert => "Alert",
            RecommendationType::Diagnosis => "Diagnosis",
            RecommendationType::Treatment => "Treatment",
            RecommendationType::FollowUp => "FollowUp",
        }
    }
}

impl FromStr for RecommendationType {
    type Err = CdssError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Alert" => Ok(RecommendationType::Alert),
            "Diagnosis" => Ok(RecommendationType::Diagnosis),
            "Treatment" => Ok(RecommendationType::Treatment),
            "FollowUp" => Ok(RecommendationType::FollowUp),
            _ => Err(CdssError::Validation(format!("未知的推荐类型: {}", s))),
        }
    }
}

/// 推荐严重程度
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Info,    // 提示
    Normal,  // 一般
    Warning, // 警告
    Urgent,  // 紧急
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "Info",
            Severity::Normal => "Normal",
            Severity::Warning => "Warning",
            Severity::Urgent => "Urgent",
        }
    }

    pub fn all() -> [Severity; 4] {
        [Severity::Info, Severity::Normal, Severity::Warning, Severity::Urgent]
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = CdssError;

    fn from_str(s: &str) -> Result<Self> {
        Severity::all()
            .into_iter()
            .find(|sev| sev.as_str() == s)
            .ok_or_else(|| CdssError::Validation(format!("未知的严重程度: {}", s)))
    }
}

/// 推荐审核状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ReviewState {
    Unreviewed, // 待审核
    Accepted,   // 已采纳
    Rejected,   // 已拒绝
}

impl ReviewState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewState::Unreviewed => "Unreviewed",
            ReviewState::Accepted => "Accepted",
            ReviewState::Rejected => "Rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReviewState::Unreviewed)
    }
}

impl FromStr for ReviewState {
    type Err = CdssError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Unreviewed" => Ok(ReviewState::Unreviewed),
            "Accepted" => Ok(ReviewState::Accepted),
            "Rejected" => Ok(ReviewState::Rejected),
            _ => Err(CdssError::Validation(format!("未知的审核状态: {}", s))),
        }
    }
}

/// 临床推荐
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub document_id: Option<Uuid>,
    pub encounter_id: Option<Uuid>,
    pub recommendation_type: RecommendationType,
    pub text: String,
    pub severity: Severity,
    pub confidence: f64,
    pub evidence: Vec<String>,
    pub rules_fired: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub run_id: Option<Uuid>,
    pub run_fingerprint: Option<String>,
    pub review_state: ReviewState,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
}

impl Recommendation {
    pub fn new(
        patient_id: Uuid,
        recommendation_type: RecommendationType,
        text: impl Into<String>,
        severity: Severity,
        confidence: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id,
            document_id: None,
            encounter_id: None,
            recommendation_type,
            text: text.into(),
            severity,
            confidence: clamp_confidence(confidence),
            evidence: Vec::new(),
            rules_fired: Vec::new(),
            generated_at: Utc::now(),
            run_id: None,
            run_fingerprint: None,
            review_state: ReviewState::Unreviewed,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
        }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence.push(evidence.into());
        self
    }

    pub fn with_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.rules_fired.push(rule_id.into());
        self
    }

    pub fn fired(&self, rule_id: &str) -> bool {
        self.rules_fired.iter().any(|r| r == rule_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Normal);
        assert!(Severity::Normal < Severity::Warning);
        assert!(Severity::Warning < Severity::Urgent);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let entity = MedicalEntity::new(Uuid::new_v4(), EntityType::Symptom, "x", "x", 1.7);
        assert_eq!(entity.confidence, 1.0);

        let rec = Recommendation::new(Uuid::new_v4(), RecommendationType::Alert, "x", Severity::Info, -0.2);
        assert_eq!(rec.confidence, 0.0);
    }

    #[test]
    fn test_ontology_family_parsing() {
        assert_eq!("Symptom".parse::<OntologyFamily>().unwrap(), OntologyFamily::Symptom);
        assert_eq!(" procedure ".parse::<OntologyFamily>().unwrap(), OntologyFamily::Procedure);
        assert!("Medication".parse::<OntologyFamily>().is_err());
    }

    #[test]
    fn test_mapping_serializes_system_names() {
        let mapping = OntologyMapping {
            code: "25064002".to_string(),
            system: CodingSystem::SnomedCt,
            description: "Headache".to_string(),
            confidence: 0.95,
            match_kind: MatchKind::Exact,
        };
        let json = serde_json::to_value(&mapping).unwrap();
        assert_eq!(json["system"], "SNOMED CT");
        assert_eq!(json["match"], "Exact");
    }

    #[test]
    fn test_review_state_terminal() {
        assert!(!ReviewState::Unreviewed.is_terminal());
        assert!(ReviewState::Accepted.is_terminal());
        assert!(ReviewState::Rejected.is_terminal());
    }
}
