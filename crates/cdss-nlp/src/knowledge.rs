//! 临床知识库
//!
//! 症状、诊断、药物、检验项目以及三套术语表。知识库在进程启动时从内置默认值
//! 或TOML文件加载一次，之后以不可变结构注入实体识别器和术语标准化器。

use cdss_core::{CdssError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// 词典术语
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TermEntry {
    pub term: String,
    pub confidence: f64,
}

/// 检验项目匹配模式
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabPattern {
    /// 检验项目名 (glucose, hba1c ...)，也是检验规则的键
    pub test: String,
    /// 标签正则片段，例如 `blood\s+glucose|glucose`
    pub label: String,
    /// 单位原文，例如 `mg/dL`
    pub unit: String,
}

/// 术语表条目
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeEntry {
    pub term: String,
    pub code: String,
    pub description: String,
    pub confidence: f64,
}

/// 三套术语表
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OntologyTables {
    /// 症状 → SNOMED CT
    pub snomed: Vec<CodeEntry>,
    /// 诊断 → ICD-10
    pub icd10: Vec<CodeEntry>,
    /// 操作 → UMLS
    pub umls: Vec<CodeEntry>,
}

/// 临床知识库
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KnowledgeBase {
    pub version: String,
    pub symptoms: Vec<TermEntry>,
    pub diagnoses: Vec<TermEntry>,
    pub medications: Vec<String>,
    pub lab_tests: Vec<LabPattern>,
    pub ontology: OntologyTables,
}

impl KnowledgeBase {
    /// 从TOML文本解析知识库，缺失的段落使用内置默认值
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let kb: KnowledgeBase = toml::from_str(content)
            .map_err(|e| CdssError::Config(format!("知识库解析失败: {}", e)))?;
        kb.validate()?;
        Ok(kb)
    }

    /// 从TOML文件加载知识库
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let kb = Self::from_toml_str(&content)?;
        info!(
            "Knowledge base {} loaded from {}: {} symptoms, {} diagnoses, {} medications",
            kb.version,
            path.display(),
            kb.symptoms.len(),
            kb.diagnoses.len(),
            kb.medications.len()
        );
        Ok(kb)
    }

    /// 校验置信度区间与术语唯一性
    pub fn validate(&self) -> Result<()> {
        let terms = self.symptoms.iter().chain(self.diagnoses.iter());
        for entry in terms {
            if !(0.0..=1.0).contains(&entry.confidence) {
                return Err(CdssError::Config(format!(
                    "术语 {} 的置信度 {} 超出 [0,1]",
                    entry.term, entry.confidence
                )));
            }
            if entry.term.trim().is_empty() {
                return Err(CdssError::Config("知识库中存在空术语".to_string()));
            }
        }

        let tables = [
            ("snomed", &self.ontology.snomed),
            ("icd10", &self.ontology.icd10),
            ("umls", &self.ontology.umls),
        ];
        for (name, table) in tables {
            let mut seen = HashSet::new();
            for entry in table.iter() {
                if !seen.insert(entry.term.trim().to_lowercase()) {
                    return Err(CdssError::Config(format!(
                        "术语表 {} 中存在重复术语: {}",
                        name, entry.term
                    )));
                }
                if !(0.0..=1.0).contains(&entry.confidence) {
                    return Err(CdssError::Config(format!(
                        "术语表 {} 中 {} 的置信度超出 [0,1]",
                        name, entry.term
                    )));
                }
            }
        }

        Ok(())
    }
}

fn term(term: &str, confidence: f64) -> TermEntry {
    TermEntry {
        term: term.to_string(),
        confidence,
    }
}

fn code(term: &str, code: &str, description: &str, confidence: f64) -> CodeEntry {
    CodeEntry {
        term: term.to_string(),
        code: code.to_string(),
        description: description.to_string(),
        confidence,
    }
}

fn lab(test: &str, label: &str, unit: &str) -> LabPattern {
    LabPattern {
        test: test.to_string(),
        label: label.to_string(),
        unit: unit.to_string(),
    }
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self {
            version: "builtin-1".to_string(),
            symptoms: vec![
                term("headache", 0.95),
                term("fever", 0.95),
                term("cough", 0.92),
                term("nausea", 0.90),
                term("dizziness", 0.90),
                term("chest pain", 0.98),
                term("shortness of breath", 0.96),
                term("fatigue", 0.88),
                term("vomiting", 0.90),
                term("abdominal pain", 0.93),
                term("sore throat", 0.90),
                term("palpitations", 0.92),
                term("rash", 0.85),
            ],
            diagnoses: vec![
                term("hypertension", 0.95),
                term("diabetes", 0.95),
                term("asthma", 0.93),
                term("pneumonia", 0.92),
                term("migraine", 0.90),
                term("bronchitis", 0.88),
                term("copd", 0.90),
                term("atrial fibrillation", 0.94),
                term("hyperlipidemia", 0.90),
            ],
            medications: [
                "aspirin",
                "ibuprofen",
                "naproxen",
                "warfarin",
                "clopidogrel",
                "metformin",
                "lisinopril",
                "losartan",
                "spironolactone",
                "atorvastatin",
                "simvastatin",
                "clarithromycin",
                "amoxicillin",
                "acetaminophen",
                "paracetamol",
                "omeprazole",
                "sertraline",
                "tramadol",
                "amlodipine",
                "metoprolol",
                "digoxin",
                "amiodarone",
                "sumatriptan",
            ]
            .iter()
            .map(|m| m.to_string())
            .collect(),
            lab_tests: vec![
                lab("glucose", r"blood\s+glucose|glucose", "mg/dL"),
                lab("hba1c", r"hba1c|hemoglobin\s+a1c", "%"),
                lab("cholesterol", r"total\s+cholesterol|cholesterol", "mg/dL"),
                lab("hemoglobin", r"hemoglobin|hgb", "g/dL"),
                lab("creatinine", r"serum\s+creatinine|creatinine", "mg/dL"),
                lab("potassium", r"potassium|k\+", "mmol/L"),
            ],
            ontology: OntologyTables::default(),
        }
    }
}

impl Default for OntologyTables {
    fn default() -> Self {
        Self {
            snomed: vec![
                code("headache", "25064002", "Headache", 0.95),
                code("fever", "386661006", "Fever", 0.95),
                code("cough", "49727002", "Cough", 0.94),
                code("nausea", "422587007", "Nausea", 0.93),
                code("dizziness", "404640003", "Dizziness", 0.92),
                code("chest pain", "29857009", "Chest pain", 0.96),
                code("shortness of breath", "267036007", "Dyspnea", 0.93),
                code("fatigue", "84229001", "Fatigue", 0.90),
                code("vomiting", "422400008", "Vomiting", 0.92),
                code("abdominal pain", "21522001", "Abdominal pain", 0.94),
                code("sore throat", "162397003", "Pain in throat", 0.90),
                code("palpitations", "80313002", "Palpitations", 0.91),
                code("rash", "271807003", "Eruption of skin", 0.88),
            ],
            icd10: vec![
                code("hypertension", "I10", "Essential (primary) hypertension", 0.96),
                code("diabetes", "E11.9", "Type 2 diabetes mellitus without complications", 0.90),
                code("asthma", "J45.909", "Unspecified asthma, uncomplicated", 0.92),
                code("pneumonia", "J18.9", "Pneumonia, unspecified organism", 0.93),
                code("migraine", "G43.909", "Migraine, unspecified, not intractable", 0.92),
                code("bronchitis", "J40", "Bronchitis, not specified as acute or chronic", 0.90),
                code("copd", "J44.9", "Chronic obstructive pulmonary disease, unspecified", 0.91),
                code("atrial fibrillation", "I48.91", "Unspecified atrial fibrillation", 0.94),
                code("hyperlipidemia", "E78.5", "Hyperlipidemia, unspecified", 0.92),
            ],
            umls: vec![
                code("electrocardiogram", "C1623258", "Electrocardiography", 0.95),
                code("chest x-ray", "C0039985", "Plain chest X-ray", 0.93),
                code("mri", "C0024485", "Magnetic Resonance Imaging", 0.94),
                code("ct scan", "C0040405", "X-Ray Computed Tomography", 0.94),
                code("colonoscopy", "C0009378", "Colonoscopy", 0.95),
                code("appendectomy", "C0003611", "Appendectomy", 0.96),
                code("blood test", "C0018941", "Hematologic Tests", 0.88),
            ],
        }
    }
}
