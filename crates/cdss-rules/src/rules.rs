//! 规则定义
//!
//! 每条规则都是一条数据记录（判定条件、文本模板、严重程度、置信度、规则ID），
//! 新增规则只需修改数据，不需要修改代码。内置规则集可由TOML规则文件整体替换。

use cdss_core::{CdssError, RecommendationType, Result, Severity};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// 药物相互作用规则ID
pub const RULE_DRUG_INTERACTION: &str = "RULE_DRUG_INTERACTION";

/// 数值取值位置
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    /// 元数据 `value` 的整体数值
    Value,
    /// `收缩压/舒张压` 中的收缩压
    Systolic,
    /// `收缩压/舒张压` 中的舒张压
    Diastolic,
}

impl Measure {
    pub fn label(&self) -> &'static str {
        match self {
            Measure::Value => "value",
            Measure::Systolic => "systolic",
            Measure::Diastolic => "diastolic",
        }
    }
}

/// 比较运算
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Comparison {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
}

impl Comparison {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Gt => value > threshold,
            Comparison::Ge => value >= threshold,
            Comparison::Lt => value < threshold,
            Comparison::Le => value <= threshold,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
        }
    }
}

/// 单个阈值条件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub measure: Measure,
    pub op: Comparison,
    pub threshold: f64,
}

/// 阈值档位，任一条件成立即命中
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdTier {
    pub severity: Severity,
    pub any_of: Vec<Condition>,
    /// 推荐文本模板，`{value}` 替换为实体元数据中的原始值
    pub template: String,
}

/// 阈值规则，用于生命体征与检验值
///
/// 档位按严重程度从高到低排列，每个实体最多命中一个档位。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdRule {
    pub id: String,
    /// 生命体征的 `type` 或检验项目名
    pub subject: String,
    pub recommendation_type: RecommendationType,
    pub confidence: f64,
    pub tiers: Vec<ThresholdTier>,
}

/// 药物相互作用条目，按一个药物建键，与另一个药物名做子串匹配
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionEntry {
    pub id: String,
    pub drug: String,
    pub interacts_with: Vec<String>,
    pub description: String,
    #[serde(default = "default_interaction_severity")]
    pub severity: Severity,
    #[serde(default = "default_interaction_confidence")]
    pub confidence: f64,
}

fn default_interaction_severity() -> Severity {
    Severity::Warning
}

fn default_interaction_confidence() -> f64 {
    0.88
}

/// 配套治疗建议
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreatmentSuggestion {
    pub id: String,
    pub text: String,
    #[serde(default = "default_treatment_confidence")]
    pub confidence: f64,
}

fn default_treatment_confidence() -> f64 {
    0.82
}

/// 症状组合规则，所需症状全部出现时给出诊断建议
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SymptomPatternRule {
    pub id: String,
    pub required: Vec<String>,
    pub diagnosis: String,
    #[serde(default = "default_diagnosis_confidence")]
    pub confidence: f64,
    pub treatment: Option<TreatmentSuggestion>,
}

fn default_diagnosis_confidence() -> f64 {
    0.78
}

/// 就诊上下文规则
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextRule {
    pub id: String,
    /// 上下文中需包含的短语（不区分大小写）
    pub phrase: String,
    pub recommendation_type: RecommendationType,
    pub severity: Severity,
    pub confidence: f64,
    pub text: String,
}

/// 完整规则集
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuleSet {
    pub version: String,
    pub vital_rules: Vec<ThresholdRule>,
    pub interactions: Vec<InteractionEntry>,
    pub symptom_patterns: Vec<SymptomPatternRule>,
    pub lab_rules: Vec<ThresholdRule>,
    pub context_rules: Vec<ContextRule>,
}

impl RuleSet {
    /// 从TOML文本解析规则集
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let rules: RuleSet = toml::from_str(content)
            .map_err(|e| CdssError::Config(format!("规则文件解析失败: {}", e)))?;
        rules.validate()?;
        Ok(rules)
    }

    /// 从TOML文件加载规则集
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let rules = Self::from_toml_str(&content)?;
        tracing::info!(
            "Rule set {} loaded from {}: {} rules",
            rules.version,
            path.as_ref().display(),
            rules.rule_count()
        );
        Ok(rules)
    }

    pub fn rule_count(&self) -> usize {
        self.vital_rules.len()
            + self.interactions.len()
            + self.symptom_patterns.len()
            + self.lab_rules.len()
            + self.context_rules.len()
    }

    /// 校验规则集：ID唯一、置信度在 [0,1]、档位严重程度单调不增
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        let mut check_id = |id: &str| -> Result<()> {
            if id.trim().is_empty() {
                return Err(CdssError::Config("规则ID不能为空".to_string()));
            }
            if !ids.insert(id.to_string()) {
                return Err(CdssError::Config(format!("规则ID重复: {}", id)));
            }
            Ok(())
        };

        for rule in self.vital_rules.iter().chain(self.lab_rules.iter()) {
            check_id(&rule.id)?;
            check_confidence(&rule.id, rule.confidence)?;
            if rule.tiers.is_empty() {
                return Err(CdssError::Config(format!("规则 {} 没有阈值档位", rule.id)));
            }
            for tier in &rule.tiers {
                if tier.any_of.is_empty() {
                    return Err(CdssError::Config(format!("规则 {} 存在空条件档位", rule.id)));
                }
            }
            let descending = rule.tiers.windows(2).all(|w| w[0].severity >= w[1].severity);
            if !descending {
                return Err(CdssError::Config(format!(
                    "规则 {} 的档位必须按严重程度从高到低排列",
                    rule.id
                )));
            }
        }

        for entry in &self.interactions {
            check_id(&entry.id)?;
            check_confidence(&entry.id, entry.confidence)?;
        }

        for pattern in &self.symptom_patterns {
            check_id(&pattern.id)?;
            check_confidence(&pattern.id, pattern.confidence)?;
            if pattern.required.is_empty() {
                return Err(CdssError::Config(format!("规则 {} 没有所需症状", pattern.id)));
            }
            if let Some(treatment) = &pattern.treatment {
                check_id(&treatment.id)?;
                check_confidence(&treatment.id, treatment.confidence)?;
            }
        }

        for rule in &self.context_rules {
            check_id(&rule.id)?;
            check_confidence(&rule.id, rule.confidence)?;
        }

        Ok(())
    }
}

fn check_confidence(id: &str, confidence: f64) -> Result<()> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(CdssError::Config(format!("规则 {} 的置信度 {} 超出 [0,1]", id, confidence)))
    }
}

fn cond(measure: Measure, op: Comparison, threshold: f64) -> Condition {
    Condition { measure, op, threshold }
}

fn tier(severity: Severity, any_of: Vec<Condition>, template: &str) -> ThresholdTier {
    ThresholdTier {
        severity,
        any_of,
        template: template.to_string(),
    }
}

fn alert_rule(id: &str, subject: &str, confidence: f64, tiers: Vec<ThresholdTier>) -> ThresholdRule {
    ThresholdRule {
        id: id.to_string(),
        subject: subject.to_string(),
        recommendation_type: RecommendationType::Alert,
        confidence,
        tiers,
    }
}

fn interaction(id: &str, drug: &str, partners: &[&str], description: &str) -> InteractionEntry {
    InteractionEntry {
        id: id.to_string(),
        drug: drug.to_string(),
        interacts_with: partners.iter().map(|p| p.to_string()).collect(),
        description: description.to_string(),
        severity: default_interaction_severity(),
        confidence: default_interaction_confidence(),
    }
}

fn pattern(id: &str, required: &[&str], diagnosis: &str, treatment: Option<(&str, &str)>) -> SymptomPatternRule {
    SymptomPatternRule {
        id: id.to_string(),
        required: required.iter().map(|s| s.to_string()).collect(),
        diagnosis: diagnosis.to_string(),
        confidence: default_diagnosis_confidence(),
        treatment: treatment.map(|(id, text)| TreatmentSuggestion {
            id: id.to_string(),
            text: text.to_string(),
            confidence: default_treatment_confidence(),
        }),
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        use Comparison::{Ge, Gt, Lt};
        use Measure::{Diastolic, Systolic, Value};

        Self {
            version: "builtin-1".to_string(),
            vital_rules: vec![
                alert_rule(
                    "RULE_HYPERTENSION",
                    "blood_pressure",
                    0.95,
                    vec![
                        tier(
                            Severity::Urgent,
                            vec![cond(Systolic, Ge, 180.0), cond(Diastolic, Ge, 120.0)],
                            "Hypertensive crisis: blood pressure {value} mmHg. Immediate evaluation recommended.",
                        ),
                        tier(
                            Severity::Warning,
                            vec![cond(Systolic, Ge, 140.0), cond(Diastolic, Ge, 90.0)],
                            "Elevated blood pressure {value} mmHg. Repeat measurement and consider hypertension management.",
                        ),
                    ],
                ),
                alert_rule(
                    "RULE_FEVER",
                    "temperature",
                    0.97,
                    vec![
                        tier(
                            Severity::Warning,
                            vec![cond(Value, Ge, 39.0)],
                            "High fever ({value}°C). Evaluate for infection and consider antipyretics.",
                        ),
                        tier(
                            Severity::Info,
                            vec![cond(Value, Ge, 38.0)],
                            "Fever detected ({value}°C). Monitor temperature.",
                        ),
                    ],
                ),
                alert_rule(
                    "RULE_TACHYCARDIA",
                    "heart_rate",
                    0.90,
                    vec![
                        tier(
                            Severity::Warning,
                            vec![cond(Value, Gt, 120.0)],
                            "Marked tachycardia ({value} bpm). Obtain an ECG.",
                        ),
                        tier(
                            Severity::Info,
                            vec![cond(Value, Gt, 100.0)],
                            "Tachycardia detected ({value} bpm).",
                        ),
                    ],
                ),
                alert_rule(
                    "RULE_BRADYCARDIA",
                    "heart_rate",
                    0.88,
                    vec![tier(
                        Severity::Info,
                        vec![cond(Value, Lt, 60.0)],
                        "Bradycardia detected ({value} bpm). Review rate-limiting medications.",
                    )],
                ),
            ],
            interactions: vec![
                interaction(
                    "DDI_WARFARIN_ANTIPLATELET",
                    "warfarin",
                    &["aspirin", "ibuprofen", "naproxen", "clopidogrel"],
                    "increased bleeding risk",
                ),
                interaction(
                    "DDI_RAAS_SPIRONOLACTONE",
                    "spironolactone",
                    &["lisinopril", "losartan"],
                    "risk of hyperkalemia",
                ),
                interaction(
                    "DDI_STATIN_MACROLIDE",
                    "clarithromycin",
                    &["simvastatin", "atorvastatin"],
                    "increased risk of myopathy and rhabdomyolysis",
                ),
                interaction(
                    "DDI_SEROTONERGIC",
                    "sertraline",
                    &["tramadol", "sumatriptan"],
                    "risk of serotonin syndrome",
                ),
                interaction(
                    "DDI_DIGOXIN_AMIODARONE",
                    "amiodarone",
                    &["digoxin"],
                    "amiodarone raises digoxin levels",
                ),
                interaction(
                    "DDI_CLOPIDOGREL_PPI",
                    "clopidogrel",
                    &["omeprazole"],
                    "reduced antiplatelet effect of clopidogrel",
                ),
            ],
            symptom_patterns: vec![
                pattern(
                    "RULE_MIGRAINE_PATTERN",
                    &["headache", "dizziness", "nausea"],
                    "Symptom pattern suggests migraine. Consider neurological evaluation.",
                    Some((
                        "TREAT_MIGRAINE",
                        "Consider NSAIDs or a triptan for acute relief; advise rest in a dark, quiet room and hydration.",
                    )),
                ),
                pattern(
                    "RULE_RESPIRATORY_INFECTION",
                    &["fever", "cough"],
                    "Symptom pattern suggests a respiratory infection such as bronchitis or pneumonia.",
                    Some((
                        "TREAT_RESPIRATORY",
                        "Consider a chest X-ray and evaluate the need for antibiotic therapy.",
                    )),
                ),
                pattern(
                    "RULE_CARDIAC_PATTERN",
                    &["chest pain", "shortness of breath"],
                    "Chest pain with dyspnea: rule out acute coronary syndrome.",
                    Some((
                        "TREAT_CARDIAC",
                        "Obtain a 12-lead ECG and cardiac troponin without delay.",
                    )),
                ),
                pattern(
                    "RULE_GASTROENTERITIS_PATTERN",
                    &["nausea", "vomiting", "abdominal pain"],
                    "Symptom pattern suggests gastroenteritis.",
                    Some((
                        "TREAT_GASTROENTERITIS",
                        "Encourage oral rehydration and consider an antiemetic.",
                    )),
                ),
            ],
            lab_rules: vec![
                alert_rule(
                    "RULE_LAB_GLUCOSE",
                    "glucose",
                    0.90,
                    vec![
                        tier(
                            Severity::Warning,
                            vec![cond(Value, Gt, 125.0)],
                            "Elevated blood glucose ({value} mg/dL). Consider HbA1c testing for diabetes.",
                        ),
                        tier(
                            Severity::Warning,
                            vec![cond(Value, Lt, 70.0)],
                            "Low blood glucose ({value} mg/dL). Assess for hypoglycemia.",
                        ),
                    ],
                ),
                alert_rule(
                    "RULE_LAB_HBA1C",
                    "hba1c",
                    0.90,
                    vec![
                        tier(
                            Severity::Warning,
                            vec![cond(Value, Ge, 6.5)],
                            "HbA1c {value}% is in the diabetic range.",
                        ),
                        tier(
                            Severity::Info,
                            vec![cond(Value, Ge, 5.7)],
                            "HbA1c {value}% indicates prediabetes.",
                        ),
                    ],
                ),
                alert_rule(
                    "RULE_LAB_CHOLESTEROL",
                    "cholesterol",
                    0.90,
                    vec![
                        tier(
                            Severity::Warning,
                            vec![cond(Value, Ge, 240.0)],
                            "High total cholesterol ({value} mg/dL). Consider lipid-lowering therapy.",
                        ),
                        tier(
                            Severity::Info,
                            vec![cond(Value, Ge, 200.0)],
                            "Borderline high total cholesterol ({value} mg/dL).",
                        ),
                    ],
                ),
                alert_rule(
                    "RULE_LAB_CREATININE",
                    "creatinine",
                    0.90,
                    vec![tier(
                        Severity::Warning,
                        vec![cond(Value, Gt, 1.3)],
                        "Elevated creatinine ({value} mg/dL). Assess renal function.",
                    )],
                ),
                alert_rule(
                    "RULE_LAB_POTASSIUM",
                    "potassium",
                    0.90,
                    vec![
                        tier(
                            Severity::Urgent,
                            vec![cond(Value, Ge, 6.0)],
                            "Severe hyperkalemia ({value} mmol/L). Obtain an ECG immediately.",
                        ),
                        tier(
                            Severity::Warning,
                            vec![cond(Value, Gt, 5.0)],
                            "Elevated potassium ({value} mmol/L).",
                        ),
                        tier(
                            Severity::Warning,
                            vec![cond(Value, Lt, 3.5)],
                            "Low potassium ({value} mmol/L).",
                        ),
                    ],
                ),
                alert_rule(
                    "RULE_LAB_HEMOGLOBIN",
                    "hemoglobin",
                    0.90,
                    vec![tier(
                        Severity::Warning,
                        vec![cond(Value, Lt, 12.0)],
                        "Low hemoglobin ({value} g/dL). Evaluate for anemia.",
                    )],
                ),
            ],
            context_rules: vec![ContextRule {
                id: "RULE_FIRST_VISIT".to_string(),
                phrase: "first visit".to_string(),
                recommendation_type: RecommendationType::FollowUp,
                severity: Severity::Info,
                confidence: 0.90,
                text: "Schedule a follow-up visit within 2 weeks to review results and establish a baseline care plan."
                    .to_string(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_rule_set_is_valid() {
        let rules = RuleSet::default();
        assert!(rules.validate().is_ok());
        assert_eq!(rules.rule_count(), 4 + 6 + 4 + 6 + 1);
    }

    #[test]
    fn test_rule_file_parsing() {
        let rules = RuleSet::from_toml_str(
            r#"
            version = "site-rules-3"

            [[vital_rules]]
            id = "RULE_HYPOTHERMIA"
            subject = "temperature"
            recommendation_type = "Alert"
            confidence = 0.9

            [[vital_rules.tiers]]
            severity = "Warning"
            template = "Hypothermia ({value}°C)."
            any_of = [{ measure = "value", op = "<", threshold = 35.0 }]

            [[interactions]]
            id = "DDI_TEST"
            drug = "warfarin"
            interacts_with = ["aspirin"]
            description = "bleeding"
            "#,
        )
        .unwrap();

        assert_eq!(rules.version, "site-rules-3");
        assert_eq!(rules.vital_rules.len(), 1);
        assert_eq!(rules.vital_rules[0].tiers[0].any_of[0].op, Comparison::Lt);
        assert_eq!(rules.interactions[0].severity, Severity::Warning);
        assert_eq!(rules.interactions[0].confidence, 0.88);
    }

    #[test]
    fn test_ascending_tiers_rejected() {
        let mut rules = RuleSet::default();
        rules.vital_rules[0].tiers.reverse();
        assert!(matches!(rules.validate(), Err(CdssError::Config(_))));
    }

    #[test]
    fn test_duplicate_rule_id_rejected() {
        let mut rules = RuleSet::default();
        let duplicate = rules.lab_rules[0].clone();
        rules.lab_rules.push(duplicate);
        assert!(rules.validate().is_err());
    }

    #[test]
    fn test_comparison_semantics() {
        assert!(Comparison::Ge.holds(140.0, 140.0));
        assert!(!Comparison::Gt.holds(100.0, 100.0));
        assert!(Comparison::Lt.holds(59.0, 60.0));
        assert!(Comparison::Le.holds(60.0, 60.0));
    }
}
