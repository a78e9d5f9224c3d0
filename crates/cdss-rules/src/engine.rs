//! 规则引擎
//!
//! 按固定顺序执行五类规则：生命体征、药物相互作用、症状组合、检验值、就诊上下文，
//! 相同输入总是得到相同顺序的推荐。规则引擎本身是纯计算，不做跨运行去重。

use cdss_core::{
    CdssError, EntityType, MedicalEntity, Recommendation, RecommendationType, Result, Severity,
};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::rules::{Condition, Measure, RuleSet, ThresholdRule, RULE_DRUG_INTERACTION};

/// 实体元数据中的数值读数
#[derive(Debug, Clone, Copy, PartialEq)]
enum Reading {
    Single(f64),
    Pair(f64, f64),
}

impl Reading {
    fn parse(entity: &MedicalEntity) -> Result<Self> {
        let raw = entity
            .metadata_value("value")
            .ok_or_else(|| malformed(entity, "缺少 value 元数据".to_string()))?;

        let number = |part: &str| {
            part.trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| malformed(entity, format!("无法解析数值: {}", raw)))
        };

        match raw.split_once('/') {
            Some((first, second)) => Ok(Reading::Pair(number(first)?, number(second)?)),
            None => Ok(Reading::Single(number(raw)?)),
        }
    }

    fn measure(&self, measure: Measure) -> Option<f64> {
        match (self, measure) {
            (Reading::Single(v), Measure::Value) => Some(*v),
            (Reading::Pair(s, _), Measure::Systolic) => Some(*s),
            (Reading::Pair(_, d), Measure::Diastolic) => Some(*d),
            _ => None,
        }
    }
}

fn malformed(entity: &MedicalEntity, message: String) -> CdssError {
    CdssError::MalformedEntityMetadata {
        entity_id: entity.id.to_string(),
        message,
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// 通用规则解释器
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: RuleSet,
}

impl RuleEngine {
    pub fn new(rules: RuleSet) -> Result<Self> {
        rules.validate()?;
        Ok(Self { rules })
    }

    /// 规则集版本，参与运行指纹计算
    pub fn version(&self) -> &str {
        &self.rules.version
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// 评估患者的实体集合
    pub fn evaluate(
        &self,
        patient_id: Uuid,
        entities: &[MedicalEntity],
        context: Option<&str>,
    ) -> Vec<Recommendation> {
        let of_type = |entity_type: EntityType| {
            entities
                .iter()
                .filter(move |e| e.entity_type == entity_type)
                .collect::<Vec<_>>()
        };

        let mut recommendations = Vec::new();
        recommendations.extend(self.evaluate_vital_signs(patient_id, &of_type(EntityType::VitalSign)));
        recommendations.extend(self.evaluate_interactions(patient_id, &of_type(EntityType::Medication)));
        recommendations.extend(self.evaluate_symptom_patterns(patient_id, &of_type(EntityType::Symptom)));
        recommendations.extend(self.evaluate_lab_values(patient_id, &of_type(EntityType::LabValue)));
        recommendations.extend(self.evaluate_context(patient_id, context));

        debug!(
            "Rule set {} produced {} recommendations for patient {}",
            self.rules.version,
            recommendations.len(),
            patient_id
        );
        recommendations
    }

    fn evaluate_vital_signs(&self, patient_id: Uuid, vitals: &[&MedicalEntity]) -> Vec<Recommendation> {
        self.evaluate_thresholds(patient_id, vitals, "type", &self.rules.vital_rules)
    }

    fn evaluate_lab_values(&self, patient_id: Uuid, labs: &[&MedicalEntity]) -> Vec<Recommendation> {
        self.evaluate_thresholds(patient_id, labs, "test", &self.rules.lab_rules)
    }

    /// 阈值规则：按 `subject_key` 元数据选择规则，元数据异常的实体跳过
    fn evaluate_thresholds(
        &self,
        patient_id: Uuid,
        entities: &[&MedicalEntity],
        subject_key: &str,
        rules: &[ThresholdRule],
    ) -> Vec<Recommendation> {
        let mut recommendations = Vec::new();

        for entity in entities {
            let result = entity
                .metadata_value(subject_key)
                .ok_or_else(|| malformed(entity, format!("缺少 {} 元数据", subject_key)))
                .and_then(|subject| Ok((subject, Reading::parse(entity)?)));

            let (subject, reading) = match result {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("Skipping entity {} ({}): {}", entity.id, entity.text, e);
                    continue;
                }
            };

            for rule in rules.iter().filter(|r| r.subject == subject) {
                match apply_threshold(patient_id, rule, entity, reading) {
                    Ok(Some(recommendation)) => {
                        debug!("{} fired on entity {}", rule.id, entity.id);
                        recommendations.push(recommendation);
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Skipping entity {} for {}: {}", entity.id, rule.id, e),
                }
            }
        }

        recommendations
    }

    /// 药物相互作用：两两组合按名称排序，结果与输入顺序无关
    fn evaluate_interactions(&self, patient_id: Uuid, medications: &[&MedicalEntity]) -> Vec<Recommendation> {
        if medications.len() < 2 {
            return Vec::new();
        }

        let names: Vec<String> = medications
            .iter()
            .map(|m| {
                m.metadata_value("name")
                    .unwrap_or(m.normalized_text.as_str())
                    .trim()
                    .to_lowercase()
            })
            .filter(|name| !name.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut recommendations = Vec::new();

        for (i, first) in names.iter().enumerate() {
            for second in &names[i + 1..] {
                let hit = self.rules.interactions.iter().find(|entry| {
                    let keyed = |drug: &str, other: &str| {
                        drug.contains(entry.drug.as_str())
                            && entry.interacts_with.iter().any(|p| other.contains(p.as_str()))
                    };
                    keyed(first.as_str(), second.as_str()) || keyed(second.as_str(), first.as_str())
                });

                if let Some(entry) = hit {
                    debug!("{} fired for {} + {}", entry.id, first, second);
                    recommendations.push(
                        Recommendation::new(
                            patient_id,
                            RecommendationType::Alert,
                            format!(
                                "Potential drug interaction between {} and {}: {}.",
                                first, second, entry.description
                            ),
                            entry.severity,
                            entry.confidence,
                        )
                        .with_evidence(first.as_str())
                        .with_evidence(second.as_str())
                        .with_rule(RULE_DRUG_INTERACTION)
                        .with_rule(entry.id.as_str()),
                    );
                }
            }
        }

        recommendations
    }

    fn evaluate_symptom_patterns(&self, patient_id: Uuid, symptoms: &[&MedicalEntity]) -> Vec<Recommendation> {
        let present: HashSet<String> = symptoms
            .iter()
            .map(|s| s.normalized_text.trim().to_lowercase())
            .collect();

        let mut recommendations = Vec::new();

        for pattern in &self.rules.symptom_patterns {
            let matched = pattern
                .required
                .iter()
                .all(|symptom| present.contains(&symptom.trim().to_lowercase()));
            if !matched {
                continue;
            }

            debug!("{} matched for patient {}", pattern.id, patient_id);

            let mut diagnosis = Recommendation::new(
                patient_id,
                RecommendationType::Diagnosis,
                pattern.diagnosis.as_str(),
                Severity::Normal,
                pattern.confidence,
            )
            .with_rule(pattern.id.as_str());
            diagnosis.evidence = pattern.required.clone();
            recommendations.push(diagnosis);

            if let Some(treatment) = &pattern.treatment {
                let mut suggestion = Recommendation::new(
                    patient_id,
                    RecommendationType::Treatment,
                    treatment.text.as_str(),
                    Severity::Info,
                    treatment.confidence,
                )
                .with_rule(pattern.id.as_str())
                .with_rule(treatment.id.as_str());
                suggestion.evidence = pattern.required.clone();
                recommendations.push(suggestion);
            }
        }

        recommendations
    }

    fn evaluate_context(&self, patient_id: Uuid, context: Option<&str>) -> Vec<Recommendation> {
        let Some(context) = context.map(str::trim).filter(|c| !c.is_empty()) else {
            return Vec::new();
        };
        let lowered = context.to_lowercase();

        self.rules
            .context_rules
            .iter()
            .filter(|rule| lowered.contains(&rule.phrase.to_lowercase()))
            .map(|rule| {
                Recommendation::new(
                    patient_id,
                    rule.recommendation_type,
                    rule.text.as_str(),
                    rule.severity,
                    rule.confidence,
                )
                .with_evidence(format!("context: {}", context))
                .with_rule(rule.id.as_str())
            })
            .collect()
    }
}

/// 选择第一个命中的档位，没有档位命中返回 `None`
fn apply_threshold(
    patient_id: Uuid,
    rule: &ThresholdRule,
    entity: &MedicalEntity,
    reading: Reading,
) -> Result<Option<Recommendation>> {
    for tier in &rule.tiers {
        let mut matched: Vec<&Condition> = Vec::new();
        for condition in &tier.any_of {
            let value = reading.measure(condition.measure).ok_or_else(|| {
                malformed(
                    entity,
                    format!("规则 {} 需要 {} 读数", rule.id, condition.measure.label()),
                )
            })?;
            if condition.op.holds(value, condition.threshold) {
                matched.push(condition);
            }
        }

        if matched.is_empty() {
            continue;
        }

        let raw = entity.metadata_value("value").unwrap_or_default();
        let mut recommendation = Recommendation::new(
            patient_id,
            rule.recommendation_type,
            tier.template.replace("{value}", raw),
            tier.severity,
            rule.confidence,
        )
        .with_evidence(entity.text.as_str())
        .with_rule(rule.id.as_str());

        for condition in matched {
            let value = reading.measure(condition.measure).unwrap_or_default();
            recommendation = recommendation.with_evidence(format!(
                "{} {} {} {}",
                condition.measure.label(),
                format_number(value),
                condition.op.symbol(),
                format_number(condition.threshold)
            ));
        }

        return Ok(Some(recommendation));
    }

    Ok(None)
}
