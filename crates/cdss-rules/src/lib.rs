//! # CDSS规则模块
//!
//! 临床决策规则以数据记录表示，由一个通用解释器求值：
//! - 生命体征阈值规则：高血压、发热、心动过速、心动过缓
//! - 药物相互作用表：对称检查两两药物组合
//! - 症状组合规则：推测诊断并给出配套治疗建议
//! - 检验值阈值规则：血糖、糖化血红蛋白等
//! - 就诊上下文规则：首诊随访

pub mod engine;
pub mod rules;

// 重新导出主要类型
pub use engine::RuleEngine;
pub use rules::{
    Comparison, Condition, ContextRule, InteractionEntry, Measure, RuleSet, SymptomPatternRule,
    ThresholdRule, ThresholdTier, TreatmentSuggestion, RULE_DRUG_INTERACTION,
};
