//! 临床知识快照
//!
//! 知识库、实体识别器、术语服务和规则引擎作为一个不可变快照整体替换，
//! 正在运行的阶段始终使用开始时取得的快照。

use cdss_admin::PipelineConfig;
use cdss_core::Result;
use cdss_nlp::{EntityExtractor, KnowledgeBase, LocalTerminology, OntologyNormalizer, TerminologyService};
use cdss_rules::{RuleEngine, RuleSet};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// 知识库与规则文件位置，为空时使用内置数据
#[derive(Debug, Clone, Default)]
pub struct KnowledgeSources {
    pub knowledge_file: Option<PathBuf>,
    pub rules_file: Option<PathBuf>,
}

impl From<&PipelineConfig> for KnowledgeSources {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            knowledge_file: config.knowledge_file.as_ref().map(PathBuf::from),
            rules_file: config.rules_file.as_ref().map(PathBuf::from),
        }
    }
}

/// 当前加载的知识版本
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeInfo {
    pub knowledge_version: String,
    pub rules_version: String,
    pub rule_count: usize,
    pub terminology: String,
}

/// 不可变的临床知识快照
pub struct ClinicalKnowledge {
    extractor: EntityExtractor,
    terminology: Arc<dyn TerminologyService>,
    engine: RuleEngine,
    knowledge_version: String,
}

impl ClinicalKnowledge {
    /// 由知识库和规则集构建，术语服务使用本地术语表
    pub fn new(knowledge: KnowledgeBase, rules: RuleSet) -> Result<Self> {
        let extractor = EntityExtractor::new(&knowledge)?;
        let normalizer = Arc::new(OntologyNormalizer::new(&knowledge.ontology));
        let engine = RuleEngine::new(rules)?;

        Ok(Self {
            extractor,
            terminology: Arc::new(LocalTerminology::new(normalizer)),
            engine,
            knowledge_version: knowledge.version,
        })
    }

    /// 内置知识库与规则集
    pub fn builtin() -> Result<Self> {
        Self::new(KnowledgeBase::default(), RuleSet::default())
    }

    /// 从配置的文件加载
    pub fn load(sources: &KnowledgeSources) -> Result<Self> {
        let knowledge = match &sources.knowledge_file {
            Some(path) => KnowledgeBase::from_file(path)?,
            None => KnowledgeBase::default(),
        };
        let rules = match &sources.rules_file {
            Some(path) => RuleSet::from_file(path)?,
            None => RuleSet::default(),
        };
        Self::new(knowledge, rules)
    }

    /// 替换术语服务（例如网络术语服务器适配器）
    pub fn with_terminology(mut self, terminology: Arc<dyn TerminologyService>) -> Self {
        self.terminology = terminology;
        self
    }

    pub fn extractor(&self) -> &EntityExtractor {
        &self.extractor
    }

    pub fn terminology(&self) -> &Arc<dyn TerminologyService> {
        &self.terminology
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    pub fn info(&self) -> KnowledgeInfo {
        KnowledgeInfo {
            knowledge_version: self.knowledge_version.clone(),
            rules_version: self.engine.version().to_string(),
            rule_count: self.engine.rules().rule_count(),
            terminology: self.terminology.name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_snapshot() {
        let knowledge = ClinicalKnowledge::builtin().unwrap();
        let info = knowledge.info();
        assert_eq!(info.knowledge_version, "builtin-1");
        assert_eq!(info.rules_version, "builtin-1");
        assert_eq!(info.terminology, "local");
        assert!(info.rule_count > 0);
    }

    #[test]
    fn test_missing_rules_file_fails() {
        let sources = KnowledgeSources {
            knowledge_file: None,
            rules_file: Some(PathBuf::from("/nonexistent/cdss-rules.toml")),
        };
        assert!(ClinicalKnowledge::load(&sources).is_err());
    }
}
