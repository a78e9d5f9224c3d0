//! 术语标准化
//!
//! 将实体文本映射为 SNOMED CT（症状）、ICD-10（诊断）或 UMLS（操作）编码。
//! 未命中时返回该术语族固定的低置信度通用编码，并标记为 `Fallback`。

use async_trait::async_trait;
use cdss_core::{utils::normalize_term, MatchKind, OntologyFamily, OntologyMapping, Result};
use std::collections::HashMap;
use std::sync::Arc;

use crate::knowledge::{CodeEntry, OntologyTables};

/// 术语服务接口，网络术语服务器的适配器实现同一接口
#[async_trait]
pub trait TerminologyService: Send + Sync {
    /// 获取服务名称
    fn name(&self) -> &str;

    /// 查询术语编码
    async fn lookup_code(&self, text: &str, family: OntologyFamily) -> Result<OntologyMapping>;
}

/// 基于本地术语表的标准化器
#[derive(Debug, Clone)]
pub struct OntologyNormalizer {
    tables: HashMap<OntologyFamily, HashMap<String, CodeEntry>>,
}

impl OntologyNormalizer {
    pub fn new(tables: &OntologyTables) -> Self {
        let index = |entries: &[CodeEntry]| {
            entries
                .iter()
                .map(|entry| (normalize_term(&entry.term), entry.clone()))
                .collect::<HashMap<_, _>>()
        };

        let mut by_family = HashMap::new();
        by_family.insert(OntologyFamily::Symptom, index(tables.snomed.as_slice()));
        by_family.insert(OntologyFamily::Diagnosis, index(tables.icd10.as_slice()));
        by_family.insert(OntologyFamily::Procedure, index(tables.umls.as_slice()));

        Self { tables: by_family }
    }

    /// 标准化术语，对未知文本永不失败
    pub fn normalize(&self, text: &str, family: OntologyFamily) -> OntologyMapping {
        let key = normalize_term(text);
        let system = family.coding_system();

        match self.tables.get(&family).and_then(|table| table.get(&key)) {
            Some(entry) => OntologyMapping {
                code: entry.code.clone(),
                system,
                description: entry.description.clone(),
                confidence: entry.confidence,
                match_kind: MatchKind::Exact,
            },
            None => Self::fallback(family),
        }
    }

    /// 按名称指定术语族，仅在术语族名称无效时失败
    pub fn normalize_named(&self, text: &str, family: &str) -> Result<OntologyMapping> {
        let family: OntologyFamily = family.parse()?;
        Ok(self.normalize(text, family))
    }

    /// 术语族的通用回退编码
    pub fn fallback(family: OntologyFamily) -> OntologyMapping {
        let (code, description, confidence) = match family {
            OntologyFamily::Symptom => ("404684003", "Clinical finding", 0.55),
            OntologyFamily::Diagnosis => ("R69", "Illness, unspecified", 0.50),
            OntologyFamily::Procedure => ("C0184661", "Procedure", 0.60),
        };

        OntologyMapping {
            code: code.to_string(),
            system: family.coding_system(),
            description: description.to_string(),
            confidence,
            match_kind: MatchKind::Fallback,
        }
    }
}

/// 本地术语服务
#[derive(Debug, Clone)]
pub struct LocalTerminology {
    normalizer: Arc<OntologyNormalizer>,
}

impl LocalTerminology {
    pub fn new(normalizer: Arc<OntologyNormalizer>) -> Self {
        Self { normalizer }
    }
}

#[async_trait]
impl TerminologyService for LocalTerminology {
    fn name(&self) -> &str {
        "local"
    }

    async fn lookup_code(&self, text: &str, family: OntologyFamily) -> Result<OntologyMapping> {
        Ok(self.normalizer.normalize(text, family))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdss_core::{CdssError, CodingSystem};

    fn normalizer() -> OntologyNormalizer {
        OntologyNormalizer::new(&OntologyTables::default())
    }

    #[test]
    fn test_headache_maps_to_snomed() {
        let mapping = normalizer().normalize("headache", OntologyFamily::Symptom);
        assert_eq!(mapping.code, "25064002");
        assert_eq!(mapping.system, CodingSystem::SnomedCt);
        assert_eq!(mapping.confidence, 0.95);
        assert_eq!(mapping.match_kind, MatchKind::Exact);
    }

    #[test]
    fn test_lookup_is_case_insensitive_and_trimmed() {
        let mapping = normalizer().normalize("  Hypertension ", OntologyFamily::Diagnosis);
        assert_eq!(mapping.code, "I10");
        assert_eq!(mapping.system, CodingSystem::Icd10);
    }

    #[test]
    fn test_unknown_term_uses_fallback() {
        let n = normalizer();
        for family in [OntologyFamily::Symptom, OntologyFamily::Diagnosis, OntologyFamily::Procedure] {
            let mapping = n.normalize("unknown-term-xyz", family);
            assert!(mapping.is_fallback());
            assert!((0.5..=0.6).contains(&mapping.confidence));
            assert_eq!(mapping.system, family.coding_system());
        }
        assert_eq!(n.normalize("unknown-term-xyz", OntologyFamily::Symptom).code, "404684003");
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let n = normalizer();
        let first = serde_json::to_string(&n.normalize("unknown-term-xyz", OntologyFamily::Symptom)).unwrap();
        let second = serde_json::to_string(&n.normalize("unknown-term-xyz", OntologyFamily::Symptom)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_family_lookup_is_scoped() {
        // 诊断表中的术语不会在症状表中命中
        let mapping = normalizer().normalize("hypertension", OntologyFamily::Symptom);
        assert!(mapping.is_fallback());
    }

    #[test]
    fn test_invalid_family_name() {
        let result = normalizer().normalize_named("headache", "Medication");
        assert!(matches!(result, Err(CdssError::Validation(_))));

        let mapping = normalizer().normalize_named("colonoscopy", "Procedure").unwrap();
        assert_eq!(mapping.system, CodingSystem::Umls);
    }

    #[tokio::test]
    async fn test_local_terminology_service() {
        let service = LocalTerminology::new(Arc::new(normalizer()));
        let mapping = service.lookup_code("fever", OntologyFamily::Symptom).await.unwrap();
        assert_eq!(mapping.code, "386661006");
        assert_eq!(service.name(), "local");
    }
}
