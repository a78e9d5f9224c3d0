//! # CDSS文本处理模块
//!
//! 提供临床文档的文本处理能力，包括：
//! - 文本提取：将上传的文档内容转换为纯文本（可替换为真实OCR）
//! - 知识库：症状、诊断、药物、检验项目与术语表，启动时加载后注入
//! - 实体识别：基于词典与正则的医学实体抽取
//! - 术语标准化：映射到 SNOMED CT / ICD-10 / UMLS 编码

pub mod extractor;
pub mod knowledge;
pub mod ontology;
pub mod text;

// 重新导出主要类型
pub use extractor::EntityExtractor;
pub use knowledge::{CodeEntry, KnowledgeBase, LabPattern, OntologyTables, TermEntry};
pub use ontology::{LocalTerminology, OntologyNormalizer, TerminologyService};
pub use text::{FixtureTextExtractor, PlainTextExtractor, TextExtractor};
