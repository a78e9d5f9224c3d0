//! # CDSS工作流模块
//!
//! 将文本提取、实体识别、术语标准化和规则评估组合为可单独调用的阶段
//! 或一次完整的分析流水线，并管理推荐的审核状态。

pub mod knowledge;
pub mod locks;
pub mod orchestrator;
pub mod patients;
pub mod review;
pub mod summary;

// 重新导出主要类型
pub use knowledge::{ClinicalKnowledge, KnowledgeInfo, KnowledgeSources};
pub use locks::{DocumentGuard, DocumentLocks};
pub use orchestrator::{
    AnalysisOrchestrator, CompleteAnalysis, EntityMapping, PipelineSettings, RuleRun,
    RuleRunOptions, StepStatus, StepTrace,
};
pub use patients::{OpenPatientDirectory, PatientDirectory, StaticPatientDirectory};
pub use review::{ReviewEvent, ReviewStateMachine};
pub use summary::PatientSummary;
