//! 分析编排器
//!
//! 协调文档存储、文本提取、实体识别、术语标准化和规则引擎，
//! 每个阶段可单独调用，也可通过 [`AnalysisOrchestrator::run_complete`] 一次完成。
//! 所有变更文档的阶段都需先取得文档锁。

use crate::{
    knowledge::{ClinicalKnowledge, KnowledgeInfo, KnowledgeSources},
    locks::DocumentLocks,
    patients::{OpenPatientDirectory, PatientDirectory},
    review::{ReviewEvent, ReviewStateMachine},
    summary::PatientSummary,
};
use cdss_admin::{PipelineConfig, PipelineMetrics};
use cdss_core::{
    utils::sha256_hex, CdssError, Document, MedicalEntity, OntologyFamily, OntologyMapping,
    Recommendation, Result,
};
use cdss_database::ClinicalStore;
use cdss_nlp::{TerminologyService, TextExtractor};
use cdss_storage::{document_path, DocumentStorage};
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

const STAGE_OCR: &str = "ocr";
const STAGE_EXTRACTION: &str = "extraction";
const STAGE_NORMALIZATION: &str = "normalization";
const STAGE_RULES: &str = "rules";

/// 与数据库列宽一致的字段上限（按字符计）
const MAX_FILE_NAME_CHARS: usize = 255;
const MAX_DOCUMENT_TYPE_CHARS: usize = 64;
const MAX_REVIEWER_CHARS: usize = 128;

/// 流水线运行参数
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub ocr_timeout: Duration,
    pub terminology_timeout: Duration,
    /// 相同指纹的重复运行直接返回上一批推荐
    pub deduplicate_reruns: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for PipelineSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            ocr_timeout: config.ocr_timeout(),
            terminology_timeout: config.terminology_timeout(),
            deduplicate_reruns: config.deduplicate_reruns,
        }
    }
}

/// 规则阶段的可选输入
#[derive(Debug, Clone, Default)]
pub struct RuleRunOptions {
    pub context: Option<String>,
    pub encounter_id: Option<Uuid>,
}

/// 单个实体的术语映射结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMapping {
    pub entity_id: Uuid,
    pub text: String,
    pub family: OntologyFamily,
    #[serde(flatten)]
    pub mapping: OntologyMapping,
}

/// 一次规则评估的结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleRun {
    pub run_id: Uuid,
    pub run_fingerprint: String,
    pub recommendations: Vec<Recommendation>,
    /// 是否直接复用了相同指纹的上一批推荐
    pub reused: bool,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Skipped,
}

/// 完整分析中单个阶段的执行记录
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTrace {
    pub step: String,
    pub status: StepStatus,
    pub detail: String,
    pub duration_ms: u64,
}

impl StepTrace {
    fn completed(step: &str, detail: String, started: Instant) -> Self {
        Self {
            step: step.to_string(),
            status: StepStatus::Completed,
            detail,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn skipped(step: &str, detail: &str) -> Self {
        Self {
            step: step.to_string(),
            status: StepStatus::Skipped,
            detail: detail.to_string(),
            duration_ms: 0,
        }
    }
}

/// 完整分析结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteAnalysis {
    pub document_id: Uuid,
    pub patient_id: Uuid,
    pub ocr_text: String,
    pub entities_extracted: usize,
    pub entities: Vec<MedicalEntity>,
    pub mappings_created: usize,
    pub mappings: Vec<EntityMapping>,
    pub recommendations_generated: usize,
    pub recommendations: Vec<Recommendation>,
    pub run_id: Option<Uuid>,
    pub run_fingerprint: Option<String>,
    pub reused_prior_run: bool,
    pub steps: Vec<StepTrace>,
}

/// 分析编排器
pub struct AnalysisOrchestrator {
    store: Arc<dyn ClinicalStore>,
    storage: Arc<dyn DocumentStorage>,
    patients: Arc<dyn PatientDirectory>,
    text_extractor: Arc<dyn TextExtractor>,
    knowledge: RwLock<Arc<ClinicalKnowledge>>,
    sources: KnowledgeSources,
    settings: PipelineSettings,
    locks: DocumentLocks,
    review_machine: ReviewStateMachine,
    metrics: PipelineMetrics,
}

impl AnalysisOrchestrator {
    /// 创建新的编排器，患者目录默认接受任意患者
    pub fn new(
        store: Arc<dyn ClinicalStore>,
        storage: Arc<dyn DocumentStorage>,
        text_extractor: Arc<dyn TextExtractor>,
        knowledge: ClinicalKnowledge,
        settings: PipelineSettings,
        metrics: PipelineMetrics,
    ) -> Self {
        info!(
            "Analysis orchestrator using store={} storage={} extractor={}",
            store.name(),
            storage.name(),
            text_extractor.name()
        );

        Self {
            store,
            storage,
            patients: Arc::new(OpenPatientDirectory),
            text_extractor,
            knowledge: RwLock::new(Arc::new(knowledge)),
            sources: KnowledgeSources::default(),
            settings,
            locks: DocumentLocks::new(),
            review_machine: ReviewStateMachine::new(),
            metrics,
        }
    }

    pub fn with_patient_directory(mut self, patients: Arc<dyn PatientDirectory>) -> Self {
        self.patients = patients;
        self
    }

    /// 设置热加载时读取的知识库与规则文件
    pub fn with_knowledge_sources(mut self, sources: KnowledgeSources) -> Self {
        self.sources = sources;
        self
    }

    pub fn locks(&self) -> &DocumentLocks {
        &self.locks
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// 上传文档：保存原始内容并登记文档记录
    pub async fn upload_document(
        &self,
        patient_id: Uuid,
        file_name: &str,
        document_type: &str,
        content: &[u8],
    ) -> Result<Document> {
        if content.is_empty() {
            return Err(CdssError::Validation("上传的文件为空".to_string()));
        }
        if document_type.trim().is_empty() {
            return Err(CdssError::Validation("documentType 不能为空".to_string()));
        }
        check_length("fileName", file_name, MAX_FILE_NAME_CHARS)?;
        check_length("documentType", document_type.trim(), MAX_DOCUMENT_TYPE_CHARS)?;
        self.patients.ensure_exists(patient_id).await?;

        let mut document = Document::new(
            patient_id,
            file_name.to_string(),
            String::new(),
            document_type.trim().to_string(),
            sha256_hex(content),
            content.len() as i64,
        );
        document.storage_path = document_path(patient_id, document.id, file_name);

        self.storage.store(&document.storage_path, content).await?;
        if let Err(e) = self.store.insert_document(&document).await {
            if let Err(cleanup) = self.storage.delete(&document.storage_path).await {
                warn!("Failed to remove orphaned upload {}: {}", document.storage_path, cleanup);
            }
            return Err(e);
        }

        info!(
            "Uploaded document {} for patient {} ({} bytes)",
            document.id, patient_id, document.size_bytes
        );
        Ok(document)
    }

    pub async fn get_document(&self, document_id: Uuid) -> Result<Document> {
        self.store
            .get_document(document_id)
            .await?
            .ok_or_else(|| CdssError::NotFound(format!("文档 {}", document_id)))
    }

    /// 文本提取阶段
    pub async fn run_ocr(&self, document_id: Uuid) -> Result<Document> {
        let _guard = self.locks.try_acquire(document_id)?;
        let mut document = self.get_document(document_id).await?;
        self.staged(STAGE_OCR, self.ocr_stage(&mut document)).await?;
        Ok(document)
    }

    /// 实体识别阶段，替换文档已有的实体
    pub async fn run_extraction(&self, document_id: Uuid) -> Result<Vec<MedicalEntity>> {
        let _guard = self.locks.try_acquire(document_id)?;
        let document = self.get_document(document_id).await?;
        let knowledge = self.snapshot().await;
        self.staged(STAGE_EXTRACTION, self.extraction_stage(&knowledge, &document))
            .await
    }

    /// 术语标准化阶段
    pub async fn run_normalization(&self, document_id: Uuid) -> Result<Vec<EntityMapping>> {
        let _guard = self.locks.try_acquire(document_id)?;
        let document = self.get_document(document_id).await?;
        let mut entities = self.require_entities(&document).await?;
        let knowledge = self.snapshot().await;
        self.staged(
            STAGE_NORMALIZATION,
            self.normalization_stage(&knowledge, &mut entities),
        )
        .await
    }

    /// 规则评估阶段，推荐追加保存
    pub async fn run_rules(&self, document_id: Uuid, options: RuleRunOptions) -> Result<RuleRun> {
        let _guard = self.locks.try_acquire(document_id)?;
        let document = self.get_document(document_id).await?;
        let entities = self.require_entities(&document).await?;
        let knowledge = self.snapshot().await;
        self.staged(
            STAGE_RULES,
            self.rules_stage(&knowledge, &document, &entities, &options),
        )
        .await
    }

    /// 依次执行全部阶段，已有文本时跳过文本提取，没有实体时跳过后续阶段
    pub async fn run_complete(
        &self,
        document_id: Uuid,
        options: RuleRunOptions,
    ) -> Result<CompleteAnalysis> {
        let _guard = self.locks.try_acquire(document_id)?;
        let mut document = self.get_document(document_id).await?;
        let knowledge = self.snapshot().await;
        let mut steps = Vec::with_capacity(4);

        if document.has_text() {
            steps.push(StepTrace::skipped(STAGE_OCR, "text already extracted"));
        } else {
            let started = Instant::now();
            let text = self.staged(STAGE_OCR, self.ocr_stage(&mut document)).await?;
            steps.push(StepTrace::completed(
                STAGE_OCR,
                format!("{} characters extracted", text.chars().count()),
                started,
            ));
        }

        let started = Instant::now();
        let mut entities = self
            .staged(STAGE_EXTRACTION, self.extraction_stage(&knowledge, &document))
            .await?;
        steps.push(StepTrace::completed(
            STAGE_EXTRACTION,
            format!("{} entities extracted", entities.len()),
            started,
        ));

        let mut mappings = Vec::new();
        let mut run = None;
        if entities.is_empty() {
            steps.push(StepTrace::skipped(STAGE_NORMALIZATION, "no entities"));
            steps.push(StepTrace::skipped(STAGE_RULES, "no entities"));
        } else {
            let started = Instant::now();
            mappings = self
                .staged(
                    STAGE_NORMALIZATION,
                    self.normalization_stage(&knowledge, &mut entities),
                )
                .await?;
            steps.push(StepTrace::completed(
                STAGE_NORMALIZATION,
                format!("{} mappings created", mappings.len()),
                started,
            ));

            let started = Instant::now();
            let rule_run = self
                .staged(
                    STAGE_RULES,
                    self.rules_stage(&knowledge, &document, &entities, &options),
                )
                .await?;
            let detail = if rule_run.reused {
                format!("reused {} recommendations from prior run", rule_run.recommendations.len())
            } else {
                format!("{} recommendations generated", rule_run.recommendations.len())
            };
            steps.push(StepTrace::completed(STAGE_RULES, detail, started));
            run = Some(rule_run);
        }

        info!(
            "Complete analysis of document {} finished: {} entities, {} mappings",
            document.id,
            entities.len(),
            mappings.len()
        );

        let (run_id, run_fingerprint, recommendations, reused_prior_run) = match run {
            Some(run) => (Some(run.run_id), Some(run.run_fingerprint), run.recommendations, run.reused),
            None => (None, None, Vec::new(), false),
        };

        Ok(CompleteAnalysis {
            document_id: document.id,
            patient_id: document.patient_id,
            ocr_text: document.ocr_text.unwrap_or_default(),
            entities_extracted: entities.len(),
            entities,
            mappings_created: mappings.len(),
            mappings,
            recommendations_generated: recommendations.len(),
            recommendations,
            run_id,
            run_fingerprint,
            reused_prior_run,
            steps,
        })
    }

    pub async fn get_recommendation(&self, recommendation_id: Uuid) -> Result<Recommendation> {
        self.store
            .get_recommendation(recommendation_id)
            .await?
            .ok_or_else(|| CdssError::NotFound(format!("推荐 {}", recommendation_id)))
    }

    /// 审核推荐，已审核的推荐不可再次审核
    pub async fn review(
        &self,
        recommendation_id: Uuid,
        reviewer: &str,
        accepted: bool,
        notes: Option<String>,
    ) -> Result<Recommendation> {
        if reviewer.trim().is_empty() {
            return Err(CdssError::Unauthorized("缺少审核人身份".to_string()));
        }
        check_length("reviewer", reviewer.trim(), MAX_REVIEWER_CHARS)?;

        let mut recommendation = self.get_recommendation(recommendation_id).await?;
        let event = ReviewEvent::from_decision(accepted);
        let from = recommendation.review_state;
        recommendation.review_state = self.review_machine.transition(from, event)?;
        recommendation.reviewed_by = Some(reviewer.trim().to_string());
        recommendation.reviewed_at = Some(Utc::now());
        recommendation.review_notes = notes;

        // 并发审核时只有一个写入能成功
        if !self.store.save_review(&recommendation).await? {
            return Err(CdssError::InvalidStateTransition {
                from: from.as_str().to_string(),
                event: event.decision().to_string(),
            });
        }

        self.metrics.record_review(event.decision());
        info!(
            "Recommendation {} {} by {}",
            recommendation.id,
            event.decision(),
            reviewer
        );
        Ok(recommendation)
    }

    /// 患者级汇总
    pub async fn patient_summary(&self, patient_id: Uuid) -> Result<PatientSummary> {
        self.patients.ensure_exists(patient_id).await?;

        let documents = self.store.list_patient_documents(patient_id).await?;
        let mut entities = Vec::new();
        for document in &documents {
            entities.extend(self.store.list_entities(document.id).await?);
        }
        let recommendations = self.store.list_patient_recommendations(patient_id).await?;

        Ok(PatientSummary::build(patient_id, &documents, &entities, recommendations))
    }

    /// 对任意术语做标准化，`family` 为 symptom / diagnosis / procedure
    pub async fn normalize_term(&self, text: &str, family: &str) -> Result<OntologyMapping> {
        let family: OntologyFamily = family.parse()?;
        let knowledge = self.snapshot().await;
        self.lookup(knowledge.terminology(), text, family).await
    }

    /// 从配置的文件重新加载知识库与规则集，失败时保留当前快照
    pub async fn reload_knowledge(&self) -> Result<KnowledgeInfo> {
        let loaded = ClinicalKnowledge::load(&self.sources).map_err(|e| {
            warn!("Knowledge reload failed, keeping current snapshot: {}", e);
            e
        })?;
        let info = loaded.info();

        *self.knowledge.write().await = Arc::new(loaded);
        info!(
            "Reloaded knowledge {} with rule set {} ({} rules)",
            info.knowledge_version, info.rules_version, info.rule_count
        );
        Ok(info)
    }

    pub async fn knowledge_info(&self) -> KnowledgeInfo {
        self.snapshot().await.info()
    }

    async fn snapshot(&self) -> Arc<ClinicalKnowledge> {
        Arc::clone(&*self.knowledge.read().await)
    }

    async fn require_entities(&self, document: &Document) -> Result<Vec<MedicalEntity>> {
        let entities = self.store.list_entities(document.id).await?;
        if entities.is_empty() {
            return Err(CdssError::Validation(format!(
                "文档 {} 尚未识别出实体，请先执行实体识别",
                document.id
            )));
        }
        Ok(entities)
    }

    /// 执行一个阶段并记录耗时与结果
    async fn staged<T, F>(&self, stage: &str, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = work.await.map_err(|e| e.in_stage(stage));
        let outcome = match &result {
            Ok(_) => "completed",
            Err(e) => {
                warn!("Stage {} failed: {}", stage, e);
                "failed"
            }
        };
        self.metrics.record_stage(stage, outcome, started.elapsed());
        result
    }

    async fn ocr_stage(&self, document: &mut Document) -> Result<String> {
        let content = self.storage.read(&document.storage_path).await?;
        let extraction = self.text_extractor.extract_text(document, &content);
        let text = match tokio::time::timeout(self.settings.ocr_timeout, extraction).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(CdssError::Upstream {
                    service: self.text_extractor.name().to_string(),
                    message: format!("文本提取超时 ({:?})", self.settings.ocr_timeout),
                })
            }
        };

        document.record_text(text.clone());
        self.store.update_document(document).await?;
        debug!("Stored {} characters of text for document {}", text.len(), document.id);
        Ok(text)
    }

    async fn extraction_stage(
        &self,
        knowledge: &ClinicalKnowledge,
        document: &Document,
    ) -> Result<Vec<MedicalEntity>> {
        let text = document.ocr_text.as_deref().ok_or_else(|| {
            CdssError::Validation(format!("文档 {} 尚无文本，请先执行OCR", document.id))
        })?;

        let entities = knowledge.extractor().extract(document.id, text);
        self.store.replace_entities(document.id, &entities).await?;
        debug!("Extracted {} entities from document {}", entities.len(), document.id);
        Ok(entities)
    }

    async fn normalization_stage(
        &self,
        knowledge: &ClinicalKnowledge,
        entities: &mut [MedicalEntity],
    ) -> Result<Vec<EntityMapping>> {
        let mut mappings = Vec::new();
        for entity in entities.iter_mut() {
            let Some(family) = entity.entity_type.ontology_family() else {
                continue;
            };
            let mapping = self.lookup(knowledge.terminology(), &entity.text, family).await?;
            entity.apply_mapping(&mapping);
            mappings.push(EntityMapping {
                entity_id: entity.id,
                text: entity.text.clone(),
                family,
                mapping,
            });
        }

        self.store.update_entities(entities).await?;
        Ok(mappings)
    }

    async fn rules_stage(
        &self,
        knowledge: &ClinicalKnowledge,
        document: &Document,
        entities: &[MedicalEntity],
        options: &RuleRunOptions,
    ) -> Result<RuleRun> {
        let engine = knowledge.engine();
        let context = options.context.as_deref();
        let fingerprint = run_fingerprint(document.id, engine.version(), context, entities);

        if self.settings.deduplicate_reruns {
            let prior = self
                .store
                .find_run_by_fingerprint(document.id, &fingerprint)
                .await?;
            if !prior.is_empty() {
                info!(
                    "Rule run for document {} matches a prior run, reusing {} recommendations",
                    document.id,
                    prior.len()
                );
                return Ok(RuleRun {
                    run_id: prior.iter().find_map(|r| r.run_id).unwrap_or_else(Uuid::new_v4),
                    run_fingerprint: fingerprint,
                    recommendations: prior,
                    reused: true,
                });
            }
        }

        let run_id = Uuid::new_v4();
        let mut recommendations = engine.evaluate(document.patient_id, entities, context);
        for recommendation in &mut recommendations {
            recommendation.document_id = Some(document.id);
            recommendation.encounter_id = options.encounter_id;
            recommendation.run_id = Some(run_id);
            recommendation.run_fingerprint = Some(fingerprint.clone());
        }

        self.store.append_recommendations(&recommendations).await?;
        for recommendation in &recommendations {
            self.metrics.record_recommendation(recommendation.severity.as_str());
        }

        info!(
            "Rule run {} for document {} generated {} recommendations",
            run_id,
            document.id,
            recommendations.len()
        );
        Ok(RuleRun {
            run_id,
            run_fingerprint: fingerprint,
            recommendations,
            reused: false,
        })
    }

    async fn lookup(
        &self,
        terminology: &Arc<dyn TerminologyService>,
        text: &str,
        family: OntologyFamily,
    ) -> Result<OntologyMapping> {
        let timeout = self.settings.terminology_timeout;
        match tokio::time::timeout(timeout, terminology.lookup_code(text, family)).await {
            Ok(result) => result,
            Err(_) => Err(CdssError::Upstream {
                service: terminology.name().to_string(),
                message: format!("术语查询超时 ({:?})", timeout),
            }),
        }
    }
}

fn check_length(field: &str, value: &str, max: usize) -> Result<()> {
    if value.chars().count() > max {
        return Err(CdssError::Validation(format!("{} 超过 {} 个字符", field, max)));
    }
    Ok(())
}

/// 运行指纹：文档、规则集版本、附加上下文与实体内容的SHA-256
fn run_fingerprint(
    document_id: Uuid,
    rules_version: &str,
    context: Option<&str>,
    entities: &[MedicalEntity],
) -> String {
    let mut lines: Vec<String> = entities
        .iter()
        .map(|e| {
            let metadata: Vec<String> = e.metadata.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            format!("{}|{}|{}", e.entity_type, e.text, metadata.join(";"))
        })
        .collect();
    lines.sort();

    let payload = format!(
        "{}\n{}\n{}\n{}",
        document_id,
        rules_version,
        context.unwrap_or_default().trim(),
        lines.join("\n")
    );
    sha256_hex(payload.as_bytes())
}
