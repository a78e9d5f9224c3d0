//! HTTP处理器

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Multipart, Path, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Json},
};
use cdss_core::CdssError;
use cdss_workflow::{AnalysisOrchestrator, RuleRunOptions};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// 外部认证层写入的审核人身份请求头
pub const REVIEWER_HEADER: &str = "x-user-id";

type AppState = Arc<AnalysisOrchestrator>;

/// 规则评估与完整分析的请求体，可省略
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AnalysisRequest {
    pub additional_context: Option<String>,
    pub encounter_id: Option<Uuid>,
}

impl From<AnalysisRequest> for RuleRunOptions {
    fn from(request: AnalysisRequest) -> Self {
        RuleRunOptions {
            context: request.additional_context,
            encounter_id: request.encounter_id,
        }
    }
}

/// 审核请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReviewRequest {
    pub accepted: bool,
    pub notes: Option<String>,
}

/// 术语标准化请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NormalizeRequest {
    pub text: String,
    pub family: String,
}

/// API根路径处理器
pub async fn api_root() -> impl IntoResponse {
    Json(json!({
        "service": "Clinical Decision Support API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": {
            "health": "/health",
            "metrics": "/metrics",
            "documents": "/documents",
            "patients": "/patients/{id}/ai-summary",
            "recommendations": "/recommendations/{id}",
            "ontology": "/ontology/normalize"
        }
    }))
}

/// 健康检查处理器
pub async fn health(State(orchestrator): State<AppState>) -> impl IntoResponse {
    let knowledge = orchestrator.knowledge_info().await;
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "knowledge": knowledge
    }))
}

/// Prometheus指标
pub async fn metrics(State(orchestrator): State<AppState>) -> ApiResult<impl IntoResponse> {
    let body = orchestrator.metrics().render().map_err(|e| CdssError::Processing {
        stage: "metrics".to_string(),
        message: e.to_string(),
    })?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

/// 上传文档 (multipart: file, patientId, documentType)
pub async fn upload_document(
    State(orchestrator): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut file: Option<(String, Bytes)> = None;
    let mut patient_id = None;
    let mut document_type = String::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("document").to_string();
                file = Some((file_name, field.bytes().await?));
            }
            "patientId" => {
                let value = field.text().await?;
                patient_id = Some(parse_uuid(value.trim(), "patientId")?);
            }
            "documentType" => document_type = field.text().await?,
            _ => {}
        }
    }

    let (file_name, content) = file
        .filter(|(_, content)| !content.is_empty())
        .ok_or_else(|| CdssError::Validation("缺少上传文件或文件为空".to_string()))?;
    let patient_id =
        patient_id.ok_or_else(|| CdssError::Validation("缺少 patientId".to_string()))?;

    let document = orchestrator
        .upload_document(patient_id, &file_name, &document_type, &content)
        .await?;

    Ok(Json(json!({
        "documentId": document.id,
        "fileName": document.file_name
    })))
}

/// 文本提取
pub async fn run_ocr(
    State(orchestrator): State<AppState>,
    Path(document_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let document = orchestrator.run_ocr(document_id).await?;
    Ok(Json(json!({
        "documentId": document.id,
        "ocrText": document.ocr_text
    })))
}

/// 实体识别
pub async fn extract_entities(
    State(orchestrator): State<AppState>,
    Path(document_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let entities = orchestrator.run_extraction(document_id).await?;
    Ok(Json(json!({
        "documentId": document_id,
        "entitiesExtracted": entities.len(),
        "entities": entities
    })))
}

/// 术语标准化
pub async fn normalize_entities(
    State(orchestrator): State<AppState>,
    Path(document_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let mappings = orchestrator.run_normalization(document_id).await?;
    Ok(Json(json!({
        "documentId": document_id,
        "mappingsCreated": mappings.len(),
        "mappings": mappings
    })))
}

/// 规则评估
pub async fn generate_recommendations(
    State(orchestrator): State<AppState>,
    Path(document_id): Path<Uuid>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request: AnalysisRequest = optional_body(&body)?;
    let document = orchestrator.get_document(document_id).await?;
    let run = orchestrator.run_rules(document_id, request.into()).await?;

    Ok(Json(json!({
        "documentId": document_id,
        "patientId": document.patient_id,
        "recommendationsGenerated": run.recommendations.len(),
        "recommendations": run.recommendations,
        "runId": run.run_id,
        "runFingerprint": run.run_fingerprint,
        "reusedPriorRun": run.reused
    })))
}

/// 完整分析
pub async fn complete_analysis(
    State(orchestrator): State<AppState>,
    Path(document_id): Path<Uuid>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request: AnalysisRequest = optional_body(&body)?;
    let analysis = orchestrator.run_complete(document_id, request.into()).await?;
    Ok(Json(analysis))
}

/// 患者汇总
pub async fn patient_summary(
    State(orchestrator): State<AppState>,
    Path(patient_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(orchestrator.patient_summary(patient_id).await?))
}

pub async fn get_recommendation(
    State(orchestrator): State<AppState>,
    Path(recommendation_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(orchestrator.get_recommendation(recommendation_id).await?))
}

/// 审核推荐
pub async fn review_recommendation(
    State(orchestrator): State<AppState>,
    Path(recommendation_id): Path<Uuid>,
    headers: HeaderMap,
    payload: Result<Json<ReviewRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let reviewer = headers
        .get(REVIEWER_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CdssError::Unauthorized(format!("缺少 {} 请求头", REVIEWER_HEADER)))?
        .to_string();
    let Json(request) = payload?;

    let recommendation = orchestrator
        .review(recommendation_id, &reviewer, request.accepted, request.notes)
        .await?;
    Ok(Json(recommendation))
}

/// 任意术语标准化
pub async fn normalize_term(
    State(orchestrator): State<AppState>,
    payload: Result<Json<NormalizeRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let mapping = orchestrator.normalize_term(&request.text, &request.family).await?;
    Ok(Json(mapping))
}

/// 重新加载知识库与规则集
pub async fn reload_knowledge(State(orchestrator): State<AppState>) -> ApiResult<impl IntoResponse> {
    let knowledge = orchestrator.reload_knowledge().await?;
    info!("Knowledge reloaded via admin endpoint");
    Ok(Json(knowledge))
}

fn parse_uuid(value: &str, field: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| ApiError(CdssError::Validation(format!("{} 不是有效的UUID: {}", field, value))))
}

/// 空请求体按默认值处理
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError(CdssError::Validation(format!("请求体无效: {}", e))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_body() {
        let request: AnalysisRequest = optional_body(&Bytes::new()).unwrap();
        assert!(request.additional_context.is_none());

        let request: AnalysisRequest =
            optional_body(&Bytes::from_static(br#"{"additionalContext":"first visit"}"#)).unwrap();
        assert_eq!(request.additional_context.as_deref(), Some("first visit"));

        let result: ApiResult<AnalysisRequest> =
            optional_body(&Bytes::from_static(br#"{"context":"x"}"#));
        assert!(result.is_err());
    }
}
