//! Web服务器

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use anyhow::Context;
use cdss_admin::ServerConfig;
use cdss_workflow::AnalysisOrchestrator;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::handlers::{
    api_root, complete_analysis, extract_entities, generate_recommendations, get_recommendation,
    health, metrics, normalize_entities, normalize_term, patient_summary, reload_knowledge,
    review_recommendation, run_ocr, upload_document,
};

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(
        addr: SocketAddr,
        orchestrator: Arc<AnalysisOrchestrator>,
        config: &ServerConfig,
        max_upload_bytes: usize,
    ) -> Self {
        let app = create_app(orchestrator, config, max_upload_bytes);
        Self { addr, app }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!("Starting web server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.addr))?;
        axum::serve(listener, self.app)
            .await
            .context("Web server terminated unexpectedly")?;

        Ok(())
    }
}

/// 构建路由与全局中间件
pub fn create_app(
    orchestrator: Arc<AnalysisOrchestrator>,
    config: &ServerConfig,
    max_upload_bytes: usize,
) -> Router {
    Router::new()
        // 根路径
        .route("/", get(api_root))

        // 健康检查与指标
        .route("/health", get(health))
        .route("/metrics", get(metrics))

        // 文档分析流水线
        .merge(document_routes())

        // 推荐与审核
        .route("/recommendations/:id", get(get_recommendation))
        .route("/recommendations/:id/review", post(review_recommendation))

        .route("/patients/:id/ai-summary", get(patient_summary))
        .route("/ontology/normalize", post(normalize_term))
        .route("/admin/knowledge/reload", post(reload_knowledge))
        .with_state(orchestrator)

        // 全局中间件
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(config.request_timeout()))
                .layer(cors_layer(&config.cors_allowed_origins)),
        )
}

/// 文档路由
fn document_routes() -> Router<Arc<AnalysisOrchestrator>> {
    Router::new()
        .route("/documents", post(upload_document))
        .route("/documents/:id/ocr", post(run_ocr))
        .route("/documents/:id/entities", post(extract_entities))
        .route("/documents/:id/ontology", post(normalize_entities))
        .route("/documents/:id/recommendations", post(generate_recommendations))
        .route("/documents/:id/complete-analysis", post(complete_analysis))
}

/// 未配置允许源时接受任意源
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        response::Response,
    };
    use cdss_admin::PipelineMetrics;
    use cdss_database::MemoryStore;
    use cdss_nlp::PlainTextExtractor;
    use cdss_storage::MemoryDocumentStorage;
    use cdss_workflow::{ClinicalKnowledge, PipelineSettings, RuleRunOptions};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    const BOUNDARY: &str = "cdss-test-boundary";

    fn test_app() -> (Router, Arc<AnalysisOrchestrator>) {
        let orchestrator = Arc::new(AnalysisOrchestrator::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryDocumentStorage::new()),
            Arc::new(PlainTextExtractor),
            ClinicalKnowledge::builtin().unwrap(),
            PipelineSettings::default(),
            PipelineMetrics::new().unwrap(),
        ));
        let app = create_app(orchestrator.clone(), &ServerConfig::default(), 1024 * 1024);
        (app, orchestrator)
    }

    fn multipart_request(parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, file_name, data) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match file_name {
                Some(file_name) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: text/plain\r\n\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                ),
            }
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method("POST")
            .uri("/documents")
            .header("content-type", format!("multipart/form-data; boundary={}", BOUNDARY))
            .body(Body::from(body))
            .unwrap()
    }

    fn json_request(uri: &str, body: Value, reviewer: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(reviewer) = reviewer {
            builder = builder.header("x-user-id", reviewer);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn empty_post(uri: &str) -> Request<Body> {
        Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn upload(orchestrator: &AnalysisOrchestrator, text: &str) -> (Uuid, Uuid) {
        let patient = Uuid::new_v4();
        let document = orchestrator
            .upload_document(patient, "note.txt", "clinical_note", text.as_bytes())
            .await
            .unwrap();
        (patient, document.id)
    }

    #[tokio::test]
    async fn test_health_and_root() {
        let (app, _) = test_app();

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["knowledge"]["rulesVersion"], "builtin-1");

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_upload_and_complete_analysis() {
        let (app, _) = test_app();
        let patient = Uuid::new_v4().to_string();

        let request = multipart_request(&[
            ("patientId", None, patient.as_bytes()),
            ("documentType", None, b"clinical_note"),
            ("file", Some("bp.txt"), b"Blood Pressure: 180/120 mmHg"),
        ]);
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["fileName"], "bp.txt");
        let document_id = body["documentId"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(empty_post(&format!("/documents/{}/complete-analysis", document_id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["recommendationsGenerated"], 1);
        assert_eq!(body["recommendations"][0]["severity"], "Urgent");
        assert_eq!(body["steps"][0]["step"], "ocr");
        assert_eq!(body["steps"][0]["status"], "completed");

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/patients/{}/ai-summary", patient))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["documentCount"], 1);
        assert_eq!(body["recommendationsBySeverity"]["Urgent"], 1);
    }

    #[tokio::test]
    async fn test_upload_without_file_rejected() {
        let (app, _) = test_app();
        let patient = Uuid::new_v4().to_string();

        let request = multipart_request(&[("patientId", None, patient.as_bytes())]);
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let request = multipart_request(&[
            ("patientId", None, patient.as_bytes()),
            ("file", Some("empty.txt"), b""),
        ]);
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stage_errors_map_to_status_codes() {
        let (app, orchestrator) = test_app();
        let (_, document_id) = upload(&orchestrator, "Patient reports fever.").await;

        let response = app
            .clone()
            .oneshot(empty_post(&format!("/documents/{}/ocr", Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(empty_post(&format!("/documents/{}/entities", document_id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(empty_post(&format!("/documents/{}/ocr", document_id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["ocrText"], "Patient reports fever.");

        // 文档被锁定时并发请求返回409
        let guard = orchestrator.locks().try_acquire(document_id).unwrap();
        let response = app
            .clone()
            .oneshot(empty_post(&format!("/documents/{}/entities", document_id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        drop(guard);

        let response = app
            .oneshot(json_request(
                &format!("/documents/{}/recommendations", document_id),
                json!({"additionalContext": "x", "unexpected": true}),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_review_flow() {
        let (app, orchestrator) = test_app();
        let (_, document_id) = upload(&orchestrator, "Temperature: 39.2 C").await;
        let analysis = orchestrator
            .run_complete(document_id, RuleRunOptions::default())
            .await
            .unwrap();
        let id = analysis.recommendations[0].id;
        let uri = format!("/recommendations/{}/review", id);

        let response = app
            .clone()
            .oneshot(json_request(&uri, json!({"accepted": true}), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(json_request(&uri, json!({"accepted": "yes"}), Some("dr.chen")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(json_request(
                &uri,
                json!({"accepted": true, "notes": "start antipyretics"}),
                Some("dr.chen"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["reviewState"], "Accepted");
        assert_eq!(body["reviewedBy"], "dr.chen");

        let response = app
            .clone()
            .oneshot(json_request(&uri, json!({"accepted": false}), Some("dr.li")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/recommendations/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await["reviewState"], "Accepted");

        let response = app
            .oneshot(json_request(
                &format!("/recommendations/{}/review", Uuid::new_v4()),
                json!({"accepted": true}),
                Some("dr.chen"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reject_flow() {
        let (app, orchestrator) = test_app();
        let (_, document_id) = upload(&orchestrator, "Temperature: 39.2 C").await;
        let analysis = orchestrator
            .run_complete(document_id, RuleRunOptions::default())
            .await
            .unwrap();
        let id = analysis.recommendations[0].id;
        let uri = format!("/recommendations/{}/review", id);

        let long_reviewer = "r".repeat(200);
        let response = app
            .clone()
            .oneshot(json_request(&uri, json!({"accepted": false}), Some(&long_reviewer)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(json_request(
                &uri,
                json!({"accepted": false, "notes": "fever already resolved"}),
                Some("dr.li"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["reviewState"], "Rejected");

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/recommendations/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["reviewState"], "Rejected");
        assert_eq!(body["reviewedBy"], "dr.li");
        assert_eq!(body["reviewNotes"], "fever already resolved");
    }

    #[tokio::test]
    async fn test_normalize_term_endpoint() {
        let (app, _) = test_app();

        let response = app
            .clone()
            .oneshot(json_request(
                "/ontology/normalize",
                json!({"text": "headache", "family": "Symptom"}),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["code"], "25064002");
        assert_eq!(body["system"], "SNOMED CT");
        assert_eq!(body["match"], "Exact");

        let response = app
            .clone()
            .oneshot(json_request(
                "/ontology/normalize",
                json!({"text": "   ", "family": "symptom"}),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["code"], "404684003");
        assert_eq!(body["match"], "Fallback");

        let response = app
            .oneshot(json_request(
                "/ontology/normalize",
                json!({"text": "headache", "family": "Medication"}),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (app, orchestrator) = test_app();
        let (_, document_id) = upload(&orchestrator, "Patient reports cough.").await;
        orchestrator.run_ocr(document_id).await.unwrap();

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("cdss_stage_runs_total{outcome=\"completed\",stage=\"ocr\"} 1"));
    }
}
