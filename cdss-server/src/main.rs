//! 临床决策支持服务器主程序

use anyhow::{Context, Result};
use cdss_admin::{
    init_tracing, CdssConfig, ConfigManager, ConfigValidator, DatabaseBackend, OcrBackend,
    PipelineMetrics,
};
use cdss_database::{ClinicalStore, DatabasePool, MemoryStore, PgStore};
use cdss_nlp::{FixtureTextExtractor, PlainTextExtractor, TextExtractor};
use cdss_storage::LocalDocumentStorage;
use cdss_workflow::{AnalysisOrchestrator, ClinicalKnowledge, KnowledgeSources, PipelineSettings};
use cdss_web::WebServer;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// 服务器命令行参数，优先于配置文件与环境变量
#[derive(Parser, Debug)]
#[command(name = "cdss-server")]
#[command(about = "临床文档分析与决策支持服务器")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 监听主机
    #[arg(long)]
    host: Option<String>,

    /// 服务器端口
    #[arg(short, long)]
    port: Option<u16>,

    /// 日志级别
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let manager = ConfigManager::new(args.config.as_deref())?;
    let mut config = manager.get_config().await;
    apply_overrides(&mut config, &args);
    ConfigValidator::new().validate(&config)?;

    init_tracing(&config.logging)?;
    info!("启动临床决策支持服务器...");

    let store = build_store(&config).await?;
    let storage = Arc::new(LocalDocumentStorage::new(&config.storage.root_path));
    let text_extractor = build_text_extractor(&config)?;

    let sources = KnowledgeSources::from(&config.pipeline);
    let knowledge = ClinicalKnowledge::load(&sources).context("Failed to load clinical knowledge")?;
    let info = knowledge.info();
    info!("服务器配置:");
    info!("  数据库后端: {}", store.name());
    info!("  文档目录: {}", config.storage.root_path);
    info!("  文本提取: {}", text_extractor.name());
    info!("  知识库版本: {}", info.knowledge_version);
    info!("  规则集版本: {} ({} 条规则)", info.rules_version, info.rule_count);

    let orchestrator = AnalysisOrchestrator::new(
        store,
        storage,
        text_extractor,
        knowledge,
        PipelineSettings::from(&config.pipeline),
        PipelineMetrics::new()?,
    )
    .with_knowledge_sources(sources);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.server.host, config.server.port))?;

    let server = WebServer::new(
        addr,
        Arc::new(orchestrator),
        &config.server,
        config.storage.max_upload_bytes,
    );

    if let Err(e) = server.run().await {
        error!("服务器运行失败: {:#}", e);
        return Err(e);
    }

    Ok(())
}

fn apply_overrides(config: &mut CdssConfig, args: &Args) {
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
}

async fn build_store(config: &CdssConfig) -> Result<Arc<dyn ClinicalStore>> {
    match config.database.backend {
        DatabaseBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        DatabaseBackend::Postgres => {
            let pool = DatabasePool::new(
                &config.database.connection_string,
                config.database.max_connections,
            )
            .await
            .context("Failed to connect to PostgreSQL")?;
            let store = PgStore::new(pool);
            if config.database.auto_migrate {
                store.create_tables().await.context("Failed to create tables")?;
            }
            Ok(Arc::new(store))
        }
    }
}

fn build_text_extractor(config: &CdssConfig) -> Result<Arc<dyn TextExtractor>> {
    match config.pipeline.ocr_backend {
        OcrBackend::PlainText => Ok(Arc::new(PlainTextExtractor)),
        OcrBackend::Fixture => {
            let text = config
                .pipeline
                .fixture_text
                .clone()
                .context("pipeline.fixture_text is required for the fixture backend")?;
            Ok(Arc::new(FixtureTextExtractor::new(text)))
        }
    }
}
