//! 流水线监控指标
//!
//! 阶段运行次数、阶段耗时、生成的推荐数与审核结果，以Prometheus文本格式导出

use anyhow::{Context, Result};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;
use tracing::debug;

/// 流水线指标收集器
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    /// Prometheus指标注册表
    registry: Registry,
    /// 阶段运行计数 {stage, outcome}
    stage_runs_total: IntCounterVec,
    /// 阶段耗时 {stage}
    stage_duration_seconds: HistogramVec,
    /// 生成推荐计数 {severity}
    recommendations_total: IntCounterVec,
    /// 审核计数 {decision}
    reviews_total: IntCounterVec,
}

impl PipelineMetrics {
    /// 创建新的指标收集器
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let stage_runs_total = IntCounterVec::new(
            Opts::new("cdss_stage_runs_total", "Total number of pipeline stage runs"),
            &["stage", "outcome"],
        )?;

        let stage_duration_seconds = HistogramVec::new(
            HistogramOpts::new("cdss_stage_duration_seconds", "Pipeline stage duration in seconds"),
            &["stage"],
        )?;

        let recommendations_total = IntCounterVec::new(
            Opts::new("cdss_recommendations_total", "Total number of generated recommendations"),
            &["severity"],
        )?;

        let reviews_total = IntCounterVec::new(
            Opts::new("cdss_reviews_total", "Total number of recommendation reviews"),
            &["decision"],
        )?;

        // 注册所有指标
        registry.register(Box::new(stage_runs_total.clone()))?;
        registry.register(Box::new(stage_duration_seconds.clone()))?;
        registry.register(Box::new(recommendations_total.clone()))?;
        registry.register(Box::new(reviews_total.clone()))?;

        Ok(Self {
            registry,
            stage_runs_total,
            stage_duration_seconds,
            recommendations_total,
            reviews_total,
        })
    }

    /// 记录一次阶段运行
    pub fn record_stage(&self, stage: &str, outcome: &str, duration: Duration) {
        debug!("Stage {} finished with {} in {:?}", stage, outcome, duration);
        self.stage_runs_total.with_label_values(&[stage, outcome]).inc();
        self.stage_duration_seconds
            .with_label_values(&[stage])
            .observe(duration.as_secs_f64());
    }

    /// 记录生成的推荐
    pub fn record_recommendation(&self, severity: &str) {
        self.recommendations_total.with_label_values(&[severity]).inc();
    }

    /// 记录审核结果
    pub fn record_review(&self, decision: &str) {
        self.reviews_total.with_label_values(&[decision]).inc();
    }

    pub fn stage_runs(&self, stage: &str, outcome: &str) -> u64 {
        self.stage_runs_total.with_label_values(&[stage, outcome]).get()
    }

    /// 导出Prometheus文本格式
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context("Failed to encode metrics")?;
        String::from_utf8(buffer).context("Metrics output is not UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render() {
        let metrics = PipelineMetrics::new().unwrap();
        metrics.record_stage("rules", "completed", Duration::from_millis(3));
        metrics.record_stage("rules", "completed", Duration::from_millis(4));
        metrics.record_recommendation("Urgent");
        metrics.record_review("accepted");

        assert_eq!(metrics.stage_runs("rules", "completed"), 2);

        let output = metrics.render().unwrap();
        assert!(output.contains("cdss_stage_runs_total{outcome=\"completed\",stage=\"rules\"} 2"));
        assert!(output.contains("cdss_recommendations_total{severity=\"Urgent\"} 1"));
        assert!(output.contains("cdss_reviews_total{decision=\"accepted\"} 1"));
        assert!(output.contains("cdss_stage_duration_seconds_bucket"));
    }

    #[test]
    fn test_registries_are_independent() {
        let first = PipelineMetrics::new().unwrap();
        let second = PipelineMetrics::new().unwrap();
        first.record_review("rejected");
        assert!(!second.render().unwrap().contains("decision=\"rejected\""));
    }
}
