//! 引擎指标
//!
//! 按操作统计调用次数、结果和耗时，错误按分类单独计数

use hms_core::{HmsError, Result};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// 引擎指标收集器
#[derive(Clone)]
pub struct EngineMetrics {
    /// Prometheus指标注册表
    registry: Registry,
    /// 操作计数器，按操作名和结果区分
    operations_total: IntCounterVec,
    /// 错误计数器，按错误分类区分
    errors_total: IntCounterVec,
    /// 操作耗时直方图
    operation_duration: HistogramVec,
}

impl EngineMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let operations_total = IntCounterVec::new(
            Opts::new("hms_operations_total", "Total number of engine operations"),
            &["operation", "outcome"],
        )
        .map_err(metric_error)?;
        let errors_total = IntCounterVec::new(
            Opts::new("hms_operation_errors_total", "Total number of failed operations by error kind"),
            &["kind"],
        )
        .map_err(metric_error)?;
        let operation_duration = HistogramVec::new(
            HistogramOpts::new("hms_operation_duration_seconds", "Engine operation latency in seconds"),
            &["operation"],
        )
        .map_err(metric_error)?;

        registry
            .register(Box::new(operations_total.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(errors_total.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(operation_duration.clone()))
            .map_err(metric_error)?;

        Ok(Self {
            registry,
            operations_total,
            errors_total,
            operation_duration,
        })
    }

    /// 记录一次操作的结果
    pub fn record<T>(&self, operation: &str, elapsed: Duration, result: &Result<T>) {
        let outcome = match result {
            Ok(_) => "success",
            Err(e) => {
                self.errors_total.with_label_values(&[e.kind().as_str()]).inc();
                "error"
            }
        };
        self.operations_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.operation_duration
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    pub fn operation_count(&self, operation: &str, outcome: &str) -> u64 {
        self.operations_total
            .with_label_values(&[operation, outcome])
            .get()
    }

    pub fn error_count(&self, kind: &str) -> u64 {
        self.errors_total.with_label_values(&[kind]).get()
    }

    /// 导出Prometheus文本格式
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).map_err(metric_error)?;

        String::from_utf8(buffer).map_err(|e| HmsError::Internal(e.to_string()))
    }
}

fn metric_error(err: prometheus::Error) -> HmsError {
    HmsError::Internal(format!("metrics error: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_outcomes_and_error_kinds() {
        let metrics = EngineMetrics::new().unwrap();

        metrics.record("add_task", Duration::from_millis(3), &Ok::<_, HmsError>(()));
        metrics.record::<()>(
            "add_task",
            Duration::from_millis(1),
            &Err(HmsError::validation("cost")),
        );

        assert_eq!(metrics.operation_count("add_task", "success"), 1);
        assert_eq!(metrics.operation_count("add_task", "error"), 1);
        assert_eq!(metrics.error_count("validation"), 1);

        let text = metrics.render().unwrap();
        assert!(text.contains("hms_operations_total"));
        assert!(text.contains("operation=\"add_task\""));
    }
}
