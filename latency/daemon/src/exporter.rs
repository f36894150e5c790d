//! Metrics exporters
//!
//! Provides different exporters for metrics (JSON, Prometheus, etc.)

use crate::types::LatencyMetrics;
use anyhow::{Context, Result};
use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Trait for metrics exporters
pub trait MetricsExporter {
    /// Export metrics
    ///
    /// # Arguments
    ///
    /// * `metrics` - Aggregated metrics to export
    ///
    /// # Returns
    ///
    /// Result indicating success or failure
    fn export(&self, metrics: &LatencyMetrics) -> Result<()>;
}

/// Export format type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterType {
    /// JSON format
    Json,
    /// Prometheus format
    Prometheus,
    /// InfluxDB line protocol
    Influx,
}

impl FromStr for ExporterType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExporterType::Json),
            "prometheus" | "prom" => Ok(ExporterType::Prometheus),
            "influx" | "influxdb" => Ok(ExporterType::Influx),
            _ => anyhow::bail!("Unsupported format: {}. Use json, prometheus, or influx", s),
        }
    }
}

impl ExporterType {
    /// Build the exporter for this format writing to `output_path`
    pub fn exporter(self, output_path: PathBuf) -> Box<dyn MetricsExporter> {
        match self {
            ExporterType::Json => Box::new(JsonExporter::new(output_path, true)),
            ExporterType::Prometheus => Box::new(PrometheusExporter::new(output_path)),
            ExporterType::Influx => Box::new(InfluxExporter::new(
                output_path,
                "function_latency".to_string(),
            )),
        }
    }
}

fn write_output(output_path: &Path, data: &str) -> Result<()> {
    let mut file = File::create(output_path)
        .with_context(|| format!("Failed to create output file: {:?}", output_path))?;

    file.write_all(data.as_bytes())
        .with_context(|| format!("Failed to write to output file: {:?}", output_path))?;

    Ok(())
}

/// JSON exporter
pub struct JsonExporter {
    output_path: PathBuf,
    pretty: bool,
}

impl JsonExporter {
    /// Create a new JSON exporter
    ///
    /// # Arguments
    ///
    /// * `output_path` - Path to output file
    /// * `pretty` - Enable pretty-printing
    pub fn new(output_path: PathBuf, pretty: bool) -> Self {
        Self {
            output_path,
            pretty,
        }
    }
}

impl MetricsExporter for JsonExporter {
    fn export(&self, metrics: &LatencyMetrics) -> Result<()> {
        let json = if self.pretty {
            serde_json::to_string_pretty(metrics)?
        } else {
            serde_json::to_string(metrics)?
        };

        write_output(&self.output_path, &json)
    }
}

/// Prometheus exporter
pub struct PrometheusExporter {
    output_path: PathBuf,
}

impl PrometheusExporter {
    /// Create a new Prometheus exporter
    ///
    /// # Arguments
    ///
    /// * `output_path` - Path to output file
    pub fn new(output_path: PathBuf) -> Self {
        Self { output_path }
    }

    /// Convert metrics to Prometheus format
    fn to_prometheus_format(metrics: &LatencyMetrics) -> String {
        let mut output = String::new();
        let function = &metrics.target.function;

        // Total events
        output.push_str("# HELP function_latency_events_total Total number of latency events\n");
        output.push_str("# TYPE function_latency_events_total counter\n");
        output.push_str(&format!(
            "function_latency_events_total{{function=\"{}\"}} {}\n",
            function, metrics.total_events
        ));
        output.push('\n');

        // Lost events
        output.push_str("# HELP function_latency_lost_events_total Samples lost to full perf buffers\n");
        output.push_str("# TYPE function_latency_lost_events_total counter\n");
        output.push_str(&format!(
            "function_latency_lost_events_total{{function=\"{}\"}} {}\n",
            function, metrics.lost_events
        ));
        output.push('\n');

        // Duration
        output.push_str("# HELP function_latency_duration_seconds Duration of collection period\n");
        output.push_str("# TYPE function_latency_duration_seconds gauge\n");
        output.push_str(&format!(
            "function_latency_duration_seconds {}\n",
            metrics.duration_seconds
        ));
        output.push('\n');

        // Percentiles
        output.push_str("# HELP function_latency_microseconds Latency percentiles in microseconds\n");
        output.push_str("# TYPE function_latency_microseconds gauge\n");
        let p = &metrics.percentiles;
        for (q, v) in [
            ("0.50", p.p50),
            ("0.75", p.p75),
            ("0.90", p.p90),
            ("0.95", p.p95),
            ("0.99", p.p99),
            ("0.999", p.p999),
        ] {
            output.push_str(&format!(
                "function_latency_microseconds{{function=\"{}\",percentile=\"{}\"}} {}\n",
                function, q, v
            ));
        }
        output.push('\n');

        // Histogram, cumulative per upper bound in microseconds
        output.push_str("# HELP function_latency_histogram_bucket Calls at or below each latency bound (μs)\n");
        output.push_str("# TYPE function_latency_histogram_bucket gauge\n");
        let h = &metrics.histogram;
        let mut cumulative = 0;
        for (le, count) in [
            ("1000", h.bucket_0_1ms),
            ("5000", h.bucket_1_5ms),
            ("10000", h.bucket_5_10ms),
            ("50000", h.bucket_10_50ms),
            ("100000", h.bucket_50_100ms),
            ("+Inf", h.bucket_100ms_plus),
        ] {
            cumulative += count;
            output.push_str(&format!(
                "function_latency_histogram_bucket{{function=\"{}\",le=\"{}\"}} {}\n",
                function, le, cumulative
            ));
        }
        output.push('\n');

        // Probe outcomes. Over perf buffers event_dropped stays 0: the
        // producer never sees a full ring, those drops are in lost_events.
        output.push_str("# HELP function_latency_probe_outcomes_total Handler outcomes in the eBPF program (perf ring drops are counted in function_latency_lost_events_total)\n");
        output.push_str("# TYPE function_latency_probe_outcomes_total counter\n");
        let s = &metrics.probe_stats;
        for (outcome, count) in [
            ("entry_recorded", s.entries_recorded),
            ("entry_rejected", s.entries_rejected),
            ("exit_unmatched", s.exits_unmatched),
            ("exit_clock_skew", s.exits_clock_skew),
            ("event_emitted", s.events_emitted),
            ("event_dropped", s.events_dropped),
        ] {
            output.push_str(&format!(
                "function_latency_probe_outcomes_total{{function=\"{}\",outcome=\"{}\"}} {}\n",
                function, outcome, count
            ));
        }
        output.push('\n');

        // Process count
        output.push_str("# HELP function_latency_processes_total Number of distinct processes observed\n");
        output.push_str("# TYPE function_latency_processes_total gauge\n");
        output.push_str(&format!(
            "function_latency_processes_total {}\n",
            metrics.processes.len()
        ));
        output.push('\n');

        output
    }
}

impl MetricsExporter for PrometheusExporter {
    fn export(&self, metrics: &LatencyMetrics) -> Result<()> {
        write_output(&self.output_path, &Self::to_prometheus_format(metrics))
    }
}

/// InfluxDB line protocol exporter
pub struct InfluxExporter {
    output_path: PathBuf,
    measurement: String,
}

impl InfluxExporter {
    /// Create a new InfluxDB exporter
    ///
    /// # Arguments
    ///
    /// * `output_path` - Path to output file
    /// * `measurement` - Measurement name for InfluxDB
    pub fn new(output_path: PathBuf, measurement: String) -> Self {
        Self {
            output_path,
            measurement,
        }
    }

    /// Convert metrics to InfluxDB line protocol
    fn to_influx_format(metrics: &LatencyMetrics, measurement: &str) -> String {
        let mut output = String::new();
        let timestamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
        // Tag values escape spaces and commas
        let function = metrics
            .target
            .function
            .replace(',', "\\,")
            .replace(' ', "\\ ");

        output.push_str(&format!(
            "{},function={},type=summary total_events={}i,lost_events={}i,duration_seconds={}i,processes={}i {}\n",
            measurement,
            function,
            metrics.total_events,
            metrics.lost_events,
            metrics.duration_seconds,
            metrics.processes.len(),
            timestamp
        ));

        output.push_str(&format!(
            "{},function={},type=percentiles p50={},p75={},p90={},p95={},p99={},p999={} {}\n",
            measurement,
            function,
            metrics.percentiles.p50,
            metrics.percentiles.p75,
            metrics.percentiles.p90,
            metrics.percentiles.p95,
            metrics.percentiles.p99,
            metrics.percentiles.p999,
            timestamp
        ));

        output.push_str(&format!(
            "{},function={},type=histogram bucket_0_1ms={}i,bucket_1_5ms={}i,bucket_5_10ms={}i,bucket_10_50ms={}i,bucket_50_100ms={}i,bucket_100ms_plus={}i {}\n",
            measurement,
            function,
            metrics.histogram.bucket_0_1ms,
            metrics.histogram.bucket_1_5ms,
            metrics.histogram.bucket_5_10ms,
            metrics.histogram.bucket_10_50ms,
            metrics.histogram.bucket_50_100ms,
            metrics.histogram.bucket_100ms_plus,
            timestamp
        ));

        let s = &metrics.probe_stats;
        output.push_str(&format!(
            "{},function={},type=probe entries_recorded={}i,entries_rejected={}i,exits_unmatched={}i,exits_clock_skew={}i,events_emitted={}i,events_dropped={}i {}\n",
            measurement,
            function,
            s.entries_recorded,
            s.entries_rejected,
            s.exits_unmatched,
            s.exits_clock_skew,
            s.events_emitted,
            s.events_dropped,
            timestamp
        ));

        output
    }
}

impl MetricsExporter for InfluxExporter {
    fn export(&self, metrics: &LatencyMetrics) -> Result<()> {
        write_output(
            &self.output_path,
            &Self::to_influx_format(metrics, &self.measurement),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn create_test_metrics() -> LatencyMetrics {
        use crate::types::*;

        LatencyMetrics {
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            duration_seconds: 60,
            target: TargetInfo {
                binary: "/usr/local/bin/server".to_string(),
                function: "handle_request".to_string(),
                pid: None,
            },
            total_events: 1000,
            lost_events: 4,
            processes: HashMap::new(),
            histogram: LatencyHistogram::default(),
            percentiles: Percentiles {
                p50: 100.0,
                p75: 200.0,
                p90: 300.0,
                p95: 400.0,
                p99: 500.0,
                p999: 600.0,
            },
            probe_stats: ProbeStats {
                entries_recorded: 1010,
                entries_rejected: 2,
                ..ProbeStats::default()
            },
        }
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = create_test_metrics();
        let prometheus = PrometheusExporter::to_prometheus_format(&metrics);

        assert!(prometheus.contains("function_latency_events_total{function=\"handle_request\"} 1000"));
        assert!(prometheus.contains("function_latency_lost_events_total{function=\"handle_request\"} 4"));
        assert!(prometheus.contains("function_latency_duration_seconds 60"));
        assert!(prometheus.contains("percentile=\"0.50\"} 100"));
        assert!(prometheus.contains("outcome=\"entry_rejected\"} 2"));
    }

    #[test]
    fn test_prometheus_histogram_is_cumulative() {
        let mut metrics = create_test_metrics();
        for latency_us in [500.0, 700.0, 3000.0, 20_000.0, 250_000.0] {
            metrics.histogram.add_sample(latency_us);
        }

        let prometheus = PrometheusExporter::to_prometheus_format(&metrics);

        assert!(prometheus.contains("le=\"1000\"} 2\n"));
        assert!(prometheus.contains("le=\"5000\"} 3\n"));
        assert!(prometheus.contains("le=\"10000\"} 3\n"));
        assert!(prometheus.contains("le=\"50000\"} 4\n"));
        assert!(prometheus.contains("le=\"100000\"} 4\n"));
        assert!(prometheus.contains("le=\"+Inf\"} 5\n"));
    }

    #[test]
    fn test_prometheus_points_perf_drops_at_lost_events() {
        let prometheus = PrometheusExporter::to_prometheus_format(&create_test_metrics());

        assert!(prometheus.contains(
            "perf ring drops are counted in function_latency_lost_events_total"
        ));
    }

    #[test]
    fn test_influx_format() {
        let metrics = create_test_metrics();
        let influx = InfluxExporter::to_influx_format(&metrics, "latency");

        assert!(influx.contains("latency,function=handle_request,type=summary"));
        assert!(influx.contains("total_events=1000i"));
        assert!(influx.contains("lost_events=4i"));
        assert!(influx.contains("p50=100"));
        assert!(influx.contains("entries_recorded=1010i"));
    }

    #[test]
    fn test_exporter_type_parse() {
        assert_eq!("JSON".parse::<ExporterType>().unwrap(), ExporterType::Json);
        assert_eq!("prom".parse::<ExporterType>().unwrap(), ExporterType::Prometheus);
        assert_eq!("influxdb".parse::<ExporterType>().unwrap(), ExporterType::Influx);
        assert!("csv".parse::<ExporterType>().is_err());
    }

    #[test]
    fn test_json_export_writes_file() {
        let path = std::env::temp_dir().join(format!(
            "function-latency-export-{}.json",
            std::process::id()
        ));
        let metrics = create_test_metrics();

        JsonExporter::new(path.clone(), false).export(&metrics).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["total_events"], 1000);
        assert_eq!(written["target"]["function"], "handle_request");
        let _ = std::fs::remove_file(&path);
    }
}
