use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::bench::ComparisonReport;

pub(super) fn write_json_report(report: &ComparisonReport) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, report)
        .context("failed to serialize comparison json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

pub(super) fn write_text_report(report: &ComparisonReport, report_path: &Path) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    render_text(report, report_path, &mut output)?;
    output.flush()?;
    Ok(())
}

pub(super) fn format_ms(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{value:.3} ms"),
        None => "undefined".to_string(),
    }
}

fn format_ratio(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{value:.3}"),
        None => "undefined".to_string(),
    }
}

pub(super) fn render_text(
    report: &ComparisonReport,
    report_path: &Path,
    output: &mut impl Write,
) -> Result<()> {
    writeln!(
        output,
        "Comparison {}{}: queries={} backends={} repetitions={} warmup={} top_k={} k_relevance={} timeout_ms={} parallel={}",
        report.run_id,
        if report.partial { " (partial)" } else { "" },
        report.query_ids.len(),
        report.backends.len(),
        report.config.repetition_count,
        report.config.warmup_count,
        report.config.top_k,
        report.config.k_relevance,
        report.config.per_call_timeout_ms,
        report.config.parallel,
    )?;
    writeln!(output, "Report: {}", report_path.display())?;

    writeln!(output, "\nBackends:")?;
    for backend in &report.backends {
        writeln!(
            output,
            "  {}\t{}/{}\tmean={} median={} stddev={} failures={}/{}",
            backend.backend_id,
            backend.kind.as_str(),
            backend.role.as_str(),
            format_ms(backend.timing.mean_ms),
            format_ms(backend.timing.median_ms),
            format_ms(backend.timing.stddev_ms),
            backend.timing.failures,
            backend.timing.attempts,
        )?;
        match &backend.metrics_summary {
            Some(summary) => writeln!(
                output,
                "  \tprecision={:.3} recall={:.3} f1={:.3} over {} queries",
                summary.precision, summary.recall, summary.f1, summary.scored_queries
            )?,
            None => writeln!(output, "  \tmetrics=undefined (no scored queries)")?,
        }
        if let Some(size) = backend.corpus_size {
            writeln!(
                output,
                "  \tcorpus entities={} properties={} statements={}\tper_1k_statements={}",
                size.entities,
                size.properties,
                size.statements,
                format_ms(backend.mean_ms_per_1k_statements)
            )?;
        }
    }

    if !report.latency_ranking.is_empty() {
        writeln!(output, "\nLatency ranking:")?;
        for (index, rank) in report.latency_ranking.iter().enumerate() {
            writeln!(
                output,
                "  {}. {}\t{:.3} ms\tx{}",
                index + 1,
                rank.backend_id,
                rank.mean_ms,
                format_ratio(rank.ratio_to_fastest)
            )?;
        }
    }

    writeln!(output, "\nPer query:")?;
    for query_id in &report.query_ids {
        let scores = report
            .backends
            .iter()
            .filter_map(|backend| report.score(&backend.backend_id, query_id))
            .collect::<Vec<_>>();
        if scores.is_empty() {
            writeln!(output, "  {query_id}\t(not scored)")?;
            continue;
        }
        for score in scores {
            writeln!(
                output,
                "  {}\t{}\tp={:.3} r={:.3} f1={:.3}",
                query_id, score.backend_id, score.precision, score.recall, score.f1
            )?;
        }
    }

    if !report.unresolved_details.is_empty() {
        writeln!(output, "\nUnresolved queries:")?;
        for unresolved in &report.unresolved_details {
            writeln!(output, "  {}\t{}", unresolved.query_id, unresolved.reason)?;
        }
    }

    if !report.unavailable_backends.is_empty() {
        writeln!(output, "\nUnavailable backends:")?;
        for backend in &report.unavailable_backends {
            writeln!(output, "  {}\t{}", backend.backend_id, backend.reason)?;
        }
    }

    if !report.failed_units.is_empty() {
        writeln!(output, "\nFailed units:")?;
        for unit in &report.failed_units {
            writeln!(
                output,
                "  {}\t{}\t{}\t{}/{} failed\t{}",
                unit.backend_id,
                unit.query_id,
                unit.status.as_str(),
                unit.failures,
                unit.attempts,
                unit.message.as_deref().unwrap_or("")
            )?;
        }
    }

    Ok(())
}
