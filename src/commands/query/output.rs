use std::io::{self, Write};

use anyhow::{Context, Result};

use super::run::QueryResponse;
use crate::intent::QueryIntent;

pub(super) fn write_json_response(response: &QueryResponse) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, response)
        .context("failed to serialize query json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

pub(super) fn write_text_response(response: &QueryResponse) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    render_text(response, &mut output)?;
    output.flush()?;
    Ok(())
}

fn render_text(response: &QueryResponse, output: &mut impl Write) -> Result<()> {
    writeln!(output, "Query: {}", response.query)?;
    match &response.intent {
        QueryIntent::Fact { property, subject } => writeln!(
            output,
            "Intent: fact property={} subject={}",
            property.property_id(),
            subject
        )?,
        QueryIntent::Lookup { keyword } => writeln!(output, "Intent: lookup keyword={keyword}")?,
    }

    for answer in &response.answers {
        writeln!(
            output,
            "\n[{}] results={} duration_ms={:.3}",
            answer.store, answer.returned, answer.duration_ms
        )?;
        if answer.hits.is_empty() {
            writeln!(output, "\t(no results)")?;
        }
        for (index, hit) in answer.hits.iter().enumerate() {
            writeln!(
                output,
                "{}.\t{}\t{}\t{}",
                index + 1,
                hit.label,
                hit.value,
                hit.item_id
            )?;
        }
    }
    Ok(())
}
