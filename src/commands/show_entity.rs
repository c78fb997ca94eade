use std::io::{self, Write};

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::cli::ShowEntityArgs;
use crate::model::EntityRecord;
use crate::store::{EntityStore, SqliteStore, sqlite_path};

pub fn run(args: ShowEntityArgs) -> Result<()> {
    let entity_id = args.id.trim();
    if entity_id.is_empty() {
        bail!("--id must not be empty");
    }

    let store = SqliteStore::open_read_only(&sqlite_path(&args.cache_root))?;
    let Some(entity) = store.get_entity(entity_id)? else {
        bail!("entity '{entity_id}' not found; run `wikifacts load` or check the id");
    };
    info!(
        entity_id = %entity.entity_id,
        aliases = entity.aliases.len(),
        statements = entity.statements.len(),
        "entity loaded"
    );

    let mut output = io::BufWriter::new(io::stdout().lock());
    if args.json {
        serde_json::to_writer_pretty(&mut output, &entity)
            .context("failed to serialize entity json output")?;
        writeln!(output)?;
    } else {
        render_entity(&entity, &mut output)?;
    }
    output.flush()?;
    Ok(())
}

fn render_entity(entity: &EntityRecord, output: &mut impl Write) -> Result<()> {
    writeln!(output, "{} ({})", entity.label, entity.entity_id)?;
    if !entity.description.is_empty() {
        writeln!(output, "Description: {}", entity.description)?;
    }
    if !entity.entity_type.is_empty() {
        writeln!(output, "Type: {}", entity.entity_type)?;
    }

    if !entity.aliases.is_empty() {
        writeln!(output, "Aliases:")?;
        for alias in &entity.aliases {
            writeln!(output, "\t{} [{}]", alias.value, alias.language)?;
        }
    }

    writeln!(output, "Statements: {}", entity.statements.len())?;
    for statement in &entity.statements {
        let label = if statement.property.label.is_empty() {
            statement.property.property_id.as_str()
        } else {
            statement.property.label.as_str()
        };
        match &statement.entity_id {
            Some(target) => writeln!(
                output,
                "\t{} ({}): {} -> {}",
                label, statement.property.property_id, statement.value, target
            )?,
            None => writeln!(
                output,
                "\t{} ({}): {}",
                label, statement.property.property_id, statement.value
            )?,
        }
    }
    Ok(())
}
