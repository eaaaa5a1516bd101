use std::io::{self, Write};

use serde_json::Value;

use crate::cli::OutputFormat;
use crate::envelope::Envelope;
use crate::error::CliError;

pub fn render(envelope: &Envelope<Value>, format: OutputFormat, pretty: bool) -> Result<(), CliError> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match format {
        OutputFormat::Json => write_json(&mut out, envelope, pretty)?,
        OutputFormat::Table => write_table(&mut out, envelope)?,
    }
    out.flush()?;
    Ok(())
}

fn write_json<W: Write>(out: &mut W, envelope: &Envelope<Value>, pretty: bool) -> Result<(), CliError> {
    let payload = if pretty {
        serde_json::to_string_pretty(envelope)?
    } else {
        serde_json::to_string(envelope)?
    };
    writeln!(out, "{payload}")?;
    Ok(())
}

fn write_table<W: Write>(out: &mut W, envelope: &Envelope<Value>) -> Result<(), CliError> {
    writeln!(out, "request_id  : {}", envelope.meta.request_id)?;
    writeln!(out, "command     : {}", envelope.meta.command)?;
    writeln!(out, "backend     : {}", envelope.meta.backend)?;
    writeln!(out, "generated_at: {}", envelope.meta.generated_at)?;
    writeln!(out, "latency_ms  : {}", envelope.meta.latency_ms)?;

    if !envelope.meta.warnings.is_empty() {
        writeln!(out, "warnings:")?;
        for warning in &envelope.meta.warnings {
            writeln!(out, "  - {warning}")?;
        }
    }

    writeln!(out, "data:")?;
    match record_rows(&envelope.data) {
        Some((key, rows)) => write_rows(out, key, rows)?,
        None => {
            let pretty_data = serde_json::to_string_pretty(&envelope.data)?;
            for line in pretty_data.lines() {
                writeln!(out, "  {line}")?;
            }
        }
    }

    if !envelope.errors.is_empty() {
        writeln!(out, "errors:")?;
        for error in &envelope.errors {
            writeln!(out, "  - {}: {}", error.code, error.message)?;
        }
    }

    Ok(())
}

/// The first array of flat objects in `data`, rendered as columns.
fn record_rows(data: &Value) -> Option<(&str, &[Value])> {
    let object = data.as_object()?;
    object.iter().find_map(|(key, value)| {
        let rows = value.as_array()?;
        let flat = !rows.is_empty()
            && rows.iter().all(|row| {
                row.as_object()
                    .is_some_and(|fields| fields.values().all(|field| !field.is_object() && !field.is_array()))
            });
        flat.then_some((key.as_str(), rows.as_slice()))
    })
}

fn write_rows<W: Write>(out: &mut W, key: &str, rows: &[Value]) -> Result<(), CliError> {
    let columns = rows
        .first()
        .and_then(Value::as_object)
        .map(|fields| fields.keys().cloned().collect::<Vec<_>>())
        .unwrap_or_default();
    let cells = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|column| cell_text(row.get(column)))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    let widths = columns
        .iter()
        .enumerate()
        .map(|(index, column)| {
            cells
                .iter()
                .map(|row| row[index].len())
                .chain(std::iter::once(column.len()))
                .max()
                .unwrap_or(0)
        })
        .collect::<Vec<_>>();

    writeln!(out, "  {key}:")?;
    let header = columns
        .iter()
        .zip(&widths)
        .map(|(column, &width)| format!("{column:<width$}"))
        .collect::<Vec<_>>()
        .join("  ");
    writeln!(out, "  {}", header.trim_end())?;
    for row in &cells {
        let line = row
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ");
        writeln!(out, "  {}", line.trim_end())?;
    }
    Ok(())
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::from("-"),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EnvelopeMeta;
    use serde_json::json;

    fn envelope(data: Value) -> Envelope<Value> {
        Envelope {
            meta: EnvelopeMeta::new("trends", "local", 1),
            data,
            errors: Vec::new(),
        }
    }

    #[test]
    fn flat_record_arrays_render_as_aligned_columns() {
        let mut buffer = Vec::new();
        let data = json!({
            "days": [
                {"date": "2024-01-02", "total_bookings": 8},
                {"date": "2024-01-01", "total_bookings": 12}
            ]
        });

        write_table(&mut buffer, &envelope(data)).expect("render");

        let text = String::from_utf8(buffer).expect("utf8");
        assert!(text.contains("  date        total_bookings\n"));
        assert!(text.contains("  2024-01-01  12\n"));
    }

    #[test]
    fn nested_data_falls_back_to_pretty_json() {
        let data = json!({"summary": {"days": 2}});

        assert!(record_rows(&data).is_none());

        let mut buffer = Vec::new();
        write_table(&mut buffer, &envelope(data)).expect("render");
        let text = String::from_utf8(buffer).expect("utf8");
        assert!(text.contains("\"days\": 2"));
    }
}
