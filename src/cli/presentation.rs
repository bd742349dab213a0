//! CLI presentation: generation results, fingerprints and events.

use crate::error::JobError;
use crate::events::JobEvent;
use crate::queue::{JobOutcome, QueueStats};
use comfy_table::Table;
use owo_colors::OwoColorize;
use serde_json::json;

/// One prompt and its terminal outcome
pub struct GenerationRow {
    pub prompt: String,
    pub outcome: JobOutcome,
}

fn status_label(outcome: &JobOutcome) -> &'static str {
    match outcome {
        Ok(_) => "completed",
        Err(JobError::Cancelled) => "cancelled",
        Err(_) => "failed",
    }
}

pub fn format_generation_table(rows: &[GenerationRow], stats: &QueueStats) -> String {
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec![
        "Prompt", "Status", "Engine", "Quality", "Vertices", "Faces", "Geometry",
    ]);
    for row in rows {
        match &row.outcome {
            Ok(result) => {
                table.add_row(vec![
                    row.prompt.clone(),
                    status_label(&row.outcome).to_string(),
                    result.engine_used.to_string(),
                    format!("{:.2}", result.quality_score),
                    result.geometry.vertex_count().to_string(),
                    result.geometry.primitive_count().to_string(),
                    result.geometry_ref.digest[..12].to_string(),
                ]);
            }
            Err(e) => {
                table.add_row(vec![
                    row.prompt.clone(),
                    status_label(&row.outcome).to_string(),
                    "-".to_string(),
                    "-".to_string(),
                    "-".to_string(),
                    "-".to_string(),
                    e.to_string(),
                ]);
            }
        }
    }

    let summary = format!(
        "{} completed, {} failed, {} cancelled",
        stats.completed.to_string().green(),
        stats.failed.to_string().red(),
        stats.cancelled.to_string().yellow()
    );
    format!("{}\n{}", table, summary)
}

pub fn format_generation_json(rows: &[GenerationRow]) -> Result<String, serde_json::Error> {
    let items: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| match &row.outcome {
            Ok(result) => json!({
                "prompt": row.prompt,
                "status": status_label(&row.outcome),
                "engine": result.engine_used,
                "quality_score": result.quality_score,
                "vertex_count": result.geometry.vertex_count(),
                "face_count": result.geometry.primitive_count(),
                "geometry_digest": result.geometry_ref.digest,
                "geometry_bytes": result.geometry_ref.len(),
                "metadata": result.metadata,
            }),
            Err(e) => json!({
                "prompt": row.prompt,
                "status": status_label(&row.outcome),
                "error": e.to_string(),
            }),
        })
        .collect();
    serde_json::to_string_pretty(&items)
}

pub fn format_events(events: &[JobEvent]) -> String {
    events
        .iter()
        .map(JobEvent::to_json_line)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_fingerprint(prompt: &str, fingerprint: &str) -> String {
    format!("{}  {}", fingerprint, prompt.dimmed())
}
