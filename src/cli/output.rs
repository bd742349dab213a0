//! CLI output: error mapping from domain errors to stable CLI surface.

/// Render an error with its source chain, one cause per line.
pub fn map_error(e: &anyhow::Error) -> String {
    let mut message = e.to_string();
    for cause in e.chain().skip(1) {
        message.push_str(&format!("\n  caused by: {}", cause));
    }
    message
}
