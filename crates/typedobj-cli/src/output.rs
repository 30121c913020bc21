//! Output formatting utilities.

use serde_json::{json, Value};

/// One id found in a document and what it resolved to.
pub struct IdLine {
    pub id_type: String,
    pub id: String,
    pub location: String,
    pub resolved: String,
}

/// Everything reported about one validated document.
pub struct DocumentOutcome {
    pub path: String,
    pub errors: Vec<String>,
    pub suppressed_errors: usize,
    pub ids: Vec<IdLine>,
    pub checksum: Option<String>,
    pub size: Option<u64>,
}

impl DocumentOutcome {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            errors: Vec::new(),
            suppressed_errors: 0,
            ids: Vec::new(),
            checksum: None,
            size: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.suppressed_errors == 0
    }
}

/// Formats an outcome as JSON.
pub fn format_json(outcome: &DocumentOutcome) -> Value {
    let ids: Vec<Value> = outcome
        .ids
        .iter()
        .map(|line| {
            json!({
                "type": line.id_type,
                "id": line.id,
                "location": line.location,
                "resolved": line.resolved,
            })
        })
        .collect();
    json!({
        "document": outcome.path,
        "valid": outcome.is_valid(),
        "errors": outcome.errors,
        "suppressed_errors": outcome.suppressed_errors,
        "ids": ids,
        "checksum": outcome.checksum,
        "size": outcome.size,
    })
}

/// Prints outcomes as a JSON array or as indented text.
pub fn print_outcomes(
    outcomes: &[DocumentOutcome],
    json_output: bool,
) -> Result<(), serde_json::Error> {
    if json_output {
        let all: Vec<Value> = outcomes.iter().map(format_json).collect();
        println!("{}", serde_json::to_string_pretty(&all)?);
        return Ok(());
    }

    for outcome in outcomes {
        let verdict = if outcome.is_valid() { "valid" } else { "INVALID" };
        println!("{}: {}", outcome.path, verdict);
        for error in &outcome.errors {
            println!("  error: {}", error);
        }
        if outcome.suppressed_errors > 0 {
            println!("  ... {} more errors", outcome.suppressed_errors);
        }
        for line in &outcome.ids {
            println!(
                "  id {:<12} {:<24} -> {} ({})",
                line.id_type,
                line.id,
                line.resolved,
                line.location
            );
        }
        if let (Some(checksum), Some(size)) = (&outcome.checksum, outcome.size) {
            println!("  checksum: {} ({} bytes)", checksum, size);
        }
    }
    Ok(())
}
