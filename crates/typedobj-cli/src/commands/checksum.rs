//! Checksum command implementation.

use serde_json::json;

pub fn run(
    input: Option<String>,
    json_output: bool,
    max_memory: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let canonical = super::canonicalize_input(input, max_memory)?;

    if json_output {
        let summary = json!({
            "checksum": canonical.checksum().as_str(),
            "size": canonical.size(),
            "naturally_sorted": canonical.is_naturally_sorted(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", canonical.checksum());
        println!("size: {}", canonical.size());
        println!("naturally sorted: {}", canonical.is_naturally_sorted());
    }
    Ok(())
}
