//! Canonicalize command implementation.

use std::io::{self, Write};

pub fn run(input: Option<String>, max_memory: Option<u64>) -> Result<(), Box<dyn std::error::Error>> {
    let canonical = super::canonicalize_input(input, max_memory)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    canonical.write_to(&mut out)?;
    writeln!(out)?;
    Ok(())
}
