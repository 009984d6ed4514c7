use std::io::Write;

use crate::registry::RunRegistry;

/// Render the end-of-run summary.
///
/// The layout matches what existing tooling scrapes: a blank line, the run
/// count, one bullet per test with its link indented under it, and a closing
/// blank line.
pub fn format_summary(registry: &RunRegistry) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n\nXHProf runs: {}\n", registry.count()));
    for record in registry.all() {
        out.push_str(&format!(
            " * {}\n   {}\n\n",
            record.test_identifier, record.report_reference
        ));
    }
    out.push('\n');
    out
}

/// Write the summary to `out` and flush it.
pub fn emit_summary(registry: &RunRegistry, out: &mut dyn Write) -> std::io::Result<()> {
    out.write_all(format_summary(registry).as_bytes())?;
    out.flush()
}
