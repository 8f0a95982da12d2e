use crate::migrations::MigrationReport;

pub fn run(report: &MigrationReport) -> anyhow::Result<()> {
    if report.applied.is_empty() {
        println!("Schema is up to date.");
    } else {
        println!("Applied:");
        for step in &report.applied {
            println!("  {step}");
        }
    }
    if !report.skipped.is_empty() {
        println!("Already satisfied: {}", report.skipped.join(", "));
    }
    Ok(())
}
