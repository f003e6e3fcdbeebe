use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;

use super::{GlobalArgs, Workspace};
use crate::store::SessionRecord;

pub async fn run(args: &GlobalArgs) -> Result<()> {
    let workspace = Workspace::open(args)?;
    let sessions = workspace.store().list(&workspace.project.project_id);

    if sessions.is_empty() {
        println!(
            "\n{} No sessions recorded for project {}.",
            "ℹ".blue(),
            workspace.project.project_id.cyan()
        );
        return Ok(());
    }

    println!("\n{}", "━".repeat(60).dimmed());
    println!(
        "{}",
        format!("   Sessions for project {}", workspace.project.project_id)
            .yellow()
            .bold()
    );
    println!("{}", "━".repeat(60).dimmed());

    for (session_id, record) in &sessions {
        println!("  {}", session_id.green().bold());
        for line in describe(record) {
            println!("    {line}");
        }
    }

    println!("{}", "━".repeat(60).dimmed());
    Ok(())
}

/// Human-readable lines for one record.
fn describe(record: &SessionRecord) -> Vec<String> {
    vec![
        format!("Sandbox:       {}", record.sandbox_id),
        format!("Created:       {}", timestamp(record.created_at)),
        format!("Last accessed: {}", timestamp(record.last_accessed_at)),
    ]
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_describe_record() {
        let record = SessionRecord {
            sandbox_id: "sb-42".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            last_accessed_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap(),
        };

        let lines = describe(&record);
        assert_eq!(lines[0], "Sandbox:       sb-42");
        assert_eq!(lines[1], "Created:       2024-01-01 00:00:00 UTC");
        assert_eq!(lines[2], "Last accessed: 2024-01-01 00:05:00 UTC");
    }
}
