//! CLI output formatting and display helpers.

use fetcher_core::catalog::CatalogSummary;
use fetcher_core::{BackendKind, RunStatistics, TaskPlan};

/// Formats megabytes, switching to GB at 1024 MB.
pub(crate) fn format_size_mb(mb: f64) -> String {
    if mb >= 1024.0 {
        format!("{:.2} GB", mb / 1024.0)
    } else {
        format!("{mb:.1} MB")
    }
}

/// Formats a duration as `1h 02m 03s`, `2m 03s` or `3s`.
pub(crate) fn format_elapsed(elapsed: chrono::Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

/// Lines of the end-of-run summary.
pub(crate) fn build_run_summary_lines(stats: &RunStatistics, backend: BackendKind) -> Vec<String> {
    let mut lines = vec![
        "Transfer summary".to_string(),
        format!("  Backend:     {backend}"),
        format!("  Total:       {}", stats.total()),
        format!("  Completed:   {}", stats.completed()),
        format!("  Skipped:     {}", stats.skipped()),
        format!("  Failed:      {}", stats.failed()),
    ];
    if stats.interrupted() > 0 || stats.was_interrupted() {
        lines.push(format!("  Interrupted: {}", stats.interrupted()));
    }
    if stats.not_started() > 0 {
        lines.push(format!("  Not started: {}", stats.not_started()));
    }
    if stats.retried() > 0 {
        lines.push(format!("  Retries:     {}", stats.retried()));
    }
    lines.push(format!("  Elapsed:     {}", format_elapsed(stats.elapsed())));
    lines.push(match stats.success_rate() {
        Some(rate) => format!("  Success:     {rate:.1}%"),
        None => "  Success:     n/a (nothing to transfer)".to_string(),
    });

    let failures = stats.failures();
    if !failures.is_empty() {
        lines.push("Failed files:".to_string());
        for (filename, error) in failures {
            lines.push(format!("  {filename}: {error}"));
        }
    }
    lines
}

/// Prints the end-of-run summary to stdout.
pub(crate) fn print_run_summary(stats: &RunStatistics, backend: BackendKind) {
    for line in build_run_summary_lines(stats, backend) {
        println!("{line}");
    }
}

/// Lines of the static catalog overview.
pub(crate) fn build_catalog_summary_lines(summary: &CatalogSummary) -> Vec<String> {
    let mut lines = vec!["Catalog summary".to_string()];
    for group in &summary.groups {
        lines.push(format!(
            "  [{}] {}: {} files, {}",
            group.priority,
            group.name,
            group.file_count,
            format_size_mb(group.estimated_mb)
        ));
    }
    lines.push(format!(
        "  Total: {} files, {}",
        summary.total_files,
        format_size_mb(summary.total_mb)
    ));
    lines.push(format!(
        "  Already completed: {} ({:.1}%)",
        summary.completed_count,
        summary.completion_rate()
    ));
    lines
}

/// Prints the static catalog overview to stdout.
pub(crate) fn print_catalog_summary(summary: &CatalogSummary) {
    for line in build_catalog_summary_lines(summary) {
        println!("{line}");
    }
}

/// Lines listing pending tasks in dispatch order.
pub(crate) fn build_plan_lines(plan: &TaskPlan) -> Vec<String> {
    let mut lines = vec![format!(
        "{} pending, {} skipped",
        plan.tasks.len(),
        plan.skipped.len()
    )];
    for (index, task) in plan.tasks.iter().enumerate() {
        let size = task
            .size_estimate_mb
            .map_or_else(|| "size unknown".to_string(), format_size_mb);
        lines.push(format!(
            "  {:>3}. [p{}] {} <- {}:{} ({size})",
            index + 1,
            task.priority,
            task.local_filename,
            task.repository,
            task.remote_path
        ));
    }
    lines
}

/// Prints the pending task list to stdout.
pub(crate) fn print_plan(plan: &TaskPlan) {
    for line in build_plan_lines(plan) {
        println!("{line}");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use fetcher_core::TaskCatalog;

    #[test]
    fn test_format_size_switches_to_gb() {
        assert_eq!(format_size_mb(512.0), "512.0 MB");
        assert_eq!(format_size_mb(2048.0), "2.00 GB");
    }

    #[test]
    fn test_format_elapsed_units() {
        assert_eq!(format_elapsed(chrono::Duration::seconds(7)), "7s");
        assert_eq!(format_elapsed(chrono::Duration::seconds(125)), "2m 05s");
        assert_eq!(format_elapsed(chrono::Duration::seconds(3723)), "1h 02m 03s");
    }

    #[test]
    fn test_run_summary_for_empty_run() {
        let lines = build_run_summary_lines(&RunStatistics::new(), BackendKind::Api);
        assert!(lines.iter().any(|l| l.contains("Backend:     api")));
        assert!(lines.iter().any(|l| l.contains("n/a")));
        assert!(!lines.iter().any(|l| l.starts_with("Failed files")));
        assert!(!lines.iter().any(|l| l.contains("Not started")));
    }

    #[test]
    fn test_plan_lines_follow_dispatch_order() {
        let catalog = TaskCatalog::from_json_str(
            r#"{"repository": "org/d", "download_tasks": [
                {"name": "b", "priority": 2, "files": [{"path": "x/late.bin"}]},
                {"name": "a", "priority": 1, "files": [{"path": "x/early.bin", "size_estimate_mb": 3}]}
            ]}"#,
        )
        .unwrap();
        let lines = build_plan_lines(&catalog.plan(|_| false));
        assert_eq!(lines[0], "2 pending, 0 skipped");
        assert!(lines[1].contains("early.bin"));
        assert!(lines[1].contains("3.0 MB"));
        assert!(lines[2].contains("late.bin"));
    }

    #[test]
    fn test_catalog_summary_lines() {
        let catalog = TaskCatalog::new(fetcher_core::Catalog::template()).unwrap();
        let lines = build_catalog_summary_lines(&catalog.summary());
        assert!(lines[1].contains("metadata"));
        assert!(lines.iter().any(|l| l.starts_with("  Total: 5 files")));
    }
}
