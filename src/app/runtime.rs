use std::io::{self, IsTerminal};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use fetcher_core::catalog::write_template;
use fetcher_core::{
    ConcurrencyScheduler, IntegrityVerifier, RetryPolicy, RunStatistics, StatusStore, TaskCatalog,
    build_backends, select_backend,
};
use tracing::{debug, info, warn};

use crate::ProcessExit;
use crate::app::{output, progress, terminal};
use crate::cli::Args;

pub(crate) async fn run(args: &Args) -> Result<ProcessExit> {
    if args.generate_config {
        terminal::init_tracing(args.default_log_level(), None);
        return generate_config(args);
    }

    let catalog = match load_catalog(args) {
        Ok(catalog) => catalog,
        Err(e) => {
            terminal::init_tracing(args.default_log_level(), None);
            return Err(e);
        }
    };

    let download_dir = catalog.download_dir();
    let (log_file, log_error) = match terminal::open_log_file(&download_dir) {
        Ok(file) => (Some(file), None),
        Err(e) => (None, Some(e)),
    };
    terminal::init_tracing(args.default_log_level(), log_file);
    if let Some(e) = log_error {
        warn!(error = %e, dir = %download_dir.display(), "cannot open run log, logging to stderr only");
    }

    info!(
        catalog = %args.config.display(),
        download_dir = %download_dir.display(),
        "dataset fetcher starting"
    );

    let store = Arc::new(
        StatusStore::open_in(&download_dir, catalog.completed_set())
            .context("cannot open transfer status")?,
    );
    let plan = catalog.plan(|filename| store.is_completed(filename));

    if args.dry_run {
        output::print_plan(&plan);
        return Ok(ProcessExit::Success);
    }

    if !args.quiet {
        output::print_catalog_summary(&catalog.summary());
    }

    if plan.tasks.is_empty() {
        info!(skipped = plan.skipped.len(), "nothing to transfer");
        return Ok(ProcessExit::Success);
    }

    let settings = catalog.settings();
    let candidates = build_backends(
        catalog.transport(),
        catalog.probe_repository(),
        Duration::from_secs(settings.timeout),
    )
    .context("cannot build transfer backends")?;
    let backend = select_backend(candidates).await?;
    let backend_kind = backend.kind();

    let scheduler = ConcurrencyScheduler::for_backend(
        settings.max_concurrent,
        backend_kind,
        RetryPolicy::new(settings.retry_delay_base),
        IntegrityVerifier::default(),
    )?;
    debug!(concurrency = scheduler.concurrency(), backend = %backend_kind, "scheduler ready");

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_signal = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupted_signal.store(true, Ordering::SeqCst);
        }
    });

    let pending = plan.tasks.len();
    let stats = Arc::new(RunStatistics::new());
    let use_spinner = terminal::should_use_spinner(
        io::stderr().is_terminal(),
        args.quiet,
        terminal::is_dumb_terminal(),
    );
    let (progress_handle, progress_stop) =
        progress::spawn_progress_ui(use_spinner, Arc::clone(&stats), pending);

    let result = scheduler
        .run_with_stats(
            plan,
            backend,
            store,
            &download_dir,
            Arc::clone(&stats),
            Arc::clone(&interrupted),
        )
        .await;

    progress_stop.store(true, Ordering::SeqCst);
    if let Some(handle) = progress_handle {
        let _ = handle.await;
    }

    if !args.quiet {
        output::print_run_summary(&stats, backend_kind);
    }
    result.context("transfer run stopped")?;

    if stats.was_interrupted() || interrupted.load(Ordering::SeqCst) {
        warn!(
            completed = stats.completed(),
            pending, "Interrupted. Run again to resume."
        );
    }

    Ok(ProcessExit::Success)
}

fn generate_config(args: &Args) -> Result<ProcessExit> {
    let template = write_template(&args.config, args.force)
        .with_context(|| format!("cannot write catalog template {}", args.config.display()))?;
    info!(path = %args.config.display(), "catalog template written");

    if !args.quiet {
        let catalog = TaskCatalog::new(template).context("generated template is invalid")?;
        output::print_catalog_summary(&catalog.summary());
    }
    Ok(ProcessExit::Success)
}

fn load_catalog(args: &Args) -> Result<TaskCatalog> {
    let catalog = TaskCatalog::load(&args.config)
        .with_context(|| format!("cannot load catalog {}", args.config.display()))?;
    catalog
        .with_overrides(
            args.max_concurrent.map(usize::from),
            args.max_retries,
            args.output_dir.clone(),
        )
        .context("invalid command-line override")
}
