//! Working-directory inspection and cleanup: `conductor status` and `conductor clean`.

use anyhow::Result;
use console::style;

use conductor::config::Config;
use conductor::environment::prepare_environment;
use conductor::lock::RunGuard;
use conductor::logging::latest_log_file;

pub fn cmd_status(config: &Config) -> Result<()> {
    let registry = config.registry();
    let artifacts = registry.snapshot();

    println!();
    println!("Working directory: {}", registry.root().display());
    println!();
    println!("{:<12} {:<9} Path", "Artifact", "Status");
    println!("{:<12} {:<9} ----", "--------", "------");
    for (key, path) in artifacts.entries() {
        match path {
            Some(path) => println!(
                "{:<12} {:<9} {}",
                key,
                style("present").green(),
                path.display()
            ),
            None => println!("{:<12} {:<9}", key, style("missing").dim()),
        }
    }
    println!();

    match RunGuard::is_held(registry.root()) {
        Ok(false) => println!("No run in progress."),
        Ok(true) => println!("{}", style("A run is in progress.").yellow()),
        Err(e) => println!("Could not check for a running pipeline: {}", e),
    }

    match latest_log_file(&registry.log_dir()) {
        Some(path) => println!("Latest log: {}", path.display()),
        None => println!("No logs yet."),
    }
    println!();
    Ok(())
}

pub fn cmd_clean(config: &Config) -> Result<()> {
    let registry = config.registry();
    let _guard = RunGuard::acquire(registry.root())?;

    let report = prepare_environment(&registry);

    if report.removed.is_empty() {
        println!("Nothing to clean.");
    }
    for path in &report.removed {
        println!("Removed {}", path.display());
    }
    for skipped in &report.skipped {
        println!(
            "{} {} ({})",
            style("Skipped").yellow(),
            skipped.path.display(),
            skipped.reason
        );
    }
    Ok(())
}
