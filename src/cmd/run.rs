//! Blocking pipeline run in the terminal: `conductor run`.

use anyhow::{Result, bail};
use console::style;

use conductor::config::Config;
use conductor::input::{ScriptedInput, TerminalInput, UserInput};
use conductor::orchestrator::{Orchestrator, RunOptions, RunResult};
use conductor::stage::Agents;

pub struct RunArgs {
    pub request: Option<String>,
    pub no_clean: bool,
    pub answers: Vec<String>,
    pub unattended: bool,
}

/// Run the pipeline to completion. Returns whether every artifact was produced.
pub async fn cmd_run(config: Config, args: RunArgs) -> Result<bool> {
    let unattended = args.unattended || !args.answers.is_empty();
    let request = args.request.unwrap_or_default();
    if unattended && request.trim().is_empty() {
        bail!("Unattended runs need a non-empty --request");
    }

    let agents = Agents::from_config(&config);
    let orchestrator = Orchestrator::new(config, agents)?;

    let mut input: Box<dyn UserInput> = if unattended {
        // Blank answers become the default "proceed with assumptions" turn
        Box::new(ScriptedInput::new(args.answers).with_fallback(""))
    } else {
        Box::new(TerminalInput)
    };

    let options = RunOptions {
        clean_start: !args.no_clean,
    };
    let result = orchestrator
        .run(&request, input.as_mut(), options)
        .await?;

    print_result(&result);
    if let Some(log_file) = orchestrator.log_file() {
        println!("Log file: {}", style(log_file.display()).dim());
    }
    Ok(result.success)
}

fn print_result(result: &RunResult) {
    println!();
    println!("{}", style("Workflow Summary").bold());
    if result.success {
        println!("  Status: {}", style("complete").green().bold());
    } else {
        println!("  Status: {}", style("incomplete").red().bold());
    }
    println!();
    println!("  {:<12} Path", "Artifact");
    println!("  {:<12} ----", "--------");
    for (key, path) in result.artifacts.entries() {
        match path {
            Some(path) => println!("  {:<12} {}", key, path.display()),
            None => println!("  {:<12} {}", key, style("missing").yellow()),
        }
    }
    println!();
    println!("  {}", result.summary);
    println!();
}
