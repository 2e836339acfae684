//! loopcraft CLI entry point.

mod cli;

use std::io::IsTerminal;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use cli::{Cli, Command, Target};
use loopcraft::diagnostics::{render_parse_error, render_pipeline_error};
use loopcraft::kernel_file::{KernelFile, KernelFileError};
use loopcraft::pipeline::ScheduleOutcome;
use loopcraft::script::parse_script;
use loopcraft::verify::{VerifyOptions, verify};
use loopcraft_passes::TemplateCatalog;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Print { kernel, name } => print_kernels(&kernel, name.as_deref()),
        Command::Schedule {
            kernel,
            script,
            target,
            trace,
            json,
        } => schedule(&kernel, &script, &target).and_then(|(outcome, _)| {
            if json {
                let text = serde_json::to_string_pretty(&outcome).map_err(|e| format!("error: {e}\n"))?;
                println!("{text}");
            } else if trace {
                for (i, entry) in outcome.trace.iter().enumerate() {
                    println!("// step {i}: {}", entry.step);
                    println!("{}\n", entry.kernel);
                }
            } else {
                println!("{}", outcome.scheduled);
            }
            Ok(ExitCode::SUCCESS)
        }),
        Command::Verify {
            kernel,
            script,
            target,
            sizes,
            seed,
            tolerance,
        } => schedule(&kernel, &script, &target).and_then(|(outcome, catalog)| {
            let options = VerifyOptions {
                sizes: sizes.into_iter().collect(),
                seed,
                tolerance,
            };
            let report = verify(&outcome.reference, &outcome.scheduled, &catalog, &options)
                .map_err(|e| format!("error: {e}\n"))?;
            for diff in &report.buffers {
                println!("{}: max |diff| = {}", diff.buffer, diff.max_abs_diff);
            }
            if report.passed() {
                println!("ok: `{}` matches `{}`", outcome.scheduled.name, outcome.reference.name);
                Ok(ExitCode::SUCCESS)
            } else {
                println!(
                    "mismatch: `{}` differs from `{}` by up to {}",
                    outcome.scheduled.name,
                    outcome.reference.name,
                    report.max_abs_diff()
                );
                Ok(ExitCode::FAILURE)
            }
        }),
    };

    match result {
        Ok(code) => code,
        Err(report) => {
            eprint!("{report}");
            ExitCode::FAILURE
        }
    }
}

fn colored() -> bool {
    std::io::stderr().is_terminal()
}

fn read(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("error: cannot read {}: {e}\n", path.display()))
}

fn load(path: &Path) -> Result<KernelFile, String> {
    let text = read(path)?;
    KernelFile::parse(&text).map_err(|e| render_parse_error(&path.display().to_string(), &text, &e, colored()))
}

fn kernel_error(path: &Path, error: KernelFileError) -> String {
    format!("error: {}: {error}\n", path.display())
}

fn print_kernels(path: &Path, name: Option<&str>) -> Result<ExitCode, String> {
    let file = load(path)?;
    match name {
        Some(name) => {
            let kernel = file
                .kernel(Some(name))
                .map_err(|e| kernel_error(path, e))?;
            println!("{kernel}");
        }
        None => {
            let all: Vec<String> = file
                .templates
                .iter()
                .chain(&file.kernels)
                .map(|p| p.to_string())
                .collect();
            println!("{}", all.join("\n\n"));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn schedule(kernel_path: &Path, script_path: &Path, target: &Target) -> Result<(ScheduleOutcome, TemplateCatalog), String> {
    let file = load(kernel_path)?;
    let catalog = file
        .catalog(target.platform)
        .map_err(|e| kernel_error(kernel_path, e))?;
    let kernel = file
        .checked_kernel(target.name.as_deref(), &catalog)
        .map_err(|e| kernel_error(kernel_path, e))?;

    let script_name = script_path.display().to_string();
    let script_text = read(script_path)?;
    let script = parse_script(&script_text).map_err(|e| render_parse_error(&script_name, &script_text, &e, colored()))?;
    tracing::info!(kernel = %kernel.name, steps = script.schedule.len(), "scheduling");

    let outcome = script
        .schedule
        .apply(kernel, &catalog)
        .map_err(|e| render_pipeline_error(&script_name, &script_text, &script, &e, colored()))?;
    Ok((outcome, catalog))
}
