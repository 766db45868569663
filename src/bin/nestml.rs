use std::fs;

use anyhow::{Context, Result};
use clap::Parser;
use nestml::{check_string, CompilerOptions, IntegrationMethod};

/// checks NESTML neuron models and reports how their equations are integrated
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input filename
    input: String,

    /// Model to check (default: every model in the file)
    #[arg(short, long)]
    model: Option<String>,

    /// Print the solver plan of each model
    #[arg(short, long)]
    plan: bool,

    /// Do not add the propagator entries to the internals block
    #[arg(long)]
    no_inject: bool,

    /// Numerical method for equations without an exact propagator
    #[arg(long, value_enum, default_value_t = IntegrationMethod::Rkf45)]
    method: IntegrationMethod,

    /// Absolute and relative tolerance of the numerical method
    #[arg(short, long)]
    tolerance: Option<f64>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Args::parse();
    let mut options = CompilerOptions {
        numeric_method: cli.method,
        inject_propagators: !cli.no_inject,
        ..CompilerOptions::default()
    };
    if let Some(tolerance) = cli.tolerance {
        options.abs_tolerance = tolerance;
        options.rel_tolerance = tolerance;
    }

    let text = fs::read_to_string(&cli.input)
        .with_context(|| format!("Failed to read {}", cli.input))?;
    let validated = check_string(&text, cli.model.as_deref(), &options)?;
    for model in validated.iter() {
        if !model.warnings.is_empty() {
            eprint!("{}", model.warnings.as_error_message(&text));
        }
        if cli.plan {
            print!("{}", model.plan);
        } else {
            println!("{}: ok", model.model.name);
        }
    }
    Ok(())
}
