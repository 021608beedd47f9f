//! turnstile CLI
//!
//! Small host surface over the engine: validate step files, check engine
//! configuration and check the container engine.

use std::path::PathBuf;

use turnstile::config::{EngineConfig, Validate};
use turnstile::sandbox::{DockerCli, EnvironmentCheck};
use turnstile::step::analyze_step;

fn usage(program: &str) -> ! {
    eprintln!("Usage: {} <command> [args]", program);
    eprintln!("\nCommands:");
    eprintln!("  validate <step-file>     Validate a step body and print the analysis as JSON");
    eprintln!("  check-config <file>      Validate an engine configuration (TOML)");
    eprintln!("  check-env                Check that the container engine is reachable");
    eprintln!("\nEnvironment variables:");
    eprintln!("  TURNSTILE_DOCKER=<path>  Container CLI to use (default: docker)");
    std::process::exit(2);
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("turnstile");

    let code = match (args.get(1).map(String::as_str), args.get(2)) {
        (Some("validate"), Some(path)) => validate(PathBuf::from(path)),
        (Some("check-config"), Some(path)) => check_config(PathBuf::from(path)),
        (Some("check-env"), None) => check_env().await,
        _ => usage(program),
    };
    std::process::exit(code);
}

fn validate(path: PathBuf) -> i32 {
    let step = match std::fs::read_to_string(&path) {
        Ok(step) => step,
        Err(e) => {
            eprintln!("Failed to read {}: {}", path.display(), e);
            return 2;
        }
    };
    let analysis = analyze_step(&step);
    match serde_json::to_string_pretty(&analysis) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Failed to serialize analysis: {}", e);
            return 2;
        }
    }
    if analysis.is_accepted() {
        tracing::info!(action = %analysis.action.kind, "step accepted");
        0
    } else {
        tracing::warn!(violations = analysis.violations.len(), "step rejected");
        1
    }
}

fn check_config(path: PathBuf) -> i32 {
    let config = match EngineConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return 1;
        }
    };
    let result = config.validate();
    for warning in &result.warnings {
        println!("warning: {}", warning);
    }
    for error in &result.errors {
        println!("error: {}", error);
    }
    if result.is_valid() {
        println!("{}: ok", path.display());
        0
    } else {
        1
    }
}

async fn check_env() -> i32 {
    let engine = match std::env::var("TURNSTILE_DOCKER") {
        Ok(path) => DockerCli::with_cli_path(path),
        Err(_) => DockerCli::new(),
    };
    match engine.check().await {
        Ok(version) => {
            println!("{} server {}", engine.cli_path(), version);
            0
        }
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    }
}
