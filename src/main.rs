use std::process::ExitCode;

use booksync::config::{CliArgs, Command, Config};
use booksync::error::AppError;
use booksync::{build_frame, builtin_registry, draw_counter, logging, open_session, providers_table, ProviderRegistry};
use clap::Parser;

fn main() -> ExitCode {
    let cli = CliArgs::parse();
    let config = Config::load(&cli);
    logging::init(&config.logging);

    let registry = builtin_registry(config.registry.resolve_policy);
    let result = run(&cli.command, &config, &registry);
    registry.shutdown();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: &Command, config: &Config, registry: &ProviderRegistry) -> Result<(), AppError> {
    match command {
        Command::Providers => {
            providers_table(registry).printstd();
        }
        Command::Counter { name, count } => {
            let mut session = open_session(config, registry)?;
            tracing::info!(location = session.fullpath(), name = %name, count, "Drawing counter values");
            for _ in 0..*count {
                println!("{}", draw_counter(&mut session, name)?);
            }
            session.end()?;
        }
        Command::Slots { assignments, json } => {
            let frame = build_frame(assignments.as_slice())?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&frame)?);
            } else {
                println!("{}", frame);
            }
        }
    }
    Ok(())
}
