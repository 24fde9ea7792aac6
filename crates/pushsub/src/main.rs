// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use pushsub::config::{Cli, Command, Config};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Serve);
    let config = cli.config;

    let valid = match command {
        Command::Serve => config.validate(),
        Command::Uninstall | Command::Status => config.validate_credentials(),
    };
    if let Err(e) = valid {
        eprintln!("error: {e:#}");
        std::process::exit(2);
    }

    init_tracing(&config);

    let result = match command {
        Command::Serve => pushsub::run(config).await,
        Command::Uninstall => print_json(pushsub::uninstall(&config).await),
        Command::Status => print_json(pushsub::status(&config).await),
    };
    if let Err(e) = result {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}

fn print_json<T: serde::Serialize>(value: anyhow::Result<T>) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&value?)?);
    Ok(())
}
