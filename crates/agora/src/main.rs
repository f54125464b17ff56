// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use agora::config::Config;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(err) = config.validate() {
        eprintln!("error: {err}");
        std::process::exit(2);
    }

    agora::run::init_tracing();

    match agora::run::run(config).await {
        Ok(outcome) => std::process::exit(outcome.exit_code),
        Err(err) => {
            error!("fatal: {err:#}");
            std::process::exit(4);
        }
    }
}
