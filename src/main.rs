/*
 * This file is part of multisim.
 *
 * Copyright (C) 2025 multisim contributors
 *
 * multisim is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * multisim is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with multisim. If not, see <https://www.gnu.org/licenses/>.
 */

use std::io::stdout;

use clap::Parser;

use multisim::cli::{run_cli, Cli};
use multisim::logger;

/// Environment variable holding the log filter
const LOG_ENV: &str = "MULTISIM_LOG";

fn main() -> anyhow::Result<()> {
    let log_level = std::env::var(LOG_ENV).unwrap_or_else(|_| "warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(&log_level)
        .init();

    let cli = Cli::parse();

    // Optional JSON-lines event log next to the user config
    if cli.logging {
        logger::init_logging(&logger::default_log_path());
        logger::log_event(
            "startup",
            serde_json::json!({
                "mode": "cli",
                "args": std::env::args().collect::<Vec<_>>(),
            }),
        );
    }

    let result = run_cli(&cli, &mut stdout().lock());

    if cli.logging {
        if let Err(e) = &result {
            logger::log_event("exit_error", serde_json::json!({ "error": format!("{:#}", e) }));
        }
        logger::shutdown_logging();
    }
    result
}
