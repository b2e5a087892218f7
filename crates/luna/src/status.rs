// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `luna status` command implementation.
//!
//! Reads the status channel straight from the database, so it also works
//! while `luna serve` is down.

use std::io::IsTerminal;
use std::time::Duration;

use luna_config::LunaConfig;
use luna_core::LunaError;
use luna_mother::{MESSAGE_SEPARATOR, StatusChannel};
use luna_storage::Database;

const FOLLOW_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run_status(config: &LunaConfig, request_id: &str, follow: bool) -> Result<(), LunaError> {
    let db = Database::open(&config.storage).await?;
    let status = StatusChannel::new(db);
    let use_color = std::io::stdout().is_terminal();

    let mut seen_any = false;
    loop {
        match status.get_status(request_id).await? {
            Some(report) => {
                seen_any = true;
                for line in split_lines(&report.message) {
                    print_line(line, use_color);
                }
                if report.complete {
                    print_done(use_color);
                    return Ok(());
                }
            }
            None if seen_any => return Ok(()),
            None => {
                return Err(LunaError::Queue(format!("no status for request {request_id}")));
            }
        }
        if !follow {
            return Ok(());
        }
        tokio::time::sleep(FOLLOW_INTERVAL).await;
    }
}

fn split_lines(message: &str) -> impl Iterator<Item = &str> {
    message.split(MESSAGE_SEPARATOR).filter(|l| !l.is_empty())
}

fn print_line(line: &str, use_color: bool) {
    if use_color && (line.contains(" failed") || line.contains(" aborted")) {
        use colored::Colorize;
        println!("{}", line.red());
    } else {
        println!("{line}");
    }
}

fn print_done(use_color: bool) {
    if use_color {
        use colored::Colorize;
        println!("{}", "done".green());
    } else {
        println!("done");
    }
}
