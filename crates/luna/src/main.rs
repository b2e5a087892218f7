// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Luna - cluster controller daemon.
//!
//! This is the binary entry point: the API server, one-shot coordinator
//! runs, status polling and journal administration.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod admin;
mod mother;
mod node;
mod serve;
mod shutdown;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use luna_config::LunaConfig;

/// Luna - cluster controller daemon.
#[derive(Parser, Debug)]
#[command(name = "luna", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the XDG hierarchy.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller: API, dispatcher, janitor and journal push.
    Serve,
    /// Drain one subsystem queue in this process and exit.
    Mother {
        #[arg(long)]
        subsystem: String,
        /// Only run the tasks of this request.
        #[arg(long)]
        request_id: Option<String>,
    },
    /// Print the unread status messages of a request.
    Status {
        request_id: String,
        /// Keep polling until the request finished.
        #[arg(long)]
        follow: bool,
    },
    /// Journal replication by hand.
    Journal {
        #[command(subcommand)]
        action: JournalAction,
    },
    /// High-availability administration.
    Ha {
        #[command(subcommand)]
        action: HaAction,
    },
    /// Configuration helpers.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum JournalAction {
    /// Deliver pending rows to the sibling controllers.
    Push,
    /// Fetch the rows siblings hold for this controller.
    Pull,
    /// Apply inbound rows.
    Handle,
}

#[derive(Subcommand, Debug)]
enum HaAction {
    /// Hand the master role to `host` on every controller.
    SetMaster { host: String },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Validate the configuration and print the resolved values.
    Check {
        /// Print the resolved configuration as TOML.
        #[arg(long)]
        show: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> LunaConfig {
    let loaded = match path {
        Some(path) => luna_config::load_and_validate_path(path),
        None => luna_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => config,
        Err(errors) => {
            luna_config::render_errors(&errors);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("luna: use --help for available commands");
        return;
    };
    let config = load_config(cli.config.as_ref());

    let result = match command {
        Commands::Serve => serve::run_serve(config).await,
        Commands::Mother {
            subsystem,
            request_id,
        } => mother::run_mother(config, &subsystem, request_id.as_deref()).await,
        Commands::Status { request_id, follow } => {
            status::run_status(&config, &request_id, follow).await
        }
        Commands::Journal { action } => match action {
            JournalAction::Push => admin::run_push(config).await,
            JournalAction::Pull => admin::run_pull(config).await,
            JournalAction::Handle => admin::run_handle(config).await,
        },
        Commands::Ha {
            action: HaAction::SetMaster { host },
        } => admin::run_set_master(config, &host).await,
        Commands::Config {
            action: ConfigAction::Check { show },
        } => admin::run_config_check(&config, show),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn mother_takes_subsystem_and_request() {
        let cli = Cli::parse_from([
            "luna",
            "mother",
            "--subsystem",
            "osimage",
            "--request-id",
            "req-123",
        ]);
        match cli.command {
            Some(Commands::Mother {
                subsystem,
                request_id,
            }) => {
                assert_eq!(subsystem, "osimage");
                assert_eq!(request_id.as_deref(), Some("req-123"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn ha_set_master_parses() {
        let cli = Cli::parse_from(["luna", "--config", "/etc/luna.toml", "ha", "set-master", "ctrl2"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/luna.toml")));
        assert!(matches!(
            cli.command,
            Some(Commands::Ha {
                action: HaAction::SetMaster { ref host }
            }) if host == "ctrl2"
        ));
    }
}
