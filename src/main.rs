//! dockfw - Dock firmware update orchestrator
//!
//! Builds and checks firmware packages and runs update sessions against an
//! emulated dock described by a TOML file. The dock's internal flash and
//! device contents are kept in a state file so consecutive runs see the
//! effects of earlier ones, such as a pending phase 2 or a filled fault log.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.verbose {
        0 => {}
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    match cli.command {
        Commands::Pack {
            manifest,
            output,
            key,
        } => commands::package::cmd_pack(&manifest, &output, key.as_deref()),
        Commands::Validate {
            package,
            public_key,
        } => commands::package::cmd_validate(&package, public_key.as_deref()),
        Commands::Update {
            dock,
            package,
            factory,
            public_key,
            force,
            prefer_factory,
        } => commands::update::cmd_update(
            &dock,
            &commands::update::UpdateOptions {
                package,
                factory,
                public_key,
                force,
                prefer_factory,
            },
        ),
        Commands::Status { dock } => commands::status::cmd_status(&dock),
        Commands::Log { dock } => commands::status::cmd_log(&dock),
        Commands::TriggerPhase2 { dock } => commands::status::cmd_trigger_phase2(&dock),
    }
}
