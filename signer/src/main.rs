// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # FIRS Signer
//!
//! Entry point for the `firs-signer` binary. Parses CLI arguments,
//! initializes logging and dispatches to a subcommand:
//!
//! - `sign`: seal an IRN + certificate payload for the authority
//! - `irn`: generate or validate an IRN
//! - `keygen`: provision development key material
//! - `stamp`: stamp an invoice JSON file
//! - `verify`: verify a stamped invoice JSON file
//! - `version`: print build version information
//!
//! Any failure prints one `error:` line on stderr and exits non-zero.

mod cli;
mod commands;
mod logging;

use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::Parser;

use cli::{Commands, FirsSignerCli};
use logging::LogFormat;

fn main() -> ExitCode {
    let cli = FirsSignerCli::parse();
    logging::init_logging(&cli.log_level, LogFormat::from_str_lossy(&cli.log_format));

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // `{:#}` keeps the whole context chain on one line.
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Sign(args) => {
            let summary = commands::sign(&args)?;
            println!("{}", summary.irn);
            println!("wrote {} files to {}", summary.files.len(), args.out_dir.display());
        }
        Commands::Irn(args) => println!("{}", commands::irn_action(&args.action)?),
        Commands::Keygen(args) => {
            for path in commands::keygen(&args)? {
                println!("{}", path.display());
            }
        }
        Commands::Stamp(args) => {
            let stamped = commands::stamp(&args)?;
            if args.out.is_none() {
                println!("{}", serde_json::to_string_pretty(&stamped)?);
            }
        }
        Commands::Verify(args) => {
            let outcome = commands::verify(&args)?;
            println!("{}", serde_json::to_string(&outcome)?);
            if let Some(reason) = outcome.reason {
                bail!("stamp verification failed: {reason}");
            }
        }
        Commands::Version => print_version(),
    }
    Ok(())
}

fn print_version() {
    println!("firs-signer {}", env!("CARGO_PKG_VERSION"));
    println!("firs-stamp  {}", firs_stamp::config::CRATE_VERSION);
    println!("protocol    {}", firs_stamp::config::PROTOCOL_VERSION);
}
