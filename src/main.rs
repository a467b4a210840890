//! Polyaudit CLI entry point.

use clap::Parser;
use polyaudit::cli::{self, Cli, Commands, EXIT_ERROR};

fn main() {
    let cli = Cli::parse();
    cli::init_logging(cli.verbose);
    polyaudit::init();

    let result = match &cli.command {
        Commands::Scan(args) => cli::run_scan(args),
        Commands::Languages => cli::run_languages(),
        Commands::AuditRequest(args) => cli::run_audit_request(args),
    };

    let exit_code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            EXIT_ERROR
        }
    };

    std::process::exit(exit_code);
}
