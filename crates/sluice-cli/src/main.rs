//! Sluice CLI - branch sync and pull request merging for bare git repositories.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod events;
mod output;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);
    output::set_quiet(cli.global.quiet);

    let global = cli.global;
    let result = match cli.command {
        Commands::Init => commands::init::run(&global),
        Commands::User(cmd) => commands::user::run(&global, cmd),
        Commands::Repo(cmd) => commands::repo::run(&global, cmd),
        Commands::Sync { repo, all, json } => {
            commands::sync::run(&global, repo.as_deref(), all, json).await
        }
        Commands::Branches { repo, all, json } => {
            commands::branches::run(&global, &repo, all, json)
        }
        Commands::Protect(args) => commands::protect::run(&global, &args),
        Commands::Pr(cmd) => commands::pr::run(&global, cmd),
        Commands::Status(cmd) => commands::status::run(&global, cmd),
        Commands::Conflicts {
            repo,
            base,
            head,
            json,
        } => commands::conflicts::run(&global, &repo, &base, &head, json),
        Commands::Hook(cmd) => commands::hook::run(&global, cmd),
        Commands::Completions { shell } => commands::completions::run(shell),
    };

    if let Err(e) = result {
        output::error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

/// Log to stderr, filtered by `SLUICE_LOG` (default `warn`); `-v` forces `debug`.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("SLUICE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
