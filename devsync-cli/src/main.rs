//! DevSync: pull remote changes and run the commands your rules map them to.
//!
//! # Usage
//!
//! ```text
//! devsync [--workdir <dir>] [--config <file>] <command>
//! devsync init [--email <addr>] [--interval <secs>] [--force]
//! devsync match <files...> [--json]
//! devsync run [--yes]
//! devsync daemon start [--paused] | stop | status
//! devsync start | stop
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, init::InitArgs, matches::MatchArgs, run::RunArgs, Workspace,
};

#[derive(Parser, Debug)]
#[command(
    name = "devsync",
    version,
    about = "Poll a git remote and run commands for the files each pull changes",
    long_about = None,
)]
struct Cli {
    /// Working copy to sync. Defaults to the current directory.
    #[arg(long, global = true, value_name = "DIR")]
    workdir: Option<PathBuf>,

    /// Config file. Defaults to <workdir>/devsync.yaml, then the user config dir.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a starter devsync.yaml into the working copy.
    Init(InitArgs),

    /// Show which commands a set of changed files would trigger.
    Match(MatchArgs),

    /// Run one sync cycle now, in the foreground.
    Run(RunArgs),

    /// Run or query the polling daemon for this working copy.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Resume polling in a running daemon.
    Start,

    /// Pause polling in a running daemon. An in-flight cycle finishes.
    Stop,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let workspace = Workspace::resolve(cli.workdir, cli.config)?;
    match cli.command {
        Commands::Init(args) => args.run(&workspace),
        Commands::Match(args) => args.run(&workspace),
        Commands::Run(args) => args.run(&workspace),
        Commands::Daemon { command } => commands::daemon::run(command, &workspace),
        Commands::Start => commands::daemon::set_polling(&workspace, true),
        Commands::Stop => commands::daemon::set_polling(&workspace, false),
    }
}
