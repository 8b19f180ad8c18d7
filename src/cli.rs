use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Output format for `arch status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormatArg {
    /// Human-readable tables.
    #[default]
    Table,
    /// Machine-readable JSON snapshot.
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "arch",
    about = "Harness that coordinates a team of parallel coding agents against one repository",
    version,
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the Orchestrator startup pipeline in the foreground and block
    /// until shutdown.
    Init {
        /// Path to the project's YAML configuration document.
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Keep agent workspaces on disk after shutdown for post-mortem
        /// inspection. Overrides `keep_workspaces` in the config file.
        #[arg(long)]
        keep_workspaces: bool,
    },

    /// Print a read-only snapshot of agents, messages, and pending
    /// decisions from a running instance's state directory.
    Status {
        /// State directory of the running instance.
        #[arg(long, short = 'd', default_value = "./state", env = "ARCH_STATE_DIR")]
        state_dir: PathBuf,

        #[arg(long, value_enum, default_value = "table")]
        output_format: OutputFormatArg,
    },

    /// Append a message to the log addressed to an agent, `archie`, or
    /// `broadcast`.
    ///
    /// Writes directly into the state directory through the same
    /// `StateStore` type the running process uses; safe only because the
    /// store's single-writer discipline tolerates a short-lived second
    /// writer for an append-only operation. A future dashboard should route
    /// this through the Tool Server's HTTP surface instead.
    Send {
        /// State directory of the running instance.
        #[arg(long, short = 'd', default_value = "./state", env = "ARCH_STATE_DIR")]
        state_dir: PathBuf,

        /// Recipient agent id, `archie`, or `broadcast`.
        #[arg(value_name = "RECIPIENT")]
        recipient: String,

        /// Message body.
        #[arg(value_name = "CONTENT")]
        content: String,
    },

    /// Send SIGTERM to the pid recorded in `arch.pid`, triggering the
    /// running instance's shutdown sequence.
    Down {
        /// State directory of the running instance.
        #[arg(long, short = 'd', default_value = "./state", env = "ARCH_STATE_DIR")]
        state_dir: PathBuf,
    },

    /// Generate shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

pub fn print_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    clap_complete::generate(shell, &mut Cli::command(), "arch", &mut std::io::stdout());
}
