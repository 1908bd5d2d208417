use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use emuexec::commands::{
    analyze_command, init_workspace_command, list_architectures_command, show_analysis_command,
    workspace_info_command, AnalyzeArgs,
};

/// Multi-architecture emulated execution probe for extracted firmware files.
///
/// This CLI is a thin wrapper around `emuexec-core` (exposed in code as `emuexec_core`).
/// All substantive logic lives in the library so it can be tested thoroughly
/// and reused from other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "emuexec",
    version,
    about = "Probe firmware binaries under user-mode emulation",
    long_about = None
)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize a workspace at the given root.
    ///
    /// This will:
    /// - Create a `.emuexec` metadata directory and a `reports` directory.
    /// - Write a default `.emuexec/config.json` (kept if already present).
    /// - Create the results database.
    Init {
        /// Workspace root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,
    },

    /// Show the engine configuration and stored analyses of a workspace.
    Info {
        #[arg(long, default_value = ".")]
        root: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Run every file of a manifest under its candidate architectures.
    Analyze {
        #[arg(long, default_value = ".")]
        root: String,

        /// JSON or YAML list of `{path, uid?, candidate_architectures?}` entries.
        #[arg(long)]
        manifest: String,

        /// Top-level firmware uid to store the result under. Defaults to the manifest's uid.
        #[arg(long)]
        firmware_uid: Option<String>,

        /// Mark the firmware as a container whose children are analyzed separately.
        #[arg(long, default_value_t = false)]
        parent: bool,

        /// Candidate architecture for files without hints (repeatable).
        #[arg(long = "arch")]
        architectures: Vec<String>,

        /// Invocation option to try (repeatable; pass "" for no argument).
        #[arg(long = "option", allow_hyphen_values = true)]
        options: Vec<String>,

        /// Per-attempt timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,

        /// Skip the syscall-traced run.
        #[arg(long, default_value_t = false)]
        no_trace: bool,

        /// Library prefix passed to the emulator (`-L`).
        #[arg(long)]
        library_root: Option<PathBuf>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print the stored result for a firmware uid.
    Show {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long)]
        firmware_uid: String,

        #[arg(long, default_value_t = false)]
        json: bool,

        /// Render syscall traces as text.
        #[arg(long, default_value_t = false)]
        decompress_traces: bool,
    },

    /// List the architecture to emulator table.
    Architectures {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    emuexec_core::logging::init_tracing(cli.verbose);

    match cli.command {
        Command::Init { root } => init_workspace_command(&root)?,
        Command::Info { root, json } => workspace_info_command(&root, json)?,
        Command::Analyze {
            root,
            manifest,
            firmware_uid,
            parent,
            architectures,
            options,
            timeout,
            no_trace,
            library_root,
            json,
        } => analyze_command(&AnalyzeArgs {
            root,
            manifest,
            firmware_uid,
            parent,
            architectures,
            options,
            timeout_secs: timeout,
            no_trace,
            library_root,
            json,
        })?,
        Command::Show { root, firmware_uid, json, decompress_traces } => {
            show_analysis_command(&root, &firmware_uid, json, decompress_traces)?
        }
        Command::Architectures { root, json } => list_architectures_command(&root, json)?,
    }

    Ok(())
}
