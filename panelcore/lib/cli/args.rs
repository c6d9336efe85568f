use std::path::PathBuf;

use clap::Parser;

use super::styles;

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// panelctl - Operate the x-ui panel database, metrics and proxy engine
#[derive(Debug, Parser)]
#[command(name = "panelctl", author, about, version, styles=styles::styles())]
pub struct PanelctlArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: Option<PanelctlSubcommand>,

    /// Path to the panel configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available subcommands
#[derive(Debug, Parser)]
pub enum PanelctlSubcommand {
    /// Create the panel schema and the default administrator if missing
    #[command(name = "init")]
    Init,

    /// Print a status snapshot of the host and the engine
    #[command(name = "status")]
    Status {
        /// Keep sampling every SECS seconds
        #[arg(short, long, value_name = "SECS")]
        watch: Option<u64>,
    },

    /// Run the engine in the foreground until interrupted
    #[command(name = "run")]
    Run {
        /// Log a status line every SECS seconds
        #[arg(short, long, value_name = "SECS", default_value_t = 60)]
        interval: u64,
    },

    /// Export the panel database to a file
    #[command(name = "export")]
    Export {
        /// Where to write the export
        #[arg(short, long, value_name = "FILE")]
        out: PathBuf,
    },

    /// Import a SQLite database file or a PostgreSQL dump
    #[command(name = "import")]
    Import {
        /// The file to import
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Manage the engine binary
    #[command(name = "engine")]
    Engine {
        /// The engine subcommand to run
        #[command(subcommand)]
        subcommand: EngineSubcommand,
    },
}

/// Subcommands that act on the engine binary and its output
#[derive(Debug, Parser)]
pub enum EngineSubcommand {
    /// Print the installed engine version
    #[command(name = "version")]
    Version,

    /// List the engine releases that can be installed
    #[command(name = "versions")]
    Versions,

    /// Download and install an engine release
    #[command(name = "update")]
    Update {
        /// The release tag, e.g. v25.3.6
        #[arg(value_name = "VERSION")]
        version: String,
    },

    /// Show recent engine or application log lines
    #[command(name = "logs")]
    Logs {
        /// Number of lines to show
        #[arg(short = 'n', long, default_value_t = 100)]
        count: usize,

        /// Minimum level to show
        #[arg(short = 'L', long, default_value = "info")]
        level: String,

        /// Read from the service journal instead of the in-memory log
        #[arg(long)]
        journal: bool,
    },

    /// Generate an X25519 key pair
    #[command(name = "x25519")]
    X25519,

    /// Print the engine configuration file
    #[command(name = "config")]
    Config,
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_args_are_consistent() {
        PanelctlArgs::command().debug_assert();
    }

    #[test]
    fn test_parse_engine_logs() -> anyhow::Result<()> {
        let args = PanelctlArgs::try_parse_from([
            "panelctl", "engine", "logs", "-n", "20", "--level", "warning", "--journal",
        ])?;

        match args.subcommand {
            Some(PanelctlSubcommand::Engine {
                subcommand:
                    EngineSubcommand::Logs {
                        count,
                        level,
                        journal,
                    },
            }) => {
                assert_eq!(count, 20);
                assert_eq!(level, "warning");
                assert!(journal);
            }
            other => panic!("unexpected subcommand: {other:?}"),
        }

        Ok(())
    }

    #[test]
    fn test_parse_global_config_after_subcommand() -> anyhow::Result<()> {
        let args =
            PanelctlArgs::try_parse_from(["panelctl", "import", "backup.db", "-c", "panel.toml"])?;

        assert_eq!(args.config, Some(PathBuf::from("panel.toml")));
        assert!(matches!(
            args.subcommand,
            Some(PanelctlSubcommand::Import { ref file }) if file == &PathBuf::from("backup.db")
        ));

        Ok(())
    }
}
