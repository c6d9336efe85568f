mod handlers;

use clap::{CommandFactory, Parser};
use panelcore::{
    cli::{EngineSubcommand, PanelctlArgs, PanelctlSubcommand},
    config::PanelConfig,
    PanelcoreResult,
};
use panelutils::LogRing;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

type FilterHandle = reload::Handle<EnvFilter, Registry>;

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> PanelcoreResult<()> {
    let args = PanelctlArgs::parse();
    let log_ring = LogRing::default();
    let filter = init_tracing(&log_ring, args.verbose);

    let config = PanelConfig::load(args.config.as_deref())?;
    apply_log_config(&config, &log_ring, filter.as_ref());

    match args.subcommand {
        Some(PanelctlSubcommand::Init) => {
            handlers::init_subcommand(&config).await?;
        }
        Some(PanelctlSubcommand::Status { watch }) => {
            handlers::status_subcommand(&config, log_ring, watch).await?;
        }
        Some(PanelctlSubcommand::Run { interval }) => {
            handlers::run_subcommand(&config, log_ring, interval).await?;
        }
        Some(PanelctlSubcommand::Export { out }) => {
            handlers::export_subcommand(&config, log_ring, &out).await?;
        }
        Some(PanelctlSubcommand::Import { file }) => {
            handlers::import_subcommand(&config, log_ring, &file).await?;
        }
        Some(PanelctlSubcommand::Engine { subcommand }) => match subcommand {
            EngineSubcommand::Version => handlers::engine_version(&config, log_ring).await?,
            EngineSubcommand::Versions => handlers::engine_versions(&config, log_ring).await?,
            EngineSubcommand::Update { version } => {
                handlers::engine_update(&config, log_ring, &version).await?
            }
            EngineSubcommand::Logs {
                count,
                level,
                journal,
            } => handlers::engine_logs(&config, log_ring, count, &level, journal).await,
            EngineSubcommand::X25519 => handlers::engine_x25519(&config, log_ring).await?,
            EngineSubcommand::Config => handlers::engine_config(&config, log_ring).await?,
        },
        None => {
            PanelctlArgs::command().print_help()?;
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: *
//--------------------------------------------------------------------------------------------------

/// Logs to stderr and to `log_ring` before the configuration is read.
///
/// Returns a handle to the level filter unless `RUST_LOG` or `verbose` already fixed it.
fn init_tracing(log_ring: &LogRing, verbose: bool) -> Option<FilterHandle> {
    let from_env = EnvFilter::try_from_default_env().ok();
    let fixed = from_env.is_some() || verbose;
    let initial =
        from_env.unwrap_or_else(|| EnvFilter::new(if verbose { "debug" } else { "info" }));
    let (filter, handle) = reload::Layer::new(initial);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_level(true),
        )
        .with(log_ring.layer())
        .init();

    (!fixed).then_some(handle)
}

/// Applies the configured log level and in-memory log size.
fn apply_log_config(config: &PanelConfig, log_ring: &LogRing, filter: Option<&FilterHandle>) {
    log_ring.set_capacity(*config.get_log_ring_capacity());

    if let Some(filter) = filter {
        let level = config.get_log_level().as_str();
        if let Err(e) = filter.reload(EnvFilter::new(level)) {
            tracing::warn!(error = %e, "failed to apply log level {}", level);
        }
    }
}
