use std::{path::Path, sync::Arc, time::Duration};

use panelcore::{
    cli::AnsiStyles,
    config::PanelConfig,
    engine::{EngineSupervisor, ProcessState},
    metrics::{HttpIpResolver, MetricsCollector, PublicIpCache, StatusSnapshot},
    migration::MigrationPipeline,
    storage::Store,
    PanelcoreResult,
};
use panelutils::LogRing;
use tokio::signal::unix::{signal, SignalKind};

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

pub async fn init_subcommand(config: &PanelConfig) -> PanelcoreResult<()> {
    let store = Store::initialize(config.backend()?).await?;

    println!("{} {}", "backend:".header(), store.descriptor());
    for (table, rows) in store.table_row_counts().await? {
        println!("  {:<20} {}", table.literal(), rows);
    }

    store.close().await;
    Ok(())
}

pub async fn status_subcommand(
    config: &PanelConfig,
    log_ring: LogRing,
    watch: Option<u64>,
) -> PanelcoreResult<()> {
    let supervisor = Arc::new(EngineSupervisor::from_config(config, log_ring));
    let collector = collector(supervisor)?;

    let mut previous: Option<StatusSnapshot> = None;
    loop {
        let snapshot = collector.sample(previous.as_ref()).await;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);

        let Some(secs) = watch else {
            return Ok(());
        };
        previous = Some(snapshot);

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(secs.max(1))) => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

pub async fn run_subcommand(
    config: &PanelConfig,
    log_ring: LogRing,
    interval: u64,
) -> PanelcoreResult<()> {
    let supervisor = Arc::new(EngineSupervisor::from_config(config, log_ring));
    let collector = collector(supervisor.clone())?;

    supervisor.restart(false).await?;
    tracing::info!("engine started from {}", supervisor.binary_path().display());

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    let mut previous: Option<StatusSnapshot> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = collector.sample(previous.as_ref()).await;
                log_snapshot(&snapshot);
                previous = Some(snapshot);
            }
            _ = hangup.recv() => {
                tracing::info!("received SIGHUP, restarting engine");
                if let Err(e) = supervisor.restart(true).await {
                    tracing::error!(error = %e, "failed to restart engine");
                }
            }
            _ = terminate.recv() => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("stopping engine");
    supervisor.stop().await
}

pub async fn export_subcommand(
    config: &PanelConfig,
    log_ring: LogRing,
    out: &Path,
) -> PanelcoreResult<()> {
    let (store, pipeline) = pipeline(config, log_ring).await?;

    let bytes = pipeline.export().await?;
    tokio::fs::write(out, &bytes).await?;
    println!(
        "{} {} bytes to {}",
        "exported".valid(),
        bytes.len(),
        out.display()
    );

    store.close().await;
    Ok(())
}

pub async fn import_subcommand(
    config: &PanelConfig,
    log_ring: LogRing,
    file: &Path,
) -> PanelcoreResult<()> {
    let supervisor = Arc::new(EngineSupervisor::from_config(config, log_ring));
    let store = Arc::new(Store::initialize(config.backend()?).await?);
    let pipeline = MigrationPipeline::new(store.clone(), supervisor.clone());

    let bytes = tokio::fs::read(file).await?;
    let result = pipeline.import(bytes).await;

    // The engine restarted by the pipeline belongs to this process and would die with it.
    supervisor.stop().await?;
    store.close().await;

    match result {
        Ok(()) => {
            println!("{} {}", "imported".valid(), file.display());
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {}", "import failed:".error(), e);
            Err(e)
        }
    }
}

pub async fn engine_version(config: &PanelConfig, log_ring: LogRing) -> PanelcoreResult<()> {
    let supervisor = EngineSupervisor::from_config(config, log_ring);
    println!("{}", supervisor.version().await?);
    Ok(())
}

pub async fn engine_versions(config: &PanelConfig, log_ring: LogRing) -> PanelcoreResult<()> {
    let supervisor = EngineSupervisor::from_config(config, log_ring);
    for version in supervisor.fetch_available_versions().await? {
        println!("{}", version);
    }
    Ok(())
}

pub async fn engine_update(
    config: &PanelConfig,
    log_ring: LogRing,
    version: &str,
) -> PanelcoreResult<()> {
    let supervisor = Arc::new(EngineSupervisor::from_config(config, log_ring));
    let result = supervisor.replace_binary(version).await;
    supervisor.stop().await?;
    result?;

    println!(
        "{} {} at {}",
        "installed".valid(),
        version,
        supervisor.binary_path().display()
    );
    Ok(())
}

pub async fn engine_logs(
    config: &PanelConfig,
    log_ring: LogRing,
    count: usize,
    level: &str,
    journal: bool,
) {
    let supervisor = EngineSupervisor::from_config(config, log_ring);
    for line in supervisor.read_logs(count, level, journal).await {
        println!("{}", line);
    }
}

pub async fn engine_x25519(config: &PanelConfig, log_ring: LogRing) -> PanelcoreResult<()> {
    let supervisor = EngineSupervisor::from_config(config, log_ring);
    let pair = supervisor.generate_x25519().await?;
    println!("{} {}", "private key:".header(), pair.private_key);
    println!("{} {}", "public key:".header(), pair.public_key);
    Ok(())
}

pub async fn engine_config(config: &PanelConfig, log_ring: LogRing) -> PanelcoreResult<()> {
    let supervisor = EngineSupervisor::from_config(config, log_ring);
    let value = supervisor.config_json().await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn collector(supervisor: Arc<EngineSupervisor>) -> PanelcoreResult<MetricsCollector> {
    let public_ip = Arc::new(PublicIpCache::new(Arc::new(HttpIpResolver::new()?)));
    Ok(MetricsCollector::new(supervisor, public_ip))
}

async fn pipeline(
    config: &PanelConfig,
    log_ring: LogRing,
) -> PanelcoreResult<(Arc<Store>, MigrationPipeline)> {
    let supervisor = Arc::new(EngineSupervisor::from_config(config, log_ring));
    let store = Arc::new(Store::initialize(config.backend()?).await?);
    Ok((store.clone(), MigrationPipeline::new(store, supervisor)))
}

fn log_snapshot(snapshot: &StatusSnapshot) {
    tracing::info!(
        cpu = snapshot.cpu,
        mem = snapshot.mem.current,
        tcp = snapshot.tcp_count,
        up = snapshot.net_io.up,
        down = snapshot.net_io.down,
        "engine {}",
        snapshot.xray.state
    );

    if snapshot.xray.state == ProcessState::Errored {
        tracing::error!("engine failed: {}", snapshot.xray.error_msg);
    }
}
