use std::{
    fs::Permissions,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use panelcore::{
    config::BackendDescriptor,
    engine::{EngineSupervisor, ProcessState},
    migration::{backup_path, MigrationPipeline},
    storage::{Store, StorePool},
    PanelcoreError,
};
use panelutils::LogRing;
use tempfile::tempdir;

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_sqlite_export_import_round_trip() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let supervisor = helper::missing_engine(temp_dir.path());

    let source_path = temp_dir.path().join("source.db");
    let source = Arc::new(Store::initialize(BackendDescriptor::sqlite(&source_path)).await?);
    helper::populate(&source).await?;
    let expected = source.table_row_counts().await?;

    let exported = MigrationPipeline::new(source.clone(), supervisor.clone())
        .export()
        .await?;

    let target_path = temp_dir.path().join("x-ui.db");
    let target = Arc::new(Store::initialize(BackendDescriptor::sqlite(&target_path)).await?);
    assert_eq!(target.user_count().await?, 1);

    MigrationPipeline::new(target.clone(), supervisor.clone())
        .import(exported)
        .await?;

    assert_eq!(target.table_row_counts().await?, expected);
    assert_eq!(helper::sample_rows(&target).await?, helper::sample_rows(&source).await?);
    assert_eq!(
        helper::sample_rows(&target).await?,
        (
            "vless".to_string(),
            443,
            1024,
            2048,
            "2053".to_string()
        )
    );
    assert!(!backup_path(&target_path).exists());

    // The restart after the pause fails on the missing binary without failing the import.
    assert_eq!(supervisor.state().await, ProcessState::Errored);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_sqlite_import_rejects_dump_and_leaves_file_untouched() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let supervisor = helper::missing_engine(temp_dir.path());

    let live_path = temp_dir.path().join("x-ui.db");
    let store = Arc::new(Store::initialize(BackendDescriptor::sqlite(&live_path)).await?);
    helper::populate(&store).await?;
    store.checkpoint().await?;
    let before = std::fs::read(&live_path)?;

    let mut upload = before.clone();
    upload[0] = b'X';

    let result = MigrationPipeline::new(store.clone(), supervisor.clone())
        .import(upload)
        .await;

    assert!(matches!(result, Err(PanelcoreError::FormatMismatch(_))));
    assert_eq!(std::fs::read(&live_path)?, before);
    assert!(!backup_path(&live_path).exists());

    // Nothing was paused, so nothing was restarted.
    assert_eq!(supervisor.state().await, ProcessState::Stopped);
    assert_eq!(store.user_count().await?, 1);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_sqlite_import_of_unreadable_file_rolls_back() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let supervisor = helper::missing_engine(temp_dir.path());

    let live_path = temp_dir.path().join("x-ui.db");
    let store = Arc::new(Store::initialize(BackendDescriptor::sqlite(&live_path)).await?);
    helper::populate(&store).await?;
    let expected = store.table_row_counts().await?;

    // A valid header followed by an invalid page size.
    let mut upload = b"SQLite format 3\0".to_vec();
    upload.resize(4096, 0);

    let result = MigrationPipeline::new(store.clone(), supervisor)
        .import(upload)
        .await;

    assert!(matches!(
        result,
        Err(PanelcoreError::Import { stage: "verify", .. })
    ));
    assert_eq!(store.table_row_counts().await?, expected);
    assert!(!backup_path(&live_path).exists());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_sqlite_import_failed_copy_restores_live_file() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let upload_dir = temp_dir.path().join("uploads");
    std::fs::create_dir_all(&upload_dir)?;

    // Deleting the staged upload while the engine stops makes the copy into place fail.
    let binary = helper::write_engine(
        temp_dir.path(),
        &format!(
            r#"#!/bin/sh
case "$1" in
    -version) echo "Xray 25.3.6 (Xray, Penetrates Everything.)" ;;
    run) trap 'rm -f {}/dbimport-*; exit 0' TERM; while true; do sleep 1 & wait $!; done ;;
esac
"#,
            upload_dir.display()
        ),
    )?;
    let supervisor = Arc::new(EngineSupervisor::new(
        binary,
        temp_dir.path().join("config.json"),
        LogRing::new(64),
    ));

    let live_path = temp_dir.path().join("x-ui.db");
    let store = Arc::new(Store::initialize(BackendDescriptor::sqlite(&live_path)).await?);
    helper::populate(&store).await?;
    store.checkpoint().await?;
    let before = std::fs::read(&live_path)?;

    let upload = MigrationPipeline::new(store.clone(), supervisor.clone())
        .export()
        .await?;

    supervisor.restart(false).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let result = MigrationPipeline::new(store.clone(), supervisor.clone())
        .with_upload_dir(&upload_dir)
        .import(upload)
        .await;

    assert!(matches!(
        result,
        Err(PanelcoreError::Import { stage: "replace", .. })
    ));
    assert_eq!(std::fs::read(&live_path)?, before);
    assert!(!backup_path(&live_path).exists());
    assert_eq!(store.user_count().await?, 1);
    assert_eq!(supervisor.state().await, ProcessState::Running);

    supervisor.stop().await?;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_sqlite_failed_rollback_still_reopens_store() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let supervisor = helper::missing_engine(temp_dir.path());

    let live_path = temp_dir.path().join("x-ui.db");
    let store = Arc::new(Store::initialize(BackendDescriptor::sqlite(&live_path)).await?);

    // With the live file gone there is no backup to restore from.
    std::fs::remove_file(&live_path)?;

    let mut upload = b"SQLite format 3\0".to_vec();
    upload.resize(4096, 0);

    let result = MigrationPipeline::new(store.clone(), supervisor)
        .import(upload)
        .await;

    assert!(matches!(
        result,
        Err(PanelcoreError::Import { stage: "rollback", .. })
    ));
    assert_eq!(store.user_count().await?, 1);

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Helpers
//--------------------------------------------------------------------------------------------------

mod helper {
    use super::*;

    /// A supervisor whose binary does not exist, so every start fails.
    pub(super) fn missing_engine(dir: &Path) -> Arc<EngineSupervisor> {
        Arc::new(EngineSupervisor::new(
            dir.join("bin").join("xray-linux-amd64"),
            dir.join("bin").join("config.json"),
            LogRing::new(64),
        ))
    }

    pub(super) fn write_engine(dir: &Path, script: &str) -> anyhow::Result<PathBuf> {
        let path = dir.join("xray");
        std::fs::write(&path, script)?;
        std::fs::set_permissions(&path, Permissions::from_mode(0o755))?;
        Ok(path)
    }

    /// The inbound remark and port, the first client's traffic and the web port setting.
    pub(super) async fn sample_rows(
        store: &Store,
    ) -> anyhow::Result<(String, i64, i64, i64, String)> {
        let pool = store.pool().await?;
        let StorePool::Sqlite(pool) = &*pool else {
            anyhow::bail!("expected a sqlite pool");
        };

        let (remark, port): (String, i64) =
            sqlx::query_as("SELECT remark, port FROM inbounds ORDER BY id LIMIT 1")
                .fetch_one(pool)
                .await?;
        let (up, down): (i64, i64) = sqlx::query_as(
            "SELECT up, down FROM client_traffics WHERE email = 'a@example.com'",
        )
        .fetch_one(pool)
        .await?;
        let (web_port,): (String,) =
            sqlx::query_as("SELECT value FROM settings WHERE key = 'webPort'")
                .fetch_one(pool)
                .await?;

        Ok((remark, port, up, down, web_port))
    }

    pub(super) async fn populate(store: &Store) -> anyhow::Result<()> {
        let pool = store.pool().await?;
        let StorePool::Sqlite(pool) = &*pool else {
            anyhow::bail!("expected a sqlite pool");
        };

        sqlx::query(
            "INSERT INTO inbounds (remark, port, protocol, tag) VALUES ('vless', 443, 'vless', 'inbound-443')",
        )
        .execute(pool)
        .await?;
        sqlx::query(
            "INSERT INTO client_traffics (inbound_id, email, up, down) VALUES (1, 'a@example.com', 1024, 2048)",
        )
        .execute(pool)
        .await?;
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES ('webPort', '2053'), ('tgBotEnable', 'false')",
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}
