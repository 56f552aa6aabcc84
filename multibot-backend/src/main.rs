use dotenv::dotenv;
use std::sync::Arc;

use multibot_backend::config::{self, Config};
use multibot_backend::db::Database;
use multibot_backend::host::LocalPipeline;
use multibot_backend::identity::RonIdentityFile;
use multibot_backend::models::PresetSourceKind;
use multibot_backend::presets::DirectoryPresetSource;
use multibot_backend::store::SqliteConversationStore;
use multibot_backend::IsolationRuntime;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    log::info!("Using config directory: {:?}", config.config_dir);

    log::info!("Initializing database at {}", config.database_url);
    let db = Database::new(&config.database_url).expect("Failed to initialize database");
    let store = Arc::new(SqliteConversationStore::new(Arc::new(db)));

    let identities_path = config.identities_path();
    let identities = config::load_identities(&identities_path).unwrap_or_else(|e| {
        log::error!("Failed to load identities: {}", e);
        Vec::new()
    });

    let runtime = IsolationRuntime::builder(config.isolation.clone(), store)
        .identities(identities)
        .identity_source(Arc::new(RonIdentityFile::new(identities_path)))
        .preset_source(Arc::new(DirectoryPresetSource::new(
            PresetSourceKind::Chatluna,
            &config.preset_dir,
        )))
        .preset_source(Arc::new(DirectoryPresetSource::new(
            PresetSourceKind::Character,
            &config.character_preset_dir,
        )))
        .build();

    let pipeline = Arc::new(LocalPipeline::new());
    runtime.start(pipeline.clone());

    let summary = runtime.refresh_now().await;
    log::info!(
        "Initial preset refresh: {} presets ({} sources not ready)",
        summary.presets,
        summary.failed_sources.len()
    );

    match runtime.status_report() {
        Ok(report) => println!("{}", report),
        Err(e) => log::warn!("Failed to render status report: {}", e),
    }

    log::info!("Running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    log::info!("Shutting down");
    runtime.shutdown().await;
    Ok(())
}
