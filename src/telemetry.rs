use tracing::info;
use tracing_subscriber::EnvFilter;

/// Initialize tracing for a host app that has no subscriber of its own.
pub fn init_telemetry() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sabaipics_ptpip=debug"));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .try_init()
        .is_ok();

    if installed {
        info!("📊 Telemetry initialized");
    }
}
