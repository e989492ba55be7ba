use std::sync::Arc;

use cuwhapp_orchestrator::config::OrchestratorConfig;
use cuwhapp_orchestrator::features::observability::controller::ObservabilityController;
use cuwhapp_orchestrator::features::remote_execution::repo::OpenSshTransport;
use cuwhapp_orchestrator::Orchestrator;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cuwhapp_orchestrator=info,info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = OrchestratorConfig::from_env()?;

    info!(
        listen_addr = %config.listen_addr,
        waha_host = %config.waha_host.address,
        user_host = %config.user_host.address,
        "Starting cuwhapp orchestrator"
    );

    let observability = Arc::new(ObservabilityController::with_new_registry()?);
    let transport = Arc::new(OpenSshTransport::new(config.connect_timeout));
    let orchestrator = Orchestrator::build(&config, transport, observability);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(listen_addr = %config.listen_addr, "Orchestrator listening");
    axum::serve(listener, orchestrator.app()).await?;

    Ok(())
}
