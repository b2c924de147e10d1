//! coinpool service entry point
//!
//! Bootstraps configuration and logging, opens the claim state store and
//! serves line-delimited JSON requests from stdin until EOF or Ctrl-C.

use std::sync::Arc;

use coinpool_core::SystemClock;
use coinpool_selection::TokenSelectionDelegatedProcessor;
use coinpool_service::{init_tracing, serve, Service, ServiceResult, ServiceSettings, TelemetryConfig};
use coinpool_storage::InMemoryLedgerTokens;
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> ServiceResult<()> {
    init_tracing(&TelemetryConfig::default())?;

    let settings = ServiceSettings::from_env()?;
    let state_store = settings.store.open()?;
    let ledger = Arc::new(InMemoryLedgerTokens::new());
    let processor = TokenSelectionDelegatedProcessor::from_config(
        &settings.coinpool,
        state_store,
        ledger.clone(),
        Arc::new(SystemClock),
    )?;
    let service = Arc::new(Service::new(processor, ledger));

    tracing::info!(
        store = ?settings.store,
        commit_mode = %settings.coinpool.commit_mode,
        claim_expiry_secs = settings.coinpool.claim_expiry.as_secs(),
        page_size = settings.coinpool.refill_page_size,
        "Starting coinpool service"
    );

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    tokio::select! {
        result = serve(service, stdin, stdout) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }
    Ok(())
}
