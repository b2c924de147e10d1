//! coinpool Service
//!
//! Reads one JSON request per line, runs it through the claim coordinator
//! and writes one JSON line per reply or dead letter. Requests are processed
//! concurrently; replies carry the request id, not the input order.

pub mod error;
pub mod settings;
pub mod telemetry;

use std::sync::Arc;

use coinpool_core::{TokenEvent, TokenPoolKey};
use coinpool_selection::{
    TokenSelectionDelegatedProcessor, WireEvent, WireOutcome, WireRequest, WireResponse,
};
use coinpool_storage::InMemoryLedgerTokens;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;

pub use error::{ServiceError, ServiceResult};
pub use settings::{ServiceSettings, StoreSettings};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};

// ============================================================================
// OUTPUT
// ============================================================================

/// One line of service output.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputLine {
    Reply {
        response: WireResponse,
    },
    DeadLetter {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<WireResponse>,
    },
}

impl OutputLine {
    fn from_outcome(outcome: WireOutcome) -> Option<Self> {
        match outcome {
            WireOutcome::Reply(response) => Some(OutputLine::Reply { response }),
            WireOutcome::NoReply => None,
            WireOutcome::DeadLetter { reason, response } => {
                Some(OutputLine::DeadLetter { reason, response })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeStats {
    pub processed: usize,
    pub replied: usize,
    pub dead_lettered: usize,
}

// ============================================================================
// SERVICE
// ============================================================================

/// The processor plus the in-process ledger it pages from.
pub struct Service {
    processor: TokenSelectionDelegatedProcessor,
    ledger: Arc<InMemoryLedgerTokens>,
}

impl Service {
    pub fn new(processor: TokenSelectionDelegatedProcessor, ledger: Arc<InMemoryLedgerTokens>) -> Self {
        Self { processor, ledger }
    }

    pub fn processor(&self) -> &TokenSelectionDelegatedProcessor {
        &self.processor
    }

    /// Handle one input line.
    ///
    /// A ledger change is committed to the ledger before the cache hears of
    /// it, so a page-in racing the event cannot resurrect consumed tokens.
    pub async fn handle_line(&self, line: &[u8]) -> WireOutcome {
        if let Ok(request) = WireRequest::decode(line) {
            if matches!(request.event, WireEvent::LedgerChange { .. }) {
                self.mirror_ledger_change(&request);
            }
        }
        self.processor.process_wire(line).await
    }

    fn mirror_ledger_change(&self, request: &WireRequest) {
        // Invalid changes are dead-lettered by the processor.
        let Ok(TokenEvent::LedgerChange(change)) = request.to_event() else {
            return;
        };
        if let Err(e) = self
            .ledger
            .apply_change(&change.pool_key, change.produced, change.consumed.iter())
        {
            tracing::error!(pool = %change.pool_key, error = %e, "failed to apply ledger change");
        }
    }

    pub fn ledger_token_count(&self, pool_key: &TokenPoolKey) -> usize {
        self.ledger.token_count(pool_key)
    }
}

/// Serve requests from `reader` until EOF, writing output to `writer`.
pub async fn serve<R, W>(service: Arc<Service>, reader: R, mut writer: W) -> ServiceResult<ServeStats>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut in_flight = JoinSet::new();
    let mut stats = ServeStats::default();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let service = Arc::clone(&service);
        in_flight.spawn(async move { service.handle_line(line.as_bytes()).await });

        while let Some(done) = in_flight.try_join_next() {
            write_outcome(&mut writer, done, &mut stats).await?;
        }
    }

    while let Some(done) = in_flight.join_next().await {
        write_outcome(&mut writer, done, &mut stats).await?;
    }
    writer.flush().await?;

    tracing::info!(
        processed = stats.processed,
        replied = stats.replied,
        dead_lettered = stats.dead_lettered,
        "input exhausted"
    );
    Ok(stats)
}

async fn write_outcome<W>(
    writer: &mut W,
    done: Result<WireOutcome, tokio::task::JoinError>,
    stats: &mut ServeStats,
) -> ServiceResult<()>
where
    W: AsyncWrite + Unpin,
{
    stats.processed += 1;
    let outcome = match done {
        Ok(outcome) => outcome,
        Err(e) => {
            // The request's own transform is panic-isolated; this is a bug in
            // the wire path itself.
            tracing::error!(error = %e, "request task failed");
            WireOutcome::DeadLetter {
                reason: format!("request task failed: {}", e),
                response: None,
            }
        }
    };

    let Some(line) = OutputLine::from_outcome(outcome) else {
        return Ok(());
    };
    match &line {
        OutputLine::Reply { .. } => stats.replied += 1,
        OutputLine::DeadLetter { .. } => stats.dead_lettered += 1,
    }

    let mut bytes = serde_json::to_vec(&line)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinpool_core::SystemClock;
    use coinpool_storage::InMemoryPoolStateStore;
    use coinpool_test_utils::fixtures;
    use serde_json::{json, Value};

    fn service() -> Arc<Service> {
        let pool = fixtures::pool_key();
        let ledger = fixtures::ledger_with(&pool, fixtures::five_five_five());
        let processor = TokenSelectionDelegatedProcessor::from_config(
            &fixtures::test_config(),
            Arc::new(InMemoryPoolStateStore::new()),
            ledger.clone(),
            Arc::new(SystemClock),
        )
        .unwrap();
        Arc::new(Service::new(processor, ledger))
    }

    fn line(request_id: &str, event: Value) -> String {
        json!({"request_id": request_id, "event": event}).to_string()
    }

    async fn run(service: Arc<Service>, input: &str) -> (ServeStats, Vec<Value>) {
        let mut output = Vec::new();
        let stats = serve(service, input.as_bytes(), &mut output).await.unwrap();
        let values = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        (stats, values)
    }

    #[tokio::test]
    async fn test_serves_replies_and_dead_letters() {
        let input = [
            line(
                "req-1",
                json!({"kind": "ClaimQuery", "pool_key": fixtures::pool_key(), "target_amount": "7"}),
            ),
            String::new(),
            "not json".to_string(),
            line(
                "req-2",
                json!({"kind": "LedgerChange", "pool_key": fixtures::pool_key(), "produced": [], "consumed": []}),
            ),
        ]
        .join("\n");

        let (stats, output) = run(service(), &input).await;
        assert_eq!(
            stats,
            ServeStats {
                processed: 3,
                replied: 1,
                dead_lettered: 1
            }
        );

        let reply = output
            .iter()
            .find(|v| v["type"] == "reply")
            .expect("claim reply");
        assert_eq!(reply["response"]["request_id"], "req-1");
        assert_eq!(reply["response"]["payload"]["granted"], true);
        assert!(output.iter().any(|v| v["type"] == "dead_letter"));
    }

    #[tokio::test]
    async fn test_ledger_change_reaches_the_ledger() {
        let service = service();
        let pool = fixtures::pool_key();
        let input = line(
            "req-1",
            json!({
                "kind": "LedgerChange",
                "pool_key": pool,
                "produced": [{"state_ref": "tx-7:0", "amount": "3"}],
                "consumed": ["tx-0:0", "tx-1:0"]
            }),
        );

        let (stats, output) = run(Arc::clone(&service), &input).await;
        assert_eq!(stats.processed, 1);
        assert!(output.is_empty());
        assert_eq!(service.ledger_token_count(&pool), 2);
    }
}
