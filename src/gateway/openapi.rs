//! OpenAPI Documentation
//!
//! - OpenAPI JSON: `http://localhost:8080/api-docs/openapi.json`

use utoipa::OpenApi;

use crate::core_types::{LedgerRecord, TransactionDetails};
use crate::gateway::handlers::HealthResponse;
use crate::sequencer::{LedgerStatsSnapshot, LedgerStatus};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Transfer Ledger API",
        version = "1.0.0",
        description = "Ordered ledger of money-transfer requests, each settled by a compensating saga."
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::gateway::handlers::create_transfer,
        crate::gateway::handlers::demo_transfer,
        crate::gateway::handlers::get_history,
        crate::gateway::handlers::health_check,
    ),
    components(
        schemas(
            TransactionDetails,
            LedgerRecord,
            HealthResponse,
            LedgerStatus,
            LedgerStatsSnapshot,
        )
    ),
    tags(
        (name = "Transfer", description = "Submit transfers and read the ledger"),
        (name = "System", description = "Health and build information"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_service_paths() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        assert!(paths.iter().any(|p| p.as_str() == "/v1/service/transfer"));
        assert!(paths.iter().any(|p| p.as_str() == "/v1/service/history"));
        assert!(paths.iter().any(|p| p.as_str() == "/v1/service/health"));

        let json = serde_json::to_string(&doc).unwrap();
        assert!(json.contains("TransactionDetails"));
    }
}
