use crate::cli::ServeArgs;
use crate::infra::{AppState, StaticContractDirectory, TracingAuditSink, TracingNotificationSink};
use crate::routes::with_approval_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use contract_approval::config::{AppConfig, StorageBackend, WorkflowConfig};
use contract_approval::error::AppError;
use contract_approval::telemetry;
use contract_approval::workflows::contract_approval::{
    ApprovalApi, ApprovalQueryService, ApprovalRepository, ApprovalStepPolicy,
    ApprovalWorkflowService, InMemoryApprovalStore, SledApprovalStore,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(storage) = args.storage.take() {
        config.storage.backend = StorageBackend::parse(&storage)?;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let contracts = match &config.storage.contracts_path {
        Some(path) => StaticContractDirectory::from_json_file(path)?,
        None => StaticContractDirectory::seeded(),
    };
    info!(contracts = contracts.len(), "contract directory loaded");

    let app = match config.storage.backend {
        StorageBackend::Memory => {
            approval_app(Arc::new(InMemoryApprovalStore::default()), contracts, &config.workflow)
        }
        StorageBackend::Sled => {
            let store = SledApprovalStore::open(&config.storage.sled_path)?;
            info!(path = %config.storage.sled_path.display(), "sled approval store opened");
            approval_app(Arc::new(store), contracts, &config.workflow)
        }
    }
    .layer(Extension(app_state))
    .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, backend = ?config.storage.backend, "contract approval service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Wires one repository into both services so reads and writes share the persisted model.
fn approval_app<R>(
    store: Arc<R>,
    contracts: StaticContractDirectory,
    workflow: &WorkflowConfig,
) -> axum::Router
where
    R: ApprovalRepository + 'static,
{
    let policy = ApprovalStepPolicy::new(workflow.policy.clone());
    let api = ApprovalApi {
        workflow: Arc::new(ApprovalWorkflowService::new(
            store.clone(),
            Arc::new(contracts),
            Arc::new(TracingAuditSink::default()),
            Arc::new(TracingNotificationSink::default()),
            policy.clone(),
        )),
        queries: Arc::new(ApprovalQueryService::new(
            store,
            policy,
            workflow.max_page_size,
        )),
    };
    with_approval_routes(api)
}
