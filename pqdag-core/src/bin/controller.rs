//! Controller service binary
//!
//! Exposes fragmentation, allocation, cluster and query operations as JSON
//! over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use pqdag_core::cluster::QueryRequest;
use pqdag_core::status::{
    AllocationResponse, ClusterStatus, FragmentationResult, QueryExecutionResponse,
};
use pqdag_core::{ControlConfig, ControlPlane};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

type Plane = State<Arc<ControlPlane>>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FragmentationRequest {
    #[serde(default = "clean_by_default")]
    clean_after: bool,
}

fn clean_by_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartAllocationRequest {
    dataset: String,
    num_machines: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DistributeRequest {
    dataset: String,
    #[serde(default)]
    clean_after: bool,
}

#[derive(Debug, Deserialize)]
struct SetDatasetRequest {
    dataset: String,
}

#[derive(Debug, Serialize)]
struct CurrentDataset {
    dataset: Option<String>,
}

fn code(success: bool) -> StatusCode {
    if success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn allocation(response: AllocationResponse) -> (StatusCode, Json<AllocationResponse>) {
    (code(response.status.is_success()), Json(response))
}

fn cluster(status: ClusterStatus) -> (StatusCode, Json<ClusterStatus>) {
    (code(status.is_success()), Json(status))
}

async fn start_fragmentation(
    State(plane): Plane,
    req: Option<Json<FragmentationRequest>>,
) -> (StatusCode, Json<FragmentationResult>) {
    // A missing body cleans the inputs afterwards
    let clean_after = req.map_or(true, |Json(req)| req.clean_after);
    let result = plane.pipeline().start_fragmentation(clean_after).await;
    (code(result.is_success()), Json(result))
}

async fn start_allocation(
    State(plane): Plane,
    Json(req): Json<StartAllocationRequest>,
) -> (StatusCode, Json<AllocationResponse>) {
    allocation(plane.pipeline().start_allocation(&req.dataset, req.num_machines).await)
}

async fn distribute(
    State(plane): Plane,
    Json(req): Json<DistributeRequest>,
) -> (StatusCode, Json<AllocationResponse>) {
    allocation(plane.pipeline().distribute_fragments(&req.dataset, req.clean_after).await)
}

async fn results(
    State(plane): Plane,
    Path(dataset): Path<String>,
) -> (StatusCode, Json<AllocationResponse>) {
    allocation(plane.pipeline().get_results(&dataset).await)
}

async fn start_cluster(State(plane): Plane) -> (StatusCode, Json<ClusterStatus>) {
    cluster(plane.cluster().start().await)
}

async fn stop_cluster(State(plane): Plane) -> (StatusCode, Json<ClusterStatus>) {
    cluster(plane.cluster().stop().await)
}

async fn restart_cluster(State(plane): Plane) -> (StatusCode, Json<ClusterStatus>) {
    cluster(plane.cluster().restart().await)
}

async fn clear_processes(State(plane): Plane) -> (StatusCode, Json<ClusterStatus>) {
    cluster(plane.cluster().clear_processes().await)
}

async fn set_dataset(
    State(plane): Plane,
    Json(req): Json<SetDatasetRequest>,
) -> (StatusCode, Json<ClusterStatus>) {
    cluster(plane.datasets().set_dataset(&req.dataset).await)
}

async fn current_dataset(State(plane): Plane) -> Json<CurrentDataset> {
    Json(CurrentDataset {
        dataset: plane.datasets().current_dataset().await,
    })
}

async fn execute_query(
    State(plane): Plane,
    Json(req): Json<QueryRequest>,
) -> (StatusCode, Json<QueryExecutionResponse>) {
    let response = plane.queries().execute_query(&req).await;
    (code(response.status.is_success()), Json(response))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting PQDAG controller");

    let config = ControlConfig::from_env()?;
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());
    let addr: SocketAddr = bind_addr.parse()?;

    info!(
        "Workspace {}, control host {}, sandbox {}",
        config.layout.workspace_root.display(),
        config.cluster.control_host,
        config.sandbox.container
    );
    let plane = Arc::new(ControlPlane::with_process_executor(config));

    let app = Router::new()
        .route("/api/fragmentation/start", post(start_fragmentation))
        .route("/api/allocation/start", post(start_allocation))
        .route("/api/allocation/distribute", post(distribute))
        .route("/api/allocation/results/:dataset", get(results))
        .route("/api/cluster/start", post(start_cluster))
        .route("/api/cluster/stop", post(stop_cluster))
        .route("/api/cluster/restart", post(restart_cluster))
        .route("/api/cluster/clear", post(clear_processes))
        .route("/api/cluster/dataset", get(current_dataset).post(set_dataset))
        .route("/api/query/execute", post(execute_query))
        .route("/metrics", get(|| async { pqdag_core::metrics::gather_system_metrics() }))
        .layer(CorsLayer::permissive())
        .with_state(plane.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Controller listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    plane.shutdown().await;
    Ok(())
}
