use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, MethodRouter};
use axum::Json;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    MetricsEncoding(#[from] std::fmt::Error),
    #[error(transparent)]
    HttpResponse(#[from] axum::http::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

/// Events the pipeline reports for metrics collection.
#[derive(Clone, PartialEq, Debug)]
pub enum Msg {
    /// A message was handed to the destination transmitter
    RelaySubmission { relayed: bool },
    /// A fulfillment transaction was confirmed
    Fulfillment,
    /// A run halted in the given stage
    PipelineFailure { stage: String },
}

#[derive(Clone, Debug)]
pub enum Client {
    WithMetrics { metrics: Arc<Metrics> },
    Disabled,
}

impl Client {
    pub fn record_metric(&self, msg: Msg) {
        match self {
            Client::Disabled => (),
            Client::WithMetrics { metrics } => metrics.handle_message(msg),
        }
    }
}

/// Creates the `/metrics` route together with the client that feeds it.
pub fn create_endpoint() -> (MethodRouter, Client) {
    let mut registry = <Registry>::default();
    let metrics = Metrics::new(&mut registry);

    (
        get(serve_metrics).with_state(Arc::new(registry)),
        Client::WithMetrics {
            metrics: Arc::new(metrics),
        },
    )
}

async fn serve_metrics(
    State(registry): State<Arc<Registry>>,
) -> core::result::Result<Response<Body>, Error> {
    let mut buffer = String::new();
    encode(&mut buffer, &registry)?;
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)
        .body(Body::from(buffer))?;
    Ok(response)
}

#[derive(Serialize, Deserialize)]
pub struct Status {
    pub ok: bool,
}

pub async fn status() -> (StatusCode, Json<Status>) {
    (StatusCode::OK, Json(Status { ok: true }))
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct RelayLabel {
    /// relayed: a new relay transaction, already_consumed: the message was relayed before
    result: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct StageLabel {
    stage: String,
}

#[derive(Debug)]
pub struct Metrics {
    relay_submissions: Family<RelayLabel, Counter>,
    fulfillments: Counter,
    pipeline_failures: Family<StageLabel, Counter>,
}

impl Metrics {
    fn new(registry: &mut Registry) -> Self {
        let metrics = Self {
            relay_submissions: Family::default(),
            fulfillments: Counter::default(),
            pipeline_failures: Family::default(),
        };

        registry.register(
            "relay_submissions",
            "number of attested messages handed to the destination transmitter",
            metrics.relay_submissions.clone(),
        );
        registry.register(
            "fulfillments",
            "number of confirmed fulfillment transactions",
            metrics.fulfillments.clone(),
        );
        registry.register(
            "pipeline_failures",
            "number of pipeline runs that halted, by stage",
            metrics.pipeline_failures.clone(),
        );

        metrics
    }

    fn handle_message(&self, msg: Msg) {
        match msg {
            Msg::RelaySubmission { relayed } => {
                let result = if relayed { "relayed" } else { "already_consumed" };
                self.relay_submissions
                    .get_or_create(&RelayLabel {
                        result: result.to_string(),
                    })
                    .inc();
            }
            Msg::Fulfillment => {
                self.fulfillments.inc();
            }
            Msg::PipelineFailure { stage } => {
                self.pipeline_failures
                    .get_or_create(&StageLabel { stage })
                    .inc();
            }
        }
    }
}
