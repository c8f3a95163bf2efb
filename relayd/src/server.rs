use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, MethodRouter};
use axum::{Json, Router};
use error_stack::{Report, Result, ResultExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::attestation::fees::Quote;
use crate::attestation::AttestationClient;
use crate::evm::{Fulfiller, MessageReceiver};
use crate::monitoring;
use crate::pipeline::{self, parse_u256, Pipeline, RelayOutcome, Stage};
use crate::report::LoggableError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to start server")]
    Start,
    #[error("server failed while running")]
    WhileRunning,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(default)]
pub struct Config {
    pub bind_address: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 3000).into(),
        }
    }
}

struct AppState<A, R, F> {
    pipeline: Arc<Pipeline<A, R, F>>,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl<A, R, F> Clone for AppState<A, R, F> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            token: self.token.clone(),
            tracker: self.tracker.clone(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayRequest {
    source_domain: i64,
    tx_hash: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteParams {
    source_domain: i64,
    item_id: String,
    quantity: String,
}

#[derive(Serialize)]
struct Success<T> {
    ok: bool,
    #[serde(flatten)]
    body: T,
}

#[derive(Serialize)]
struct Failure {
    ok: bool,
    error: String,
    /// Absent when the run panicked, since the stage it reached is unknown
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<Stage>,
}

fn success<T: Serialize>(body: T) -> Response {
    (StatusCode::OK, Json(Success { ok: true, body })).into_response()
}

fn failure(status: StatusCode, error: String, stage: Option<Stage>) -> Response {
    (
        status,
        Json(Failure {
            ok: false,
            error,
            stage,
        }),
    )
        .into_response()
}

fn failure_from_report(err: &Report<pipeline::Error>) -> Response {
    let context = err.current_context();
    let status = if context.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    failure(
        status,
        LoggableError::from(err).to_string(),
        Some(context.stage()),
    )
}

/// Serves the pipeline entry point, the quote endpoint and the monitoring endpoints.
pub struct Server {
    router: Router,
    tracker: TaskTracker,
}

impl Server {
    /// Runs of the pipeline observe `token`, so they stop waiting for attestations on shutdown.
    pub fn new<A, R, F>(
        pipeline: Arc<Pipeline<A, R, F>>,
        metrics: MethodRouter,
        token: CancellationToken,
    ) -> Self
    where
        A: AttestationClient + 'static,
        R: MessageReceiver + 'static,
        F: Fulfiller + 'static,
    {
        let tracker = TaskTracker::new();
        let state = AppState {
            pipeline,
            token,
            tracker: tracker.clone(),
        };

        let router = Router::new()
            .route("/relay-and-process", post(relay_and_process::<A, R, F>))
            .route("/quote", get(quote::<A, R, F>))
            .with_state(state)
            .route("/status", get(monitoring::status))
            .route("/metrics", metrics)
            .layer(TraceLayer::new_for_http());

        Self { router, tracker }
    }

    /// Serves until `cancel` is triggered, then waits for in-flight runs to finish.
    pub async fn run(self, config: &Config, cancel: CancellationToken) -> Result<(), Error> {
        let listener = TcpListener::bind(config.bind_address)
            .await
            .change_context(Error::Start)
            .attach_printable(config.bind_address)?;

        self.serve(listener, cancel).await
    }

    async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> Result<(), Error> {
        info!(
            address = listener
                .local_addr()
                .change_context(Error::Start)?
                .to_string(),
            "starting server"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
                info!("shutting down server")
            })
            .await
            .change_context(Error::WhileRunning)?;

        self.tracker.close();
        self.tracker.wait().await;

        Ok(())
    }
}

async fn relay_and_process<A, R, F>(
    State(state): State<AppState<A, R, F>>,
    body: core::result::Result<Json<RelayRequest>, JsonRejection>,
) -> Response
where
    A: AttestationClient + 'static,
    R: MessageReceiver + 'static,
    F: Fulfiller + 'static,
{
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return failure(
                StatusCode::BAD_REQUEST,
                rejection.body_text(),
                Some(Stage::Input),
            )
        }
    };

    let source = match state
        .pipeline
        .source_ref(request.source_domain, &request.tx_hash)
    {
        Ok(source) => source,
        Err(err) => return failure_from_report(&err),
    };

    // a run that was started finishes even if the client goes away
    let pipeline = state.pipeline.clone();
    let token = state.token.clone();
    let run = state
        .tracker
        .spawn(async move { pipeline.run(source, &token).await });

    match run.await {
        Ok(Ok(outcome)) => success::<RelayOutcome>(outcome),
        Ok(Err(err)) => failure_from_report(&err),
        Err(err) => {
            error!(err = err.to_string(), "pipeline run aborted");
            failure(StatusCode::INTERNAL_SERVER_ERROR, err.to_string(), None)
        }
    }
}

async fn quote<A, R, F>(
    State(state): State<AppState<A, R, F>>,
    params: core::result::Result<Query<QuoteParams>, QueryRejection>,
) -> Response
where
    A: AttestationClient + 'static,
    R: MessageReceiver + 'static,
    F: Fulfiller + 'static,
{
    let params = match params {
        Ok(Query(params)) => params,
        Err(rejection) => {
            return failure(
                StatusCode::BAD_REQUEST,
                rejection.body_text(),
                Some(Stage::Input),
            )
        }
    };

    match quote_params(&state.pipeline, params).await {
        Ok(quote) => success::<Quote>(quote),
        Err(err) => failure_from_report(&err),
    }
}

async fn quote_params<A, R, F>(
    pipeline: &Pipeline<A, R, F>,
    params: QuoteParams,
) -> Result<Quote, pipeline::Error>
where
    A: AttestationClient,
    R: MessageReceiver,
    F: Fulfiller,
{
    let source_domain = pipeline.source_domain(params.source_domain)?;
    let item_id = parse_u256("itemId", &params.item_id)?;
    let quantity = parse_u256("quantity", &params.quantity)?;

    pipeline.quote(source_domain, item_id, quantity).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum_test::TestServer;
    use error_stack::report;
    use ethers_core::types::U256;
    use serde_json::{json, Value};

    use super::*;
    use crate::attestation::fees::FeeRow;
    use crate::attestation::test_utils::complete_record;
    use crate::attestation::MockAttestationClient;
    use crate::evm::{self, MockFulfiller, MockMessageReceiver, Submission};
    use crate::pipeline::test_utils::{hook, payload, pipeline, TX_HASH};
    use crate::types::Hash;

    fn attested(destination_domain: u32) -> MockAttestationClient {
        let mut client = MockAttestationClient::new();
        client.expect_messages().returning(move |domain, _| {
            Ok(vec![complete_record(domain, destination_domain, hook(), &payload())])
        });
        client
    }

    fn relaying(submission: Submission) -> MockMessageReceiver {
        let mut receiver = MockMessageReceiver::new();
        receiver
            .expect_receive_message()
            .returning(move |_, _| Ok(submission));
        receiver
    }

    fn fulfilling() -> MockFulfiller {
        let mut fulfiller = MockFulfiller::new();
        fulfiller
            .expect_fulfill()
            .returning(|_| Ok(Hash::repeat_byte(0xbb)));
        fulfiller
            .expect_item_price()
            .returning(|_| Ok(U256::from(5_000_000)));
        fulfiller
    }

    fn fees() -> MockAttestationClient {
        let mut client = MockAttestationClient::new();
        client.expect_burn_fees().returning(|_, _| {
            Ok(vec![FeeRow {
                finality_threshold: Some(1000),
                minimum_fee: Some(1.0),
            }])
        });
        client
    }

    fn test_server(
        client: MockAttestationClient,
        receiver: MockMessageReceiver,
        fulfiller: MockFulfiller,
    ) -> TestServer {
        let (metrics, _) = monitoring::create_endpoint();
        let server = Server::new(
            Arc::new(pipeline(client, receiver, fulfiller)),
            metrics,
            CancellationToken::new(),
        );

        TestServer::new(server.router).unwrap()
    }

    async fn post_relay(server: &TestServer, body: Value) -> (StatusCode, Value) {
        let response = server.post("/relay-and-process").json(&body).await;

        (response.status_code(), response.json::<Value>())
    }

    #[tokio::test(start_paused = true)]
    async fn relay_and_process_should_report_fulfilled_purchase() {
        let server = test_server(
            attested(6),
            relaying(Submission::Relayed(Hash::repeat_byte(0xaa))),
            fulfilling(),
        );

        let (status, body) =
            post_relay(&server, json!({ "sourceDomain": 0, "txHash": TX_HASH })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], json!(true));
        assert_eq!(body["relayed"], json!(true));
        assert_eq!(body["relayReference"], json!(format!("{:#x}", Hash::repeat_byte(0xaa))));
        assert_eq!(body["fulfillReference"], json!(format!("{:#x}", Hash::repeat_byte(0xbb))));
        assert_eq!(body["fulfillmentParams"]["itemId"], json!("1"));
        assert_eq!(body["fulfillmentParams"]["quantity"], json!("1"));
        assert_eq!(body["fulfillmentParams"]["memo"], json!("gatee"));
    }

    #[tokio::test(start_paused = true)]
    async fn relay_and_process_should_omit_relay_reference_for_replays() {
        let server = test_server(
            attested(6),
            relaying(Submission::AlreadyConsumed),
            fulfilling(),
        );

        let (status, body) =
            post_relay(&server, json!({ "sourceDomain": 0, "txHash": TX_HASH })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["relayed"], json!(false));
        assert!(body.get("relayReference").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn relay_and_process_should_reject_mismatched_destination() {
        let server = test_server(attested(5), MockMessageReceiver::new(), MockFulfiller::new());

        let (status, body) =
            post_relay(&server, json!({ "sourceDomain": 0, "txHash": TX_HASH })).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], json!(false));
        assert_eq!(body["stage"], json!("validating"));
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("destination domain mismatch: 5 != 6"));
    }

    #[tokio::test]
    async fn relay_and_process_should_reject_invalid_input() {
        let server = test_server(
            MockAttestationClient::new(),
            MockMessageReceiver::new(),
            MockFulfiller::new(),
        );

        for body in [
            json!({ "sourceDomain": 0, "txHash": "0x1234" }),
            json!({ "sourceDomain": -1, "txHash": TX_HASH }),
            json!({ "sourceDomain": 42, "txHash": TX_HASH }),
            json!({ "sourceDomain": "zero", "txHash": TX_HASH }),
            json!({ "txHash": TX_HASH }),
        ] {
            let (status, response) = post_relay(&server, body.clone()).await;

            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(response["ok"], json!(false));
            assert_eq!(response["stage"], json!("input"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn relay_and_process_should_fail_with_server_error_on_relay_failure() {
        let mut receiver = MockMessageReceiver::new();
        receiver.expect_receive_message().returning(|_, _| {
            Err(report!(evm::Error::Submission {
                reason: "insufficient funds for gas".to_string(),
            }))
        });
        let server = test_server(attested(6), receiver, MockFulfiller::new());

        let (status, body) =
            post_relay(&server, json!({ "sourceDomain": 0, "txHash": TX_HASH })).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["stage"], json!("relaying"));
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("insufficient funds for gas"));
    }

    #[tokio::test]
    async fn relay_and_process_should_not_name_a_stage_when_run_panics() {
        let mut client = MockAttestationClient::new();
        client
            .expect_messages()
            .returning(|_, _| panic!("attestation client bug"));
        let server = test_server(client, MockMessageReceiver::new(), MockFulfiller::new());

        let (status, body) =
            post_relay(&server, json!({ "sourceDomain": 0, "txHash": TX_HASH })).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["ok"], json!(false));
        assert!(body.get("stage").is_none());
        assert!(body["error"].as_str().unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn quote_should_return_grossed_up_amount() {
        let server = test_server(fees(), MockMessageReceiver::new(), fulfilling());

        let response = server
            .get("/quote")
            .add_query_param("sourceDomain", 0)
            .add_query_param("itemId", 1)
            .add_query_param("quantity", 2)
            .await;

        response.assert_status_ok();
        assert_eq!(
            response.json::<Value>(),
            json!({ "ok": true, "net": "10000000", "feeBps": 1, "gross": "10001001" })
        );
    }

    #[tokio::test]
    async fn quote_should_reject_malformed_parameters() {
        let server = test_server(
            MockAttestationClient::new(),
            MockMessageReceiver::new(),
            MockFulfiller::new(),
        );

        let response = server
            .get("/quote")
            .add_query_param("sourceDomain", 0)
            .add_query_param("itemId", "one")
            .add_query_param("quantity", 2)
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["stage"], json!("input"));
    }

    #[tokio::test]
    async fn status_should_report_ok() {
        let server = test_server(
            MockAttestationClient::new(),
            MockMessageReceiver::new(),
            MockFulfiller::new(),
        );

        let response = server.get("/status").await;

        response.assert_status_ok();
        assert_eq!(response.json::<Value>(), json!({ "ok": true }));
    }

    #[tokio::test]
    async fn server_should_shut_down_when_cancelled() {
        let (metrics, _) = monitoring::create_endpoint();
        let server = Server::new(
            Arc::new(pipeline(
                MockAttestationClient::new(),
                MockMessageReceiver::new(),
                MockFulfiller::new(),
            )),
            metrics,
            CancellationToken::new(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(server.serve(listener, cancel.clone()));
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(result.unwrap().unwrap().is_ok());
    }
}
