use crate::hub::BroadcastHub;
use crate::metrics::Metrics;
use crate::protocol::NotAvailableResponse;
use crate::snapshot::{SnapshotError, SnapshotService};
use crate::state::HostInfo;
use crate::stream;
use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub snapshots: SnapshotService,
    pub hub: Arc<BroadcastHub>,
    pub host: Arc<HostInfo>,
}

pub fn build_router(
    metrics: Arc<Metrics>,
    snapshots: SnapshotService,
    hub: Arc<BroadcastHub>,
    host: Arc<HostInfo>,
) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/system", get(system_handler))
        .route("/api/application", get(application_handler))
        // older dashboards still poll the bot path
        .route("/api/bot", get(application_handler))
        .route("/api/combined", get(combined_handler))
        .route("/api/history", get(history_handler))
        .route("/api/host", get(host_handler))
        .route("/ws", get(ws_handler))
        .with_state(HttpAppState {
            metrics,
            snapshots,
            hub,
            host,
        })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("ошибка кодирования метрик: {err}"),
        )
            .into_response(),
    }
}

async fn system_handler(State(state): State<HttpAppState>) -> Response {
    snapshot_response(state.snapshots.system())
}

async fn application_handler(State(state): State<HttpAppState>) -> Response {
    snapshot_response(state.snapshots.application())
}

async fn combined_handler(State(state): State<HttpAppState>) -> Response {
    snapshot_response(state.snapshots.combined())
}

async fn history_handler(State(state): State<HttpAppState>) -> Response {
    snapshot_response(state.snapshots.history())
}

async fn host_handler(State(state): State<HttpAppState>) -> Json<HostInfo> {
    Json(state.host.as_ref().clone())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<HttpAppState>) -> Response {
    let hub = state.hub;
    ws.on_upgrade(move |socket| stream::serve_socket(socket, hub))
}

fn snapshot_response<T: Serialize>(result: Result<T, SnapshotError>) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(NotAvailableResponse::new(err.to_string())),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CombinedResponse, HistoryResponse};
    use crate::snapshot::StateCell;
    use crate::state::{fixtures, ApplicationSnapshot, PublishedState, SystemSnapshot};
    use axum::body::to_bytes;
    use axum::extract::ws::close_code;
    use axum::http::Request;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tower::ServiceExt;

    struct Fixture {
        metrics: Arc<Metrics>,
        cell: StateCell,
        hub: Arc<BroadcastHub>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_hub(8, Duration::from_secs(2))
        }

        fn with_hub(queue_capacity: usize, send_timeout: Duration) -> Self {
            let metrics = Metrics::new().expect("инициализация метрик");
            let hub = Arc::new(BroadcastHub::new(
                queue_capacity,
                send_timeout,
                metrics.clone(),
            ));
            Self {
                metrics,
                cell: StateCell::new(60),
                hub,
            }
        }

        fn router(&self) -> Router {
            build_router(
                self.metrics.clone(),
                self.cell.reader(),
                self.hub.clone(),
                Arc::new(HostInfo {
                    host_name: Some("node-1".to_string()),
                    architecture: "x86_64".to_string(),
                    cpu_logical_cores: 8,
                    ..HostInfo::default()
                }),
            )
        }

        fn publish(&self, secs: i64, cpu: f64) {
            let state = Arc::new(fixtures::published(secs, cpu));
            self.cell.swap(state.clone());
            self.hub.publish(state);
        }
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let fixture = Fixture::new();
        let (status, body) = get(fixture.router(), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn metrics_contains_readings() {
        let fixture = Fixture::new();
        fixture
            .metrics
            .update_from_state(&fixtures::published(0, 12.0));

        let (status, body) = get(fixture.router(), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("statusd_cpu_usage_percent 12"));
        assert!(text.contains("statusd_scrape_count_total 1"));
    }

    #[tokio::test]
    async fn queries_before_first_tick_are_unavailable() {
        let fixture = Fixture::new();
        for uri in [
            "/api/system",
            "/api/application",
            "/api/bot",
            "/api/combined",
            "/api/history",
        ] {
            let (status, body) = get(fixture.router(), uri).await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{uri}");
            let parsed: NotAvailableResponse = serde_json::from_slice(&body).unwrap();
            assert_eq!(parsed.error, "not_yet_available");
        }
    }

    #[tokio::test]
    async fn queries_return_last_published_state() {
        let fixture = Fixture::new();
        fixture.publish(5, 55.5);

        let (status, body) = get(fixture.router(), "/api/system").await;
        assert_eq!(status, StatusCode::OK);
        let system: SystemSnapshot = serde_json::from_slice(&body).unwrap();
        assert_eq!(system, fixtures::system(5, 55.5));

        let (_, body) = get(fixture.router(), "/api/bot").await;
        let application: ApplicationSnapshot = serde_json::from_slice(&body).unwrap();
        assert_eq!(application, fixtures::application(5));

        let (_, body) = get(fixture.router(), "/api/combined").await;
        let combined: CombinedResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(combined.system.captured_at, combined.application.captured_at);

        let (_, body) = get(fixture.router(), "/api/history").await;
        let history: HistoryResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(history.capacity, 60);
        assert_eq!(history.points.len(), 1);
    }

    #[tokio::test]
    async fn host_info_is_served_before_first_tick() {
        let fixture = Fixture::new();
        let (status, body) = get(fixture.router(), "/api/host").await;
        assert_eq!(status, StatusCode::OK);
        let host: HostInfo = serde_json::from_slice(&body).unwrap();
        assert_eq!(host.host_name.as_deref(), Some("node-1"));
        assert_eq!(host.cpu_logical_cores, 8);
    }

    async fn serve(fixture: &Fixture) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = fixture.router();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn next_text<S>(socket: &mut S) -> serde_json::Value
    where
        S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
                .await
                .expect("frame in time")
                .expect("stream open")
                .expect("valid frame");
            if let WsMessage::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn websocket_sends_initial_then_updates() {
        let fixture = Fixture::new();
        fixture.publish(1, 10.0);
        let addr = serve(&fixture).await;

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();

        let initial = next_text(&mut socket).await;
        assert_eq!(initial["type"], "initial");
        assert_eq!(initial["system"]["cpu_percent"], 10.0);
        assert_eq!(fixture.hub.len(), 1);

        fixture.publish(2, 20.0);
        let update = next_text(&mut socket).await;
        assert_eq!(update["type"], "update");
        assert_eq!(update["system"]["cpu_percent"], 20.0);

        socket.close(None).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !fixture.hub.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("subscriber unregistered after close");
    }

    #[tokio::test]
    async fn websocket_answers_ping_and_ignores_client_text() {
        let fixture = Fixture::new();
        fixture.publish(1, 10.0);
        let addr = serve(&fixture).await;

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        let _ = next_text(&mut socket).await;

        socket
            .send(WsMessage::Text("hello".to_string()))
            .await
            .unwrap();
        socket.send(WsMessage::Ping(vec![7, 7])).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("pong in time")
            .expect("stream open")
            .unwrap();
        assert_eq!(frame, WsMessage::Pong(vec![7, 7]));
        assert_eq!(fixture.hub.len(), 1);
    }

    async fn wait_until(what: &str, condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    }

    #[tokio::test]
    async fn client_that_stops_reading_is_dropped_after_send_timeout() {
        let fixture = Fixture::with_hub(64, Duration::from_millis(300));
        let addr = serve(&fixture).await;

        // about 1 MiB per frame, so the burst outgrows the loopback socket buffers
        let name = "x".repeat(1 << 20);
        let burst: Vec<Arc<PublishedState>> = (1..=32)
            .map(|secs| {
                let mut state = fixtures::published(secs, 5.0);
                state.application.name = Some(name.clone());
                Arc::new(state)
            })
            .collect();

        let (_silent, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        wait_until("subscriber registration", || fixture.hub.len() == 1).await;

        for state in burst {
            fixture.hub.publish(state);
        }
        wait_until("subscriber drop", || fixture.hub.is_empty()).await;

        let dropped = |reason: &str| {
            fixture
                .metrics
                .statusd_subscribers_dropped_total
                .with_label_values(&[reason])
                .get()
        };
        assert_eq!(dropped("send_timeout"), 1.0);
        assert_eq!(dropped("stalled"), 0.0);
        assert_eq!(dropped("queue_full"), 0.0);
    }

    #[tokio::test]
    async fn websocket_is_closed_when_hub_shuts_down() {
        let fixture = Fixture::new();
        fixture.publish(1, 10.0);
        let addr = serve(&fixture).await;

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        let _ = next_text(&mut socket).await;

        fixture.hub.close_all();

        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("close in time");
        match frame {
            Some(Ok(WsMessage::Close(Some(close)))) => {
                assert_eq!(u16::from(close.code), close_code::AWAY)
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn websocket_refused_after_shutdown() {
        let fixture = Fixture::new();
        fixture.hub.close_all();
        let addr = serve(&fixture).await;

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("close in time");
        assert!(matches!(frame, Some(Ok(WsMessage::Close(_))) | None));
    }
}
