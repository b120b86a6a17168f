use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use url::Url;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use periscope_session::{
    ConnectionState, HttpSignaling, ResourceReaper, SessionConfig, SessionError,
    SessionNegotiator, SignalingBackend, SignalingRequest, WebRtcPeerFactory,
};

const TEST_TIMEOUT: Duration = Duration::from_secs(20);
const OFFER: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

#[derive(Debug, Clone)]
struct SeenRequest {
    src: Option<String>,
    content_type: Option<String>,
    body: String,
}

#[derive(Clone, Default)]
struct Recorder {
    seen: Arc<AsyncMutex<Vec<SeenRequest>>>,
}

impl Recorder {
    async fn record(&self, query: &HashMap<String, String>, headers: &HeaderMap, body: &str) {
        self.seen.lock().await.push(SeenRequest {
            src: query.get("src").cloned(),
            content_type: headers
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
            body: body.to_string(),
        });
    }
}

async fn serve(router: Router) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Url::parse(&format!("http://{addr}")).expect("base url")
}

fn request(source: &str) -> SignalingRequest {
    SignalingRequest {
        source_id: source.into(),
        offer_sdp: OFFER.into(),
    }
}

#[tokio::test]
async fn posts_offer_as_sdp_with_source_query() {
    let recorder = Recorder::default();
    let router = Router::new()
        .route(
            "/api/webrtc",
            post(
                |State(recorder): State<Recorder>,
                 Query(query): Query<HashMap<String, String>>,
                 headers: HeaderMap,
                 body: String| async move {
                    recorder.record(&query, &headers, &body).await;
                    "v=0\r\nanswer\r\n"
                },
            ),
        )
        .with_state(recorder.clone());
    let base = serve(router).await;
    let signaling = HttpSignaling::new(base).expect("client");

    let answer = timeout(TEST_TIMEOUT, signaling.exchange(&request("cam3")))
        .await
        .expect("exchange finished")
        .expect("answer");

    assert_eq!(answer, "v=0\r\nanswer\r\n");
    let seen = recorder.seen.lock().await.clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].src.as_deref(), Some("cam3"));
    assert_eq!(seen[0].content_type.as_deref(), Some("application/sdp"));
    assert_eq!(seen[0].body, OFFER);
}

#[tokio::test]
async fn server_error_surfaces_status_and_body() {
    let router = Router::new().route(
        "/api/webrtc",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error") }),
    );
    let signaling = HttpSignaling::new(serve(router).await).expect("client");

    let err = timeout(TEST_TIMEOUT, signaling.exchange(&request("cam1")))
        .await
        .expect("exchange finished")
        .expect_err("500 is an error");

    assert_eq!(
        err,
        SessionError::Signaling {
            status: 500,
            body: "Internal Server Error".into()
        }
    );
}

#[tokio::test]
async fn refused_connection_is_a_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr: SocketAddr = listener.local_addr().expect("local addr");
    drop(listener);
    let base = Url::parse(&format!("http://{addr}")).expect("base url");
    let signaling = HttpSignaling::new(base).expect("client");

    let err = timeout(TEST_TIMEOUT, signaling.exchange(&request("cam1")))
        .await
        .expect("exchange finished")
        .expect_err("nothing listening");

    assert!(matches!(err, SessionError::Network(_)), "{err:?}");
}

#[tokio::test]
async fn invalid_answer_fails_negotiation_with_sdp_error() {
    let router = Router::new().route("/api/webrtc", post(|| async { "INVALID_SDP_FORMAT" }));
    let base = serve(router).await;
    let negotiator = SessionNegotiator::new(
        Arc::new(WebRtcPeerFactory::new().expect("factory")),
        Arc::new(HttpSignaling::new(base).expect("client")),
    );
    let config = SessionConfig::new("cam1").with_ice_servers(Vec::<String>::new());

    let err = timeout(
        TEST_TIMEOUT,
        negotiator.negotiate(&config, 1, &CancellationToken::new()),
    )
    .await
    .expect("negotiation finished")
    .expect_err("malformed answer");

    assert!(matches!(err, SessionError::Sdp(_)), "{err:?}");
}

#[derive(Clone, Default)]
struct Answerer {
    peers: Arc<AsyncMutex<Vec<Arc<RTCPeerConnection>>>>,
}

async fn answer_offer(
    State(answerer): State<Answerer>,
    offer: String,
) -> Result<String, (StatusCode, String)> {
    let internal = |err: webrtc::Error| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string());

    let mut media = MediaEngine::default();
    media.register_default_codecs().map_err(internal)?;
    let registry = register_default_interceptors(Registry::new(), &mut media).map_err(internal)?;
    let api = APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(registry)
        .build();
    let pc = Arc::new(
        api.new_peer_connection(RTCConfiguration::default())
            .await
            .map_err(internal)?,
    );

    let offer = RTCSessionDescription::offer(offer)
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;
    pc.set_remote_description(offer).await.map_err(internal)?;
    let answer = pc.create_answer(None).await.map_err(internal)?;
    let mut gathered = pc.gathering_complete_promise().await;
    pc.set_local_description(answer).await.map_err(internal)?;
    let _ = gathered.recv().await;

    let sdp = pc
        .local_description()
        .await
        .map(|desc| desc.sdp)
        .ok_or_else(|| (StatusCode::INTERNAL_SERVER_ERROR, "no answer".to_string()))?;
    answerer.peers.lock().await.push(pc);
    Ok(sdp)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn negotiates_against_webrtc_answerer() {
    let answerer = Answerer::default();
    let router = Router::new()
        .route("/api/webrtc", post(answer_offer))
        .with_state(answerer.clone());
    let base = serve(router).await;
    let negotiator = SessionNegotiator::new(
        Arc::new(WebRtcPeerFactory::new().expect("factory")),
        Arc::new(HttpSignaling::new(base).expect("client")),
    );
    let config = SessionConfig::new("cam1").with_ice_servers(Vec::<String>::new());

    let mut session = timeout(
        TEST_TIMEOUT,
        negotiator.negotiate(&config, 1, &CancellationToken::new()),
    )
    .await
    .expect("negotiation finished")
    .expect("negotiated");

    assert!(matches!(
        session.state(),
        ConnectionState::Negotiating | ConnectionState::Connected
    ));
    let offer = session.local_description().expect("offer recorded");
    assert!(offer.contains("m=video") && offer.contains("m=audio"));
    assert!(session.remote_description().is_some());
    assert_eq!(answerer.peers.lock().await.len(), 1);

    let summary = ResourceReaper::cleanup(Some(&mut session)).await;
    assert!(summary.closed_handle);
    assert_eq!(session.state(), ConnectionState::Closed);

    for pc in answerer.peers.lock().await.drain(..) {
        let _ = pc.close().await;
    }
}
