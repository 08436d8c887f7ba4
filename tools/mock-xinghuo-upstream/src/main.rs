use std::convert::Infallible;
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::net::TcpListener;

const DEFAULT_UPSTREAM_PORT: u16 = 19_002;
const CHAT_PATH: &str = "/iflygpt-chat/u/chat_message/chat";

#[derive(Copy, Clone)]
enum MockScenario {
    Text,
    Think,
    Noisy,
    Empty,
    AuthError,
}

impl MockScenario {
    fn name(self) -> &'static str {
        match self {
            MockScenario::Text => "text",
            MockScenario::Think => "think",
            MockScenario::Noisy => "noisy",
            MockScenario::Empty => "empty",
            MockScenario::AuthError => "auth_error",
        }
    }
}

struct MockStats {
    requests: AtomicU64,
    missing_token: AtomicU64,
    missing_cookie: AtomicU64,
}

struct MockState {
    scenario: MockScenario,
    stream_body: Bytes,
    stats: MockStats,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let port = env_u16("UPSTREAM_PORT", DEFAULT_UPSTREAM_PORT);
    let scenario = parse_scenario();
    let state = Arc::new(MockState {
        scenario,
        stream_body: build_stream_body(scenario),
        stats: MockStats {
            requests: AtomicU64::new(0),
            missing_token: AtomicU64::new(0),
            missing_cookie: AtomicU64::new(0),
        },
    });

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap_or_else(|err| panic!("failed to bind mock upstream on 127.0.0.1:{port}: {err}"));
    eprintln!(
        "mock xinghuo upstream on http://127.0.0.1:{port}{CHAT_PATH} (scenario={})",
        scenario.name()
    );

    let conn_builder = AutoBuilder::new(TokioExecutor::new());
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok((stream, remote_addr)) => (stream, remote_addr),
            Err(err) => {
                eprintln!("accept error: {err}");
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let conn_builder = conn_builder.clone();
        let service_state = Arc::clone(&state);
        let service = service_fn(move |request: Request<Incoming>| {
            let state_ref = Arc::clone(&service_state);
            async move { Ok::<_, Infallible>(handle_request(request, &state_ref).await) }
        });

        tokio::spawn(async move {
            if let Err(err) = conn_builder.serve_connection(io, service).await {
                eprintln!("mock upstream connection error from {remote_addr}: {err}");
            }
        });
    }
}

fn env_u16(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(default)
}

fn parse_scenario() -> MockScenario {
    match env::var("MOCK_SCENARIO").as_deref() {
        Ok("think") => MockScenario::Think,
        Ok("noisy") => MockScenario::Noisy,
        Ok("empty") => MockScenario::Empty,
        Ok("auth_error") => MockScenario::AuthError,
        Ok("text") | Err(_) => MockScenario::Text,
        Ok(other) => {
            eprintln!("unknown MOCK_SCENARIO '{other}', fallback to text");
            MockScenario::Text
        }
    }
}

fn data_line(out: &mut String, text: &str) {
    out.push_str("data:");
    out.push_str(&STANDARD.encode(text.as_bytes()));
    out.push('\n');
}

fn build_stream_body(scenario: MockScenario) -> Bytes {
    let mut body = String::with_capacity(512);
    body.push_str("data:<sid>mock-session-1\n");
    match scenario {
        MockScenario::Text | MockScenario::AuthError => {
            for fragment in ["你好", "，我是", "星火", "。"] {
                data_line(&mut body, fragment);
            }
        }
        MockScenario::Think => {
            data_line(&mut body, "<deep_x1>{\"step\":1,\"status\":\"thinking\"}");
            data_line(&mut body, "Thinking done. ");
            data_line(&mut body, "Answer: 42");
        }
        MockScenario::Noisy => {
            body.push_str(": keep-alive\n\n");
            data_line(&mut body, "a");
            body.push_str("data:SGk\n");
            body.push_str("data:/w==\n");
            data_line(&mut body, "");
            data_line(&mut body, "b");
        }
        MockScenario::Empty => {}
    }
    body.push_str("data:<end>\n");
    Bytes::from(body)
}

async fn handle_request(request: Request<Incoming>, state: &Arc<MockState>) -> Response<Full<Bytes>> {
    let (parts, body) = request.into_parts();
    let form = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };

    let path = parts.uri.path();
    if parts.method == Method::GET && path == "/_mock/stats" {
        return stats_response(state);
    }
    if path != CHAT_PATH {
        return simple_response(
            StatusCode::NOT_FOUND,
            "application/json",
            Bytes::from_static(br#"{"code":404,"desc":"not found"}"#),
        );
    }
    if parts.method != Method::POST {
        return simple_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "application/json",
            Bytes::from_static(br#"{"code":405,"desc":"method not allowed"}"#),
        );
    }

    state.stats.requests.fetch_add(1, Ordering::Relaxed);
    let has_token = url::form_urlencoded::parse(&form)
        .any(|(key, value)| key == "GtToken" && !value.is_empty());
    if !has_token {
        state.stats.missing_token.fetch_add(1, Ordering::Relaxed);
    }
    if !parts.headers.contains_key(header::COOKIE) {
        state.stats.missing_cookie.fetch_add(1, Ordering::Relaxed);
    }

    if matches!(state.scenario, MockScenario::AuthError) || !has_token {
        return simple_response(
            StatusCode::FORBIDDEN,
            "application/json",
            Bytes::from_static(br#"{"code":80000,"desc":"GtToken invalid"}"#),
        );
    }

    let mut response = simple_response(
        StatusCode::OK,
        "text/event-stream",
        state.stream_body.clone(),
    );
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

fn stats_response(state: &MockState) -> Response<Full<Bytes>> {
    let requests = state.stats.requests.load(Ordering::Relaxed);
    let missing_token = state.stats.missing_token.load(Ordering::Relaxed);
    let missing_cookie = state.stats.missing_cookie.load(Ordering::Relaxed);
    let body = format!(
        "{{\"scenario\":\"{}\",\"requests\":{requests},\"missing_token\":{missing_token},\"missing_cookie\":{missing_cookie}}}",
        state.scenario.name()
    );
    simple_response(StatusCode::OK, "application/json", Bytes::from(body))
}

fn simple_response(
    status: StatusCode,
    content_type: &'static str,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
