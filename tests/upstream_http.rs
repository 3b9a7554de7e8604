//! End-to-end request jobs against a local hyper upstream

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use courier::job::{
    BufferedSink, ClientConfig, Delivery, HttpUpstream, JobSpec, JobState, OutputRoute,
    PlaceholderReplacer, RequestJob,
};
use courier::pipe::{self, keys, ContextStore, ContextValue};
use courier::signing::{AuthParams, SignedAuth, Signer};
use courier::CourierError;

const KEY: &str = "vXqzNCtQ5R7odtjIzVqB8OMW";
const SECRET: &str = "Ysz4npNH1KoOfRVfPH2J12Ia";
const URI: &str = "/api/ajxp_conf/scheduler_runAll";

/// What the upstream saw: request URI and Cookie header
type Seen = Arc<Mutex<Vec<(String, Option<String>)>>>;

async fn spawn_upstream() -> (SocketAddr, Seen) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));

    let recorded = Arc::clone(&seen);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let recorded = Arc::clone(&recorded);
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let recorded = Arc::clone(&recorded);
                    async move { Ok::<_, Infallible>(respond(&recorded, &req)) }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    (addr, seen)
}

fn respond(recorded: &Seen, req: &Request<Incoming>) -> Response<Full<Bytes>> {
    let cookie = req
        .headers()
        .get(hyper::header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    recorded.lock().unwrap().push((req.uri().to_string(), cookie));

    match req.uri().path() {
        "/forbidden" => Response::builder()
            .status(StatusCode::FORBIDDEN)
            .body(Full::new(Bytes::from_static(b"denied")))
            .unwrap(),
        _ => Response::builder()
            .header("X-Foo", "bar")
            .body(Full::new(Bytes::from_static(b"hello")))
            .unwrap(),
    }
}

struct Counters {
    closed: Arc<AtomicUsize>,
    cancelled: Arc<AtomicUsize>,
}

fn delivery(sink: &BufferedSink) -> (Delivery, Counters) {
    let counters = Counters {
        closed: Arc::new(AtomicUsize::new(0)),
        cancelled: Arc::new(AtomicUsize::new(0)),
    };
    let closed = Arc::clone(&counters.closed);
    let cancelled = Arc::clone(&counters.cancelled);
    let delivery = Delivery {
        sink: Box::new(sink.clone()),
        encoder: Box::new(courier::job::JsonLinesEncoder::new(Vec::new())),
        close: Box::new(move || {
            closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
        cancel: Box::new(move || {
            cancelled.fetch_add(1, Ordering::SeqCst);
        }),
    };
    (delivery, counters)
}

fn upstream() -> Arc<HttpUpstream> {
    Arc::new(
        HttpUpstream::new(&ClientConfig {
            request_timeout_ms: 5000,
            connect_timeout_ms: 1000,
            ..Default::default()
        })
        .unwrap(),
    )
}

#[tokio::test]
async fn test_signed_request_delivers_body() {
    let (addr, seen) = spawn_upstream().await;
    let signer = Signer::new(KEY, SECRET).unwrap();

    let ctx = ContextStore::new();
    ctx.insert(keys::AUTH, ContextValue::Auth(AuthParams::Signer(signer.clone())));

    let sink = BufferedSink::new();
    let (delivery, counters) = delivery(&sink);
    let spec = JobSpec::new(URI, OutputRoute::body()).with_base_url(format!("http://{}", addr));

    let mut replacer = PlaceholderReplacer::new();
    let mut job = RequestJob::build(&ctx, spec, &mut replacer, delivery, upstream())
        .await
        .unwrap();
    job.execute().await.unwrap();

    assert_eq!(job.state(), JobState::Succeeded);
    assert_eq!(sink.body().await, Bytes::from_static(b"hello"));
    assert_eq!(sink.headers().await.get("x-foo").unwrap(), "bar");
    assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    assert_eq!(counters.cancelled.load(Ordering::SeqCst), 0);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let received = reqwest::Url::parse(&format!("http://{}{}", addr, seen[0].0)).unwrap();
    assert_eq!(received.path(), URI);

    let pairs: Vec<(String, String)> = received.query_pairs().into_owned().collect();
    assert_eq!(pairs[0].0, "auth_token");
    assert_eq!(pairs[1].0, "auth_hash");
    assert_eq!(pairs[2], ("key".to_string(), KEY.to_string()));
    assert!(signer.verify(URI, &SignedAuth::new(pairs[0].1.clone(), pairs[1].1.clone())));
}

#[tokio::test]
async fn test_forbidden_cancels_without_delivery() {
    let (addr, _seen) = spawn_upstream().await;

    let ctx = ContextStore::new();
    ctx.insert(
        keys::AUTH,
        ContextValue::Auth(AuthParams::Fixed(SignedAuth::new("T", "H"))),
    );

    let sink = BufferedSink::new();
    let (delivery, counters) = delivery(&sink);
    let spec = JobSpec::new(format!("http://{}/forbidden", addr), OutputRoute::body());

    let mut replacer = PlaceholderReplacer::new();
    let mut job = RequestJob::build(&ctx, spec, &mut replacer, delivery, upstream())
        .await
        .unwrap();
    let err = job.execute().await.unwrap_err();

    assert!(matches!(
        err,
        CourierError::UpstreamRejected { status } if status == reqwest::StatusCode::FORBIDDEN
    ));
    assert_eq!(job.state(), JobState::Cancelled);
    assert_eq!(counters.cancelled.load(Ordering::SeqCst), 1);
    assert_eq!(counters.closed.load(Ordering::SeqCst), 0);
    assert!(sink.body().await.is_empty());
}

#[tokio::test]
async fn test_streamed_node_and_cookies() {
    let (addr, seen) = spawn_upstream().await;

    let ctx = ContextStore::new();
    ctx.insert(
        keys::AUTH,
        ContextValue::Auth(AuthParams::Fixed(SignedAuth::new("T", "H"))),
    );

    // Node arrives from a producer task after the job starts waiting
    let (writer, node_pipe) = pipe::channel();
    ctx.insert(keys::NODE, ContextValue::pipe(node_pipe));
    tokio::spawn(async move {
        writer.write(br#"{"repo":"1","#).await.unwrap();
        writer
            .write(br#""dir":"/docs","basename":"a.txt"}"#)
            .await
            .unwrap();
        writer.close();
    });

    let sink = BufferedSink::new();
    let (delivery, _counters) = delivery(&sink);
    let spec = JobSpec::new(
        format!("http://{}/api/{{repo}}/download?file={{nodedir}}/{{nodename}}", addr),
        OutputRoute::body(),
    )
    .with_cookie("PHPSESSID", "s3ss10n");

    let mut replacer = PlaceholderReplacer::new();
    let mut job = RequestJob::build(&ctx, spec, &mut replacer, delivery, upstream())
        .await
        .unwrap();
    job.execute().await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].0, "/api/1/download?file=docs%2Fa.txt");
    assert_eq!(seen[0].1.as_deref(), Some("PHPSESSID=s3ss10n"));
    assert_eq!(sink.body().await, Bytes::from_static(b"hello"));
}
