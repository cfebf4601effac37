//! Integration tests for the record-replay cycle

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::oneshot;

use tapedeck::session::CassetteSaved;
use tapedeck::storage::{load_file, MemoryCassetteStore};
use tapedeck::transport::{HyperTransport, OfflineTransport, ScriptedTransport};
use tapedeck::{
    Interaction, Request, Response, Session, SessionConfig, SessionMode, StorageFormat, TaskError,
    TaskState,
};

fn interaction(request: Request, status: u16, body: &str) -> Interaction {
    Interaction::new(request, Response::new(status).with_body(body), None)
}

/// Build a session that plays back `interactions` and must never hit the network
fn playback(config: SessionConfig, interactions: Vec<Interaction>) -> Session {
    let store = MemoryCassetteStore::new();
    store.insert(config.cassette_name.clone(), interactions);
    Session::builder(config)
        .store(store)
        .transport(OfflineTransport)
        .build()
        .unwrap()
}

fn body_of(result: Result<Response, TaskError>) -> String {
    String::from_utf8(result.unwrap().body.unwrap_or_default()).unwrap()
}

#[tokio::test]
async fn test_record_then_replay_across_sessions() {
    for format in [StorageFormat::Json, StorageFormat::Binary] {
        let temp_dir = TempDir::new().unwrap();
        let config = SessionConfig::new("example")
            .cassette_dir(temp_dir.path())
            .format(format);

        // Phase 1: no cassette, record
        {
            let transport =
                ScriptedTransport::new().respond(Response::new(200).with_body("hello"));
            let session = Session::builder(config.clone())
                .transport(transport.clone())
                .build()
                .unwrap();
            assert_eq!(session.mode().await, SessionMode::NoCassette);

            let body = body_of(session.send(Request::get("http://example.com")).await);
            assert_eq!(body, "hello");
            assert_eq!(transport.calls(), 1);
        }

        let path = temp_dir
            .path()
            .join(format!("example.{}", format.extension()));
        let stored = load_file(&path).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].request().url, "http://example.com");

        // Phase 2: cassette exists, replay without the network
        {
            let transport = ScriptedTransport::new();
            let session = Session::builder(config.clone())
                .transport(transport.clone())
                .build()
                .unwrap();
            assert_eq!(session.mode().await, SessionMode::Playback);

            let body = body_of(session.send(Request::get("http://example.com")).await);
            assert_eq!(body, "hello");
            assert_eq!(transport.calls(), 0);
        }
    }
}

#[tokio::test]
async fn test_playback_follows_recorded_order() {
    let request = Request::new("POST", "http://api.test/items").with_body("same");
    let session = playback(
        SessionConfig::new("ordered"),
        vec![
            interaction(request.clone(), 200, "A"),
            interaction(request.clone(), 200, "B"),
        ],
    );

    assert_eq!(body_of(session.send(request.clone()).await), "A");
    assert_eq!(body_of(session.send(request.clone()).await), "B");
    assert_eq!(
        session.send(request).await,
        Err(TaskError::RequestNotFound)
    );
}

#[tokio::test]
async fn test_recorded_order_survives_reload() {
    let request = Request::new("POST", "http://api.test/items").with_body("same");

    for format in [StorageFormat::Json, StorageFormat::Binary] {
        let temp_dir = TempDir::new().unwrap();
        let config = SessionConfig::new("reloaded")
            .cassette_dir(temp_dir.path())
            .format(format);

        {
            let session = Session::builder(config.clone())
                .transport(
                    ScriptedTransport::new()
                        .respond(Response::new(200).with_body("A"))
                        .respond(Response::new(201).with_body("B")),
                )
                .build()
                .unwrap();
            assert_eq!(body_of(session.send(request.clone()).await), "A");
            assert_eq!(body_of(session.send(request.clone()).await), "B");
        }

        let session = Session::builder(config)
            .transport(OfflineTransport)
            .build()
            .unwrap();
        assert_eq!(session.mode().await, SessionMode::Playback);

        let first = session.send(request.clone()).await.unwrap();
        assert_eq!((first.status, first.body.as_deref()), (200, Some(&b"A"[..])));
        let second = session.send(request.clone()).await.unwrap();
        assert_eq!((second.status, second.body.as_deref()), (201, Some(&b"B"[..])));
        assert_eq!(
            session.send(request.clone()).await,
            Err(TaskError::RequestNotFound),
            "{format:?}"
        );
    }
}

#[tokio::test]
async fn test_request_not_found_regardless_of_recording_flag() {
    for recording_enabled in [true, false] {
        let store = MemoryCassetteStore::new();
        store.insert(
            "partial",
            vec![interaction(Request::get("http://a.test/"), 200, "A")],
        );
        let transport = ScriptedTransport::new().respond(Response::new(200));
        let session = Session::builder(
            SessionConfig::new("partial").recording_enabled(recording_enabled),
        )
        .store(store.clone())
        .transport(transport.clone())
        .build()
        .unwrap();

        let result = session.send(Request::get("http://b.test/")).await;

        assert_eq!(result, Err(TaskError::RequestNotFound));
        assert_eq!(transport.calls(), 0);
        assert_eq!(store.save_count(), 0);
    }
}

#[tokio::test]
async fn test_recording_disabled_without_cassette() {
    let transport = ScriptedTransport::new().respond(Response::new(200));
    let store = MemoryCassetteStore::new();
    let session = Session::builder(SessionConfig::new("missing").recording_enabled(false))
        .store(store.clone())
        .transport(transport.clone())
        .build()
        .unwrap();

    let result = session.send(Request::get("http://example.com")).await;

    assert_eq!(result, Err(TaskError::RecordingDisabled));
    assert_eq!(transport.calls(), 0);
    assert!(store.get("missing").is_none());
}

#[tokio::test]
async fn test_checked_headers_distinguish_requests() {
    let bar1 = Request::get("http://api.test/").with_header("Foo", "Bar1");
    let bar2 = Request::get("http://api.test/").with_header("Foo", "Bar2");
    let recorded = vec![interaction(bar1.clone(), 200, "one"), interaction(bar2.clone(), 200, "two")];

    let session = playback(SessionConfig::new("checked").check_header("Foo"), recorded.clone());
    assert_eq!(body_of(session.send(bar2.clone()).await), "two");
    assert_eq!(body_of(session.send(bar1.clone()).await), "one");

    // Without the header rule both requests look the same, so order decides
    let session = playback(SessionConfig::new("unchecked"), recorded);
    assert_eq!(body_of(session.send(bar2).await), "one");
    assert_eq!(body_of(session.send(bar1).await), "two");
}

#[tokio::test]
async fn test_ignored_parameters_do_not_affect_matching() {
    let session = playback(
        SessionConfig::new("ignored").ignore_parameter("apiKey"),
        vec![interaction(
            Request::get("http://api.test/search?q=rust&apiKey=recorded"),
            200,
            "results",
        )],
    );

    let result = session
        .send(Request::get("http://api.test/search?apiKey=live&q=rust"))
        .await;
    assert_eq!(body_of(result), "results");
}

#[tokio::test]
async fn test_request_override_is_sent_but_task_request_is_recorded() {
    let store = MemoryCassetteStore::new();
    let transport = ScriptedTransport::new().respond(Response::new(200).with_body("real"));
    let session = Session::builder(
        SessionConfig::new("override")
            .request_override(Request::get("http://real.test/resource").with_header("Authorization", "secret")),
    )
    .store(store.clone())
    .transport(transport.clone())
    .build()
    .unwrap();

    session
        .send(Request::get("http://placeholder.test/resource"))
        .await
        .unwrap();

    let sent = transport.requests();
    assert_eq!(sent[0].url, "http://real.test/resource");
    assert_eq!(sent[0].header("authorization"), Some("secret"));

    let saved = store.get("override").unwrap();
    assert_eq!(saved[0].request().url, "http://placeholder.test/resource");
    assert_eq!(saved[0].request().header("authorization"), None);
}

#[tokio::test]
async fn test_default_headers_are_recorded_and_matched() {
    let store = MemoryCassetteStore::new();
    let config = SessionConfig::new("defaults")
        .check_header("X-Client")
        .default_header("X-Client", "tapedeck-tests");

    {
        let session = Session::builder(config.clone())
            .store(store.clone())
            .transport(ScriptedTransport::new().respond(Response::new(200).with_body("ok")))
            .build()
            .unwrap();
        session.send(Request::get("http://api.test/")).await.unwrap();
    }

    let saved = store.get("defaults").unwrap();
    assert_eq!(saved[0].request().header("x-client"), Some("tapedeck-tests"));

    let session = Session::builder(config)
        .store(store)
        .transport(OfflineTransport)
        .build()
        .unwrap();
    assert_eq!(body_of(session.send(Request::get("http://api.test/")).await), "ok");
}

#[tokio::test]
async fn test_failed_live_call_is_not_recorded() {
    let store = MemoryCassetteStore::new();
    let session = Session::builder(SessionConfig::new("unreachable"))
        .store(store.clone())
        .transport(ScriptedTransport::new().fail("connection refused"))
        .build()
        .unwrap();

    let result = session.send(Request::get("http://down.test/")).await;

    assert!(matches!(result, Err(TaskError::CannotRecordNoResponse(_))));
    assert!(store.get("unreachable").is_none());
}

#[tokio::test]
async fn test_error_statuses_are_recorded_like_any_response() {
    let store = MemoryCassetteStore::new();
    let session = Session::builder(SessionConfig::new("errors"))
        .store(store.clone())
        .transport(ScriptedTransport::new().respond(Response::new(503)))
        .build()
        .unwrap();

    let response = session.send(Request::get("http://flaky.test/")).await.unwrap();

    assert_eq!(response.status, 503);
    assert_eq!(store.get("errors").unwrap()[0].response().status, 503);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_recording_block_saves_once() {
    let store = MemoryCassetteStore::new();
    let saves: Arc<Mutex<Vec<CassetteSaved>>> = Arc::default();
    let observed = Arc::clone(&saves);

    let mut transport = ScriptedTransport::new();
    for i in 0..8 {
        transport = transport.respond(Response::new(200).with_body(format!("r{i}")));
    }

    let session = Session::builder(SessionConfig::new("burst"))
        .store(store.clone())
        .transport(transport.with_delay(Duration::from_millis(20)))
        .on_cassette_saved(move |saved| observed.lock().unwrap().push(saved.clone()))
        .build()
        .unwrap();

    session.begin_recording().await;

    let mut receivers = Vec::new();
    for i in 0..8 {
        let (tx, rx) = oneshot::channel();
        session
            .data_task_with(Request::get(format!("http://api.test/{i}")), move |result| {
                tx.send(result).unwrap();
            })
            .resume();
        receivers.push(rx);
    }

    let saved = session.end_recording().await.unwrap().unwrap();
    assert_eq!(saved.interactions, 8);
    assert_eq!(store.save_count(), 1);
    assert_eq!(saves.lock().unwrap().as_slice(), &[saved]);

    for rx in receivers {
        assert!(rx.await.unwrap().is_ok());
    }
}

#[tokio::test]
async fn test_auto_save_notifies_observer_per_save() {
    let count = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&count);
    let store = MemoryCassetteStore::new();
    let session = Session::builder(SessionConfig::new("observed"))
        .store(store.clone())
        .transport(
            ScriptedTransport::new()
                .respond(Response::new(200))
                .respond(Response::new(200)),
        )
        .on_cassette_saved(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    session.send(Request::get("http://api.test/1")).await.unwrap();
    session.send(Request::get("http://api.test/2")).await.unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert_eq!(store.get("observed").unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_completion_runs_once() {
    let session = playback(
        SessionConfig::new("serial"),
        (0..10)
            .map(|i| interaction(Request::get(format!("http://api.test/{i}")), 200, "x"))
            .collect(),
    );

    let order: Arc<Mutex<Vec<u64>>> = Arc::default();
    let in_flight = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let (done_tx, done_rx) = oneshot::channel();
    let done = Arc::new(Mutex::new(Some(done_tx)));

    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let order = Arc::clone(&order);
            let in_flight = Arc::clone(&in_flight);
            let overlaps = Arc::clone(&overlaps);
            let done = Arc::clone(&done);
            session.data_task_with(Request::get(format!("http://api.test/{i}")), move |result| {
                if in_flight.swap(true, Ordering::SeqCst) {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                // Hold the slot long enough for a concurrent completion to show up
                std::thread::sleep(Duration::from_millis(2));
                assert!(result.is_ok());
                let finished = {
                    let mut order = order.lock().unwrap();
                    order.push(i);
                    order.len()
                };
                in_flight.store(false, Ordering::SeqCst);

                if finished == 10 {
                    if let Some(tx) = done.lock().unwrap().take() {
                        tx.send(()).unwrap();
                    }
                }
            })
        })
        .collect();

    for task in &tasks {
        task.resume();
    }
    done_rx.await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    let mut seen = order.lock().unwrap().clone();
    assert_eq!(seen.len(), 10);
    seen.sort_unstable();
    assert_eq!(seen, (0..10).collect::<Vec<_>>());
    assert!(tasks.iter().all(|task| task.state() == TaskState::Played));
}

#[tokio::test]
async fn test_task_outliving_session() {
    let session = playback(
        SessionConfig::new("short-lived"),
        vec![interaction(Request::get("http://api.test/"), 200, "x")],
    );
    let (tx, rx) = oneshot::channel();
    let task = session.data_task_with(Request::get("http://api.test/"), move |result| {
        tx.send(result).unwrap();
    });
    drop(session);

    task.resume();
    assert_eq!(rx.await.unwrap(), Err(TaskError::SessionClosed));
}

#[tokio::test]
async fn test_download_task_from_cassette() {
    let session = playback(
        SessionConfig::new("download"),
        vec![interaction(Request::get("http://files.test/report.csv"), 200, "a,b\n1,2\n")],
    );
    let (tx, rx) = oneshot::channel();

    session
        .download_task_with(Request::get("http://files.test/report.csv"), move |result| {
            tx.send(result).unwrap();
        })
        .resume();

    let file = rx.await.unwrap().unwrap();
    assert_eq!(std::fs::read_to_string(&file.path).unwrap(), "a,b\n1,2\n");
    std::fs::remove_file(&file.path).unwrap();
}

#[tokio::test]
async fn test_hyper_transport_records_local_server() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        while !received.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nlocal")
            .await
            .unwrap();
        stream.shutdown().await.unwrap();
    });

    let temp_dir = TempDir::new().unwrap();
    let config = SessionConfig::new("local").cassette_dir(temp_dir.path());
    let url = format!("http://{addr}/hello");

    {
        let session = Session::builder(config.clone())
            .transport(HyperTransport::new().with_timeout(Duration::from_secs(5)))
            .build()
            .unwrap();
        assert_eq!(body_of(session.send(Request::get(url.clone())).await), "local");
    }

    // The server is gone; playback must not need it
    let session = Session::builder(config)
        .transport(OfflineTransport)
        .build()
        .unwrap();
    assert_eq!(body_of(session.send(Request::get(url)).await), "local");
}
