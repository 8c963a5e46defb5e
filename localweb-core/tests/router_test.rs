//! Message router: trust gate, dispatch and response envelopes

mod common;

use anyhow::Result;
use async_trait::async_trait;
use localweb_core::bridge::{
    CommandError, DownloadRecord, Launched, MessageHandler, MessageRouter, ProcessLauncher, Reply,
    Request, ResponseEnvelope,
};
use localweb_core::catalog::{MemoryFetcher, UpdateCoordinator, UpdateSource};
use localweb_core::{Host, LoadOptions};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const TRUSTED: &str = "https://demo.localhost/index.html";

struct Fixture {
    _temp: TempDir,
    host: Arc<Host>,
}

async fn fixture() -> Result<Fixture> {
    fixture_with(|options| options, false).await
}

async fn fixture_with(
    customize: impl FnOnce(localweb_core::HostOptions) -> localweb_core::HostOptions,
    tamper: bool,
) -> Result<Fixture> {
    common::init_test_logging();
    let temp = TempDir::new()?;
    let signer = common::signer();
    let dir = common::signed_version(temp.path(), "demo", "1.0.0", &signer)?;
    if tamper {
        std::fs::write(dir.join("js/app.js"), "tampered()")?;
    }

    let mut options = customize(common::options("demo", signer));
    options.documents_dir = Some(temp.path().join("documents"));
    let host = Host::load(
        temp.path(),
        options,
        common::config(),
        LoadOptions::skip_signature_errors(),
    )
    .await?;
    Ok(Fixture {
        _temp: temp,
        host: Arc::new(host),
    })
}

async fn send(router: &MessageRouter, origin: &str, request: Value) -> ResponseEnvelope {
    router.handle_value(request, origin).await
}

#[derive(Default)]
struct RecordingLauncher {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ProcessLauncher for RecordingLauncher {
    async fn open_url(&self, url: &url::Url) -> std::io::Result<()> {
        self.calls.lock().unwrap().push(format!("url {url}"));
        Ok(())
    }

    async fn open_path(&self, path: &Path) -> std::io::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("path {}", path.file_name().unwrap().to_string_lossy()));
        Ok(())
    }

    async fn run(
        &self,
        program: &str,
        args: &[String],
        _cwd: Option<&Path>,
        wait: bool,
    ) -> std::io::Result<Launched> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("run {program} {}", args.join(" ")));
        Ok(Launched {
            pid: Some(42),
            exit_code: wait.then_some(0),
        })
    }
}

struct EchoHandler;

#[async_trait]
impl MessageHandler for EchoHandler {
    async fn handle(&self, request: &Request, host: &Host) -> Result<Reply, CommandError> {
        Ok(Reply::data(json!({
            "echo": request.data().clone(),
            "trusted": request.is_full_trusted(),
            "package": host.id(),
        })))
    }
}

struct PanickingHandler;

#[async_trait]
impl MessageHandler for PanickingHandler {
    async fn handle(&self, request: &Request, _host: &Host) -> Result<Reply, CommandError> {
        panic!("handler failed on {}", request.cmd());
    }
}

fn gated_requests() -> Vec<Value> {
    vec![
        json!({"cmd": "list-file", "data": {"path": ".data:"}}),
        json!({"cmd": "list-drives"}),
        json!({"cmd": "get-file", "data": {"path": "index.html"}}),
        json!({"cmd": "write-file", "data": {"path": ".data:a.txt", "text": "x"}}),
        json!({"cmd": "move-file", "data": {"from": "index.html", "to": ".data:b.html"}}),
        json!({"cmd": "make-dir", "data": {"path": ".data:dir"}}),
        json!({"cmd": "hash", "data": {"file": "index.html"}}),
        json!({"cmd": "symmetric", "data": {"action": "encrypt", "keyFile": ".data:key", "text": "x"}}),
        json!({"cmd": "open", "data": {"process": "calc"}}),
        json!({"cmd": "open", "data": {"file": "index.html"}}),
        json!({"cmd": "open", "data": {"url": "https://example.com", "dir": "."}}),
        json!({"cmd": "download-list"}),
    ]
}

#[tokio::test]
async fn test_every_gated_command_denied_for_untrusted_origins() -> Result<()> {
    let fx = fixture().await?;
    let launcher = Arc::new(RecordingLauncher::default());
    let router = MessageRouter::new(fx.host.clone()).with_launcher(launcher.clone());

    for origin in [
        "https://demo.localhost.evil.com/",
        "https://evil.demo.localhost/",
        "https://example.com/",
        "null",
        "",
    ] {
        for (n, mut request) in gated_requests().into_iter().enumerate() {
            request["trace"] = json!(format!("t{n}"));
            let cmd = request["cmd"].clone();
            let response = send(&router, origin, request).await;
            assert!(response.error, "{cmd} from {origin:?} should be denied");
            assert_eq!(response.kind.as_deref(), Some("permission"));
            assert_eq!(response.message.as_deref(), Some("No permission."));
            assert_eq!(response.trace, json!(format!("t{n}")));
        }
    }

    assert!(launcher.calls.lock().unwrap().is_empty());
    assert!(!fx.host.root().join("data").join("a.txt").exists());
    Ok(())
}

#[tokio::test]
async fn test_unverified_package_denied_even_from_own_origin() -> Result<()> {
    let fx = fixture_with(|options| options, true).await?;
    assert!(!fx.host.is_verified());
    let router = MessageRouter::new(fx.host.clone());

    for request in gated_requests() {
        let response = send(&router, TRUSTED, request).await;
        assert_eq!(response.kind.as_deref(), Some("permission"));
    }

    // Ungated commands still work
    let response = send(&router, TRUSTED, json!({"cmd": "hash", "data": {"text": "abc"}})).await;
    assert!(!response.error);
    Ok(())
}

#[tokio::test]
async fn test_file_commands_for_trusted_origin() -> Result<()> {
    let fx = fixture().await?;
    let router = MessageRouter::new(fx.host.clone());

    let written = send(
        &router,
        TRUSTED,
        json!({"cmd": "write-file", "data": {"path": ".data:notes/today.txt", "text": "hello"}}),
    )
    .await;
    assert!(!written.error, "{:?}", written.message);
    assert_eq!(written.data, json!(5));
    assert_eq!(written.info["size"], 5);

    let appended = send(
        &router,
        TRUSTED,
        json!({"cmd": "write-file", "data": {"path": ".data:notes/today.txt", "text": " world", "append": true}}),
    )
    .await;
    assert!(!appended.error);

    let read = send(
        &router,
        TRUSTED,
        json!({"cmd": "get-file", "data": {"path": ".data:notes/today.txt"}}),
    )
    .await;
    assert_eq!(read.data, json!("hello world"));

    let listed = send(
        &router,
        TRUSTED,
        json!({"cmd": "list-file", "data": {"path": ".data:", "recursive": true, "pattern": "*.txt"}}),
    )
    .await;
    let names: Vec<&str> = listed
        .data
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["path"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["notes", "notes/today.txt"]);

    let moved = send(
        &router,
        TRUSTED,
        json!({"cmd": "move-file", "data": {"from": ".data:notes/today.txt", "to": ".data:archive/today.txt"}}),
    )
    .await;
    assert!(!moved.error, "{:?}", moved.message);
    let data_dir = fx.host.root().join("data");
    assert!(data_dir.join("archive/today.txt").is_file());
    assert!(!data_dir.join("notes/today.txt").exists());

    let made = send(&router, TRUSTED, json!({"cmd": "make-dir", "data": {"path": ".doc:exports"}})).await;
    assert!(!made.error);
    assert!(fx.host.root().join("documents/exports").is_dir());

    let missing = send(&router, TRUSTED, json!({"cmd": "get-file", "data": {"path": ".data:nope.txt"}})).await;
    assert_eq!(missing.kind.as_deref(), Some("io"));
    assert!(!missing.causes.is_empty());

    let escape = send(&router, TRUSTED, json!({"cmd": "get-file", "data": {"path": ".data:../../etc/passwd"}})).await;
    assert_eq!(escape.kind.as_deref(), Some("argument"));
    Ok(())
}

#[tokio::test]
async fn test_hash_and_symmetric() -> Result<()> {
    let fx = fixture().await?;
    let router = MessageRouter::new(fx.host.clone());

    let by_text = send(
        &router,
        "https://elsewhere.example/",
        json!({"cmd": "hash", "data": {"text": "abc", "algorithm": "sha256"}}),
    )
    .await;
    assert_eq!(
        by_text.data,
        json!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
    );

    let html = std::fs::read_to_string(fx.host.paths().package_dir.join("index.html"))?;
    let by_file = send(&router, TRUSTED, json!({"cmd": "hash", "data": {"file": "index.html"}})).await;
    let expected = send(&router, TRUSTED, json!({"cmd": "hash", "data": {"text": html}})).await;
    assert_eq!(by_file.data, expected.data);

    let key = send(&router, TRUSTED, json!({"cmd": "symmetric", "data": {"action": "generate"}})).await;
    let key = key.data.as_str().unwrap().to_string();

    let sealed = send(
        &router,
        "https://elsewhere.example/",
        json!({"cmd": "symmetric", "data": {"action": "encrypt", "key": key, "text": "secret"}}),
    )
    .await;
    assert!(!sealed.error, "{:?}", sealed.message);

    let opened = send(
        &router,
        "https://elsewhere.example/",
        json!({"cmd": "symmetric", "data": {"action": "decrypt", "key": key, "data": sealed.data}}),
    )
    .await;
    assert_eq!(opened.data, json!("secret"));

    // 43 Base64url characters decode to 32 zero bytes
    let other_key = "A".repeat(43);
    let wrong = send(
        &router,
        TRUSTED,
        json!({"cmd": "symmetric", "data": {"action": "decrypt", "key": other_key, "data": sealed.data}}),
    )
    .await;
    assert_eq!(wrong.kind.as_deref(), Some("format"));
    Ok(())
}

#[tokio::test]
async fn test_open_uses_launcher() -> Result<()> {
    let fx = fixture().await?;
    let launcher = Arc::new(RecordingLauncher::default());
    let router = MessageRouter::new(fx.host.clone()).with_launcher(launcher.clone());

    let url = send(
        &router,
        "https://elsewhere.example/",
        json!({"cmd": "open", "data": {"url": "https://example.com/docs"}}),
    )
    .await;
    assert!(!url.error);

    let scheme = send(
        &router,
        "https://elsewhere.example/",
        json!({"cmd": "open", "data": {"url": "file:///etc/passwd"}}),
    )
    .await;
    assert_eq!(scheme.kind.as_deref(), Some("not-supported"));

    let file = send(&router, TRUSTED, json!({"cmd": "open", "data": {"file": "index.html"}})).await;
    assert!(!file.error);

    let process = send(
        &router,
        TRUSTED,
        json!({"cmd": "open", "data": {"process": "tool", "args": "--flag 'a b'", "wait": true}}),
    )
    .await;
    assert_eq!(process.data, json!({"pid": 42, "exitCode": 0}));

    assert_eq!(
        *launcher.calls.lock().unwrap(),
        vec![
            "url https://example.com/docs".to_string(),
            "path index.html".to_string(),
            "run tool --flag a b".to_string(),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_trace_and_context_echoed_on_every_path() -> Result<()> {
    let fx = fixture().await?;
    let router = MessageRouter::new(fx.host.clone()).register_handler("Echo", Arc::new(EchoHandler));
    let context = json!({"callback": 7, "tags": ["a"]});

    let requests = [
        (TRUSTED, json!({"cmd": "theme"})),
        (TRUSTED, json!({"cmd": "no-such-command"})),
        (TRUSTED, json!({"cmd": "anything", "handler": "missing"})),
        (TRUSTED, json!({"cmd": "anything", "handler": "echo", "data": {"x": 1}})),
        ("https://evil.example/", json!({"cmd": "get-file", "data": {"path": "a"}})),
        (TRUSTED, json!({"cmd": "get-file", "data": {}})),
    ];
    for (n, (origin, mut request)) in requests.into_iter().enumerate() {
        request["trace"] = json!(format!("trace-{n}"));
        request["context"] = context.clone();
        let response = send(&router, origin, request).await;
        assert_eq!(response.trace, json!(format!("trace-{n}")));
        assert_eq!(response.context, context);
        assert!(response.timeline.processed >= response.timeline.processing);
    }

    let malformed = router
        .handle(r#"{"trace": "bad", "cmd": 12, "context": "ctx"}"#, TRUSTED)
        .await;
    assert!(malformed.error);
    assert_eq!(malformed.trace, json!("bad"));
    assert_eq!(malformed.context, json!("ctx"));
    assert_eq!(malformed.kind.as_deref(), Some("format"));

    let numeric = router.handle(r#"{"trace": 42, "cmd": "theme"}"#, TRUSTED).await;
    assert!(!numeric.error);
    assert_eq!(numeric.trace, json!(42));

    let numeric_malformed = router.handle(r#"{"trace": 43, "cmd": []}"#, TRUSTED).await;
    assert!(numeric_malformed.error);
    assert_eq!(numeric_malformed.trace, json!(43));

    let garbage = router.handle("not json", TRUSTED).await;
    assert!(garbage.error);
    assert_eq!(garbage.kind.as_deref(), Some("format"));
    Ok(())
}

#[tokio::test]
async fn test_unknown_command_and_handlers() -> Result<()> {
    let fx = fixture().await?;
    let router = MessageRouter::new(fx.host.clone()).register_handler("Echo", Arc::new(EchoHandler));

    let unknown = send(&router, TRUSTED, json!({"cmd": "format-disk"})).await;
    assert_eq!(unknown.kind.as_deref(), Some("not-supported"));
    assert_eq!(unknown.message.as_deref(), Some("The command is not supported."));

    let missing = send(&router, TRUSTED, json!({"cmd": "x", "handler": "printer"})).await;
    assert_eq!(
        missing.message.as_deref(),
        Some("No message handler is registered for this id.")
    );

    let echoed = send(
        &router,
        "https://demo.localhost.evil.com/",
        json!({"cmd": "x", "handler": "ECHO", "data": {"n": 1}}),
    )
    .await;
    assert_eq!(
        echoed.data,
        json!({"echo": {"n": 1}, "trusted": false, "package": "demo"})
    );
    Ok(())
}

#[tokio::test]
async fn test_theme_window_and_downloads() -> Result<()> {
    let fx = fixture().await?;
    let router = MessageRouter::new(fx.host.clone());

    let set = send(&router, TRUSTED, json!({"cmd": "theme", "data": {"theme": "dark"}})).await;
    assert_eq!(set.data, json!("dark"));
    let get = send(&router, "https://elsewhere.example/", json!({"cmd": "theme"})).await;
    assert_eq!(get.data, json!("dark"));

    let window = send(&router, TRUSTED, json!({"cmd": "window", "data": {"action": "maximize"}})).await;
    assert_eq!(window.data, json!("maximized"));

    router.record_download(DownloadRecord {
        url: "https://example.com/report.pdf".into(),
        path: "/tmp/report.pdf".into(),
        size: Some(10),
        started: chrono::Utc::now(),
        completed: None,
    });
    let list = send(&router, TRUSTED, json!({"cmd": "download-list"})).await;
    assert_eq!(list.data[0]["url"], "https://example.com/report.pdf");
    assert_eq!(list.data.as_array().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_check_update() -> Result<()> {
    let fx = fixture_with(
        |options| options.with_update(UpdateSource::new("https://updates.example.com/{id}/latest.json?v={version}")),
        false,
    )
    .await?;

    let disabled = MessageRouter::new(fx.host.clone());
    let response = send(&disabled, TRUSTED, json!({"cmd": "check-update"})).await;
    assert_eq!(response.kind.as_deref(), Some("not-supported"));

    let fetcher = MemoryFetcher::new().with(
        "https://updates.example.com/demo/latest.json",
        r#"{"version": "1.10.0", "url": "https://updates.example.com/demo/1.10.0.tar.gz", "description": "Fixes"}"#,
    );
    let updates = Arc::new(UpdateCoordinator::new(common::config(), Arc::new(fetcher)));
    let router = MessageRouter::new(fx.host.clone()).with_updates(updates);

    let response = send(&router, "https://elsewhere.example/", json!({"cmd": "check-update"})).await;
    assert!(!response.error, "{:?}", response.message);
    assert_eq!(
        response.data,
        json!({"available": true, "version": "1.10.0", "current": "1.0.0"})
    );
    assert_eq!(response.info, json!({"description": "Fixes"}));
    assert_eq!(fx.host.new_version_available().await.as_deref(), Some("1.10.0"));
    Ok(())
}

#[tokio::test]
async fn test_panicking_handler_still_gets_a_response() -> Result<()> {
    let fx = fixture().await?;
    let router = MessageRouter::new(fx.host.clone())
        .register_handler("boom", Arc::new(PanickingHandler))
        .register_handler("echo", Arc::new(EchoHandler));

    let response = send(
        &router,
        TRUSTED,
        json!({"trace": "p1", "cmd": "explode", "handler": "boom", "context": {"k": 1}}),
    )
    .await;
    assert!(response.error);
    assert_eq!(response.kind.as_deref(), Some("other"));
    assert_eq!(response.trace, json!("p1"));
    assert_eq!(response.context, json!({"k": 1}));
    assert!(response
        .message
        .as_deref()
        .is_some_and(|m| m.contains("handler failed on explode")));

    // The router keeps serving afterwards
    let echoed = send(&router, TRUSTED, json!({"cmd": "x", "handler": "echo"})).await;
    assert!(!echoed.error);
    Ok(())
}
