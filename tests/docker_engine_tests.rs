//! Engine driver tests against a live Docker daemon. All ignored by
//! default; run with `cargo test -- --ignored` on a machine with Docker
//! and the alpine image available (it is pulled on first use).

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use codepod::docker::{ContainerEngine, DockerClient, DockerEngine, EngineConfig};
use codepod::error::Error;
use codepod::models::{CommandInput, ExecEvent};

const TEST_IMAGE: &str = "alpine:latest";

async fn connect_engine() -> DockerEngine {
    let client = DockerClient::connect(None)
        .await
        .expect("Docker daemon must be reachable");
    DockerEngine::new(
        client,
        EngineConfig {
            image: TEST_IMAGE.to_string(),
            label_prefix: "codepod-test".to_string(),
        },
    )
}

async fn with_container<F, Fut>(body: F)
where
    F: FnOnce(DockerEngine, String) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let engine = connect_engine().await;
    engine
        .ensure_image(TEST_IMAGE, &CancellationToken::new())
        .await
        .unwrap();
    let record = engine.create_managed_container(None).await.unwrap();
    let container_id = record.container_id.clone();
    body(engine, container_id.clone()).await;

    let cleanup = connect_engine().await;
    cleanup.remove_container(&container_id).await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Docker
async fn exec_collects_stdout_stderr_and_exit_code() {
    with_container(|engine, id| async move {
        let result = engine
            .exec_command(
                &id,
                &CommandInput::Shell("echo out; echo err >&2; exit 3".into()),
                "",
                Duration::from_secs(10),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.stdout.trim(), "out");
        assert_eq!(result.stderr.trim(), "err");
        assert_eq!(result.exit_code, 3);
    })
    .await;
}

#[tokio::test]
#[ignore] // Requires Docker
async fn streamed_exec_interleaves_and_exits_once() {
    with_container(|engine, id| async move {
        let mut rx = engine
            .exec_command_stream(
                &id,
                &CommandInput::Shell(
                    "for i in 1 2 3; do echo o$i; echo e$i >&2; done".into(),
                ),
                "",
                Duration::from_secs(10),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut exits = 0;
        while let Some(event) = rx.recv().await {
            match event {
                ExecEvent::Stdout { data } => stdout.push_str(&data),
                ExecEvent::Stderr { data } => stderr.push_str(&data),
                ExecEvent::Exit { exit_code, .. } => {
                    exits += 1;
                    assert_eq!(exit_code, 0);
                }
            }
        }
        for marker in ["o1", "o2", "o3"] {
            assert!(stdout.contains(marker), "stdout missing {marker}: {stdout}");
        }
        for marker in ["e1", "e2", "e3"] {
            assert!(stderr.contains(marker), "stderr missing {marker}: {stderr}");
        }
        assert_eq!(exits, 1);
    })
    .await;
}

#[tokio::test]
#[ignore] // Requires Docker
async fn streamed_exec_deadline_reports_minus_one() {
    with_container(|engine, id| async move {
        let started = std::time::Instant::now();
        let mut rx = engine
            .exec_command_stream(
                &id,
                &CommandInput::Shell("sleep 10".into()),
                "",
                Duration::from_secs(2),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        assert!(started.elapsed() < Duration::from_secs(5));
        match last {
            Some(ExecEvent::Exit {
                exit_code,
                execution_time_ms,
            }) => {
                assert_eq!(exit_code, -1);
                assert!(execution_time_ms >= 2000);
            }
            other => panic!("expected exit event, got {:?}", other),
        }
    })
    .await;
}

#[tokio::test]
#[ignore] // Requires Docker
async fn upload_list_download_roundtrip() {
    with_container(|engine, id| async move {
        engine
            .upload_file(&id, "/app/x/y.txt", b"hello".to_vec())
            .await
            .unwrap();

        let entries = engine.list_directory(&id, "/app/x").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "y.txt");
        assert_eq!(entries[0].path, "/app/x/y.txt");
        assert_eq!(entries[0].size, 5);
        assert!(!entries[0].is_directory);

        let bytes = engine.download_file(&id, "/app/x/y.txt").await.unwrap();
        assert_eq!(bytes, b"hello");

        let missing = engine.download_file(&id, "/app/x/absent.txt").await;
        assert!(matches!(missing, Err(Error::FileNotFound(_))));
    })
    .await;
}

#[tokio::test]
#[ignore] // Requires Docker
async fn managed_containers_are_listed_and_removed() {
    let engine = connect_engine().await;
    engine
        .ensure_image(TEST_IMAGE, &CancellationToken::new())
        .await
        .unwrap();
    let record = engine.create_managed_container(Some("sess-1")).await.unwrap();

    let managed = engine.list_managed_containers().await.unwrap();
    assert!(managed
        .iter()
        .any(|c| c.container_id == record.container_id));
    let listed = managed
        .iter()
        .find(|c| c.container_id == record.container_id)
        .unwrap();
    assert_eq!(listed.session_id.as_deref(), Some("sess-1"));

    engine.remove_container(&record.container_id).await.unwrap();
    // removing again is fine
    engine.remove_container(&record.container_id).await.unwrap();

    let managed = engine.list_managed_containers().await.unwrap();
    assert!(!managed
        .iter()
        .any(|c| c.container_id == record.container_id));
}
