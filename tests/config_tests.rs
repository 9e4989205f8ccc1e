//! Tests for loading runtime configuration and applying it to a dispatcher

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Write;

use http::Method;
use routecore::dispatcher::{Dispatcher, Handler};
use routecore::route::ExecutionMode;
use routecore::router::Router;
use routecore::runtime_config::{RuntimeConfig, DEFAULT_REQUEST_ID_HEADER};
use routecore::worker_pool::WorkerPoolConfig;
use tempfile::NamedTempFile;

mod common;
use common::{dispatch, request, wait_for_response};

fn write_config(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_yaml_file() {
    let file = write_config(
        r#"
default_execution_mode: worker
request_id_header: x-correlation-id
worker:
  num_workers: 3
  queue_bound: 32
  stack_size: "0x80000"
"#,
    );

    let config = RuntimeConfig::from_yaml_file(file.path()).unwrap();
    assert_eq!(config.default_execution_mode, ExecutionMode::Worker);
    assert_eq!(config.request_id_header, "x-correlation-id");
    assert_eq!(config.worker, WorkerPoolConfig::new(3, 32, 0x80000));
}

#[test]
fn test_partial_yaml_keeps_defaults() {
    let file = write_config("worker:\n  num_workers: 1\n");
    let config = RuntimeConfig::from_yaml_file(file.path()).unwrap();
    assert_eq!(config.default_execution_mode, ExecutionMode::Default);
    assert_eq!(config.request_id_header, DEFAULT_REQUEST_ID_HEADER);
    assert_eq!(config.worker.num_workers, 1);
    assert_eq!(config.worker.queue_bound, WorkerPoolConfig::default().queue_bound);
}

#[test]
fn test_missing_file_names_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.yaml");
    let err = RuntimeConfig::from_yaml_file(&path).unwrap_err();
    assert!(format!("{err:#}").contains("absent.yaml"));
}

#[test]
fn test_invalid_yaml_is_an_error() {
    let file = write_config("default_execution_mode: sideways\n");
    let err = RuntimeConfig::from_yaml_file(file.path()).unwrap_err();
    assert!(err.to_string().starts_with("Invalid runtime config"));
}

#[test]
fn test_runtime_config_applies_to_dispatcher() {
    let config = RuntimeConfig::from_yaml_str(
        "default_execution_mode: worker\nrequest_id_header: x-trace\nworker:\n  num_workers: 2\n",
    )
    .unwrap();

    let mut router = Router::new();
    router
        .get(
            "/where",
            Handler::non_blocking(|req| {
                let thread = std::thread::current().name().unwrap_or_default().to_string();
                Ok(format!("{thread} {}", req.request_id).into())
            }),
        )
        .unwrap();
    let d = Dispatcher::builder(router.into_shared())
        .with_runtime_config(&config)
        .build()
        .unwrap();
    assert_eq!(d.pool().workers(), 2);

    // the configured default sends even non-blocking handlers to the pool
    let id = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    let ctx = std::sync::Arc::new(
        routecore::context::MemoryContext::new(Method::GET, "/where").with_header("X-Trace", id),
    );
    dispatch(&d, &ctx);
    wait_for_response(&ctx);
    let body = ctx.body_text();
    assert!(body.starts_with("routecore-worker-"), "{body}");
    assert!(body.ends_with(id), "{body}");

    let plain = request(Method::GET, "/where");
    dispatch(&d, &plain);
    wait_for_response(&plain);
    assert!(!plain.body_text().ends_with(id));
}
