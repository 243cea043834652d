//! Queue runs against a worker child process (`maia_daq worker`).

use std::path::PathBuf;
use std::time::Duration;
use tokio::time::timeout;

use maia_daq::config::ExecutorConfig;
use maia_daq::{
    ControlPanel, Controller, MonitorEvent, RunState, ScanRequest, Settings, StatusEvent,
    WorkerSpawn,
};

const WAIT: Duration = Duration::from_secs(30);

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.executor = ExecutorConfig {
        speed_mm_per_sec: 1000.0,
        settle_ms: 0,
        dwell_scale: 0.0,
    };
    settings
}

fn spawn() -> WorkerSpawn {
    spawn_with(settings())
}

fn spawn_with(settings: Settings) -> WorkerSpawn {
    WorkerSpawn::Process {
        program: PathBuf::from(env!("CARGO_BIN_EXE_maia_daq")),
        settings,
    }
}

fn scan(name: &str, pitch: u32) -> ScanRequest {
    ScanRequest::builder(name)
        .x(0.0, 10.0, pitch)
        .y(0.0, 10.0, pitch)
        .dwell(0.01)
        .build()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_process_worker_runs_queue_in_order() {
    let mut controller = Controller::start(&settings(), spawn()).unwrap();
    let mut events = controller.subscribe();

    // zero pitch is rejected by the executor inside the child
    for request in [scan("a", 3), scan("bad_geometry", 0), scan("c", 2)] {
        controller.queue_mut().enqueue(request);
    }
    assert!(controller.run().unwrap());

    let report = timeout(WAIT, controller.wait_for_run())
        .await
        .expect("run timed out")
        .unwrap()
        .unwrap();
    assert_eq!(report.completed(), 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.items[1].name, "bad_geometry");
    assert_eq!(controller.run_state().get(), RunState::Idle);

    let mut labels = Vec::new();
    while labels.len() < 6 {
        match events.recv().await.unwrap() {
            MonitorEvent::Status(event) => labels.push(event.label()),
            MonitorEvent::Disconnected => panic!("worker disconnected"),
        }
    }
    assert_eq!(
        labels,
        vec!["running", "completed", "running", "failed", "running", "completed"]
    );

    timeout(WAIT, controller.shutdown())
        .await
        .expect("shutdown timed out")
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_worker_program_fails_to_start() {
    let spawn = WorkerSpawn::Process {
        program: PathBuf::from("/nonexistent/maia_daq"),
        settings: settings(),
    };
    let err = Controller::start(&settings(), spawn).unwrap_err();
    assert!(err.to_string().contains("Failed to spawn worker"));
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn test_killed_worker_is_reported_as_disconnected() {
    let mut slow = settings();
    slow.executor.dwell_scale = 1.0;
    let mut controller = Controller::start(&slow, spawn_with(slow.clone())).unwrap();
    let mut events = controller.subscribe();

    let long = ScanRequest::builder("long").x(0.0, 0.0, 1).dwell(30.0).build();
    controller.queue_mut().enqueue(long);
    assert!(controller.run().unwrap());

    let running = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert!(matches!(
        running,
        MonitorEvent::Status(StatusEvent::Running { .. })
    ));
    assert_eq!(controller.run_state().get(), RunState::Running);

    let pid = controller.worker_pid().expect("process worker has a pid");
    let killed = std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .unwrap();
    assert!(killed.success());

    let err = timeout(WAIT, controller.wait_for_run())
        .await
        .expect("run did not end after the worker died")
        .unwrap()
        .unwrap_err();
    assert!(err.is_disconnect(), "unexpected error: {}", err);
    assert!(!controller.is_connected());

    // the mapped byte still says Running; nothing may trust it any more
    assert_eq!(controller.run_state().get(), RunState::Running);
    assert_eq!(controller.state(), RunState::Idle);
    assert_eq!(controller.panel(), ControlPanel::disconnected());
    assert!(!controller.pause());

    controller.queue_mut().enqueue(scan("again", 2));
    let err = controller.run().unwrap_err();
    assert!(err.is_disconnect(), "unexpected error: {}", err);

    let exit = timeout(WAIT, controller.shutdown())
        .await
        .expect("shutdown timed out");
    assert!(exit.is_err());
}
