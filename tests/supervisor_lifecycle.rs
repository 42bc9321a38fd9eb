//! Startup, shutdown and fault handling of the supervisor.

mod common;

use common::{fast_settings, until, Rig, PATIENCE};
use serial_sharer::error::SharerError;
use serial_sharer::link::LineLink;
use serial_sharer::supervisor::StopReason;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::sync::oneshot;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_signal_closes_every_link_once() {
    let rig = Rig::new(3);
    let supervisor = rig.supervisor(fast_settings());
    let (tx, rx) = oneshot::channel::<()>();

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        let _ = tx.send(());
    });
    let signal = async move {
        let _ = rx.await;
    };

    let summary = tokio::time::timeout(PATIENCE, supervisor.run(signal))
        .await
        .expect("supervisor did not stop after the signal")
        .unwrap();
    trigger.await.unwrap();

    assert_eq!(summary.reason, StopReason::Signal);
    assert_eq!(summary.sessions.len(), 3);
    assert!(summary.sessions.iter().all(|s| s.result.is_ok()));
    for link in rig.all_links() {
        assert_eq!(link.close_count(), 1, "{} closed wrong number of times", link.name());
        assert!(link.is_closed());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_handle_stops_the_run() {
    let rig = Rig::new(2);
    let supervisor = rig.supervisor(fast_settings());
    let handle = supervisor.shutdown_handle();

    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(40));
        handle.trigger();
    });

    let summary = tokio::time::timeout(PATIENCE, supervisor.run(std::future::pending::<()>()))
        .await
        .expect("supervisor ignored its shutdown handle")
        .unwrap();

    // Every session ended on its own, so no signal was observed.
    assert_eq!(summary.reason, StopReason::SessionsEnded);
    assert_eq!(rig.shared.close_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shared_fault_stops_everything() {
    let rig = Rig::new(2);
    rig.shared.fail_next_write(ErrorKind::BrokenPipe);
    rig.controllers[0].push_line("GET TEMP");

    let supervisor = rig.supervisor(fast_settings());
    let result = tokio::time::timeout(PATIENCE, supervisor.run(std::future::pending::<()>()))
        .await
        .expect("supervisor kept running after a shared fault");

    match result {
        Err(SharerError::Session(e)) => assert!(e.is_shared()),
        other => panic!("expected a shared-device failure, got {other:?}"),
    }
    for link in rig.all_links() {
        assert_eq!(link.close_count(), 1, "{} not closed exactly once", link.name());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shared_fault_can_be_tolerated() {
    let rig = Rig::new(2);
    rig.shared.fail_next_write(ErrorKind::BrokenPipe);
    rig.controllers[0].push_line("FIRST");

    let mut settings = fast_settings();
    settings.stop_on_shared_fault = false;
    let supervisor = rig.supervisor(settings);

    let (first, second) = (rig.controllers[0].clone(), rig.controllers[1].clone());
    let signal = async move {
        until(|| first.is_closed()).await;
        second.push_line("SECOND");
        until(|| !second.written().is_empty()).await;
    };

    let summary = supervisor.run(signal).await.unwrap();
    assert_eq!(summary.reason, StopReason::Signal);
    assert_eq!(rig.controllers[1].written_lines(), vec!["ACK SECOND"]);

    let failed: Vec<_> = summary
        .sessions
        .iter()
        .filter(|s| s.result.is_err())
        .map(|s| s.device.as_str())
        .collect();
    assert_eq!(failed, vec!["CTRL0"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_controller_fault_leaves_others_running() {
    let rig = Rig::new(2);
    rig.controllers[1].fail_next_read(ErrorKind::BrokenPipe);

    let (healthy, broken) = (rig.controllers[0].clone(), rig.controllers[1].clone());
    let signal = async move {
        until(|| broken.is_closed()).await;
        healthy.push_line("GET TEMP");
        until(|| !healthy.written().is_empty()).await;
    };

    let summary = rig.supervisor(fast_settings()).run(signal).await.unwrap();

    assert_eq!(summary.reason, StopReason::Signal);
    assert_eq!(rig.controllers[0].written_lines(), vec!["ACK GET TEMP"]);
    let broken = summary
        .sessions
        .iter()
        .find(|s| s.device == "CTRL1")
        .expect("report for the broken controller");
    assert!(matches!(&broken.result, Err(e) if !e.is_shared()));
    assert_eq!(rig.controllers[1].close_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_all_controllers_failing_is_an_error() {
    let rig = Rig::new(2);
    for controller in &rig.controllers {
        controller.fail_next_read(ErrorKind::BrokenPipe);
    }

    let result = tokio::time::timeout(
        PATIENCE,
        rig.supervisor(fast_settings()).run(std::future::pending::<()>()),
    )
    .await
    .expect("supervisor kept running with no live sessions");

    assert!(matches!(result, Err(SharerError::AllControllersFailed(2))));
    assert_eq!(rig.shared.close_count(), 1);
}
