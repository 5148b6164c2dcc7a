#![cfg(unix)]

use std::{sync::Arc, time::Duration};

use roadie_core::{platform_controller, ProcessController, Supervisor};
use roadie_types::{ServiceDefinition, SupervisorConfig};

fn sleeper_def() -> ServiceDefinition {
    ServiceDefinition::new(
        "sleeper",
        vec!["bash".to_owned(), "./tests/fixtures/term_exits.sh".to_owned()],
    )
}

fn cfg_in(dir: &tempfile::TempDir) -> SupervisorConfig {
    SupervisorConfig {
        state_dir: dir.path().join("state"),
        log_dir: dir.path().join("logs"),
        stop_reprobe_delay: Duration::from_millis(50),
        ..SupervisorConfig::default()
    }
}

/// A service started by one supervisor instance must survive that
/// instance going away, be picked back up from the pid file by the next
/// one and still be stoppable there.
#[tokio::test]
async fn restarted_supervisor_reattaches_and_stops() {
    let dir = tempfile::tempdir().unwrap();

    let started_pid = {
        let (sup, _events) =
            Supervisor::launch(vec![sleeper_def()], cfg_in(&dir), platform_controller())
                .await
                .unwrap();
        assert!(sup.start_service("sleeper").await.unwrap());

        let pid = sup
            .service("sleeper")
            .unwrap()
            .effective_pid()
            .await
            .expect("started service has a pid");
        sup.shutdown();
        pid
        // Supervisor dropped here; the process keeps running detached.
    };

    let ctl = platform_controller();
    assert!(ctl.is_alive(started_pid).await, "process outlived the supervisor");

    let (sup, _events) =
        Supervisor::launch(vec![sleeper_def()], cfg_in(&dir), Arc::clone(&ctl))
            .await
            .unwrap();

    let snap = sup.service("sleeper").unwrap().snapshot().await;
    assert!(snap.running);
    assert!(snap.externally_managed);
    assert_eq!(snap.effective_pid, Some(started_pid));

    sup.stop_service("sleeper", true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(!ctl.is_alive(started_pid).await, "reattached process was stopped");

    let snap = sup.service("sleeper").unwrap().snapshot().await;
    assert!(!snap.running);
    assert_eq!(snap.effective_pid, None);
    sup.shutdown();
}

/// The pid file never resurrects dead processes: a second launch after
/// the process is gone starts from a clean slate.
#[tokio::test]
async fn dead_pid_is_swept_on_launch() {
    let dir = tempfile::tempdir().unwrap();
    let ctl = platform_controller();

    let pid = {
        let (sup, _events) =
            Supervisor::launch(vec![sleeper_def()], cfg_in(&dir), Arc::clone(&ctl))
                .await
                .unwrap();
        sup.start_service("sleeper").await.unwrap();
        let pid = sup
            .service("sleeper")
            .unwrap()
            .effective_pid()
            .await
            .unwrap();
        sup.shutdown();
        pid
    };

    ctl.kill_tree(pid, true).await;
    tokio::time::sleep(Duration::from_millis(700)).await;

    let (sup, _events) =
        Supervisor::launch(vec![sleeper_def()], cfg_in(&dir), Arc::clone(&ctl))
            .await
            .unwrap();

    let snap = sup.service("sleeper").unwrap().snapshot().await;
    assert!(!snap.running);
    assert_eq!(snap.effective_pid, None);
    sup.shutdown();
}
