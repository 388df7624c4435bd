// Integration tests for session lifecycle and per-session command ordering.

mod common;

use std::sync::Arc;
use std::time::Duration;

use arcsim_facade::config::SessionConfig;
use arcsim_facade::engine::registry::SessionEvent;
use arcsim_facade::engine::session::{SessionHandle, SessionState};
use arcsim_facade::kernel::recording::RecordingKernel;
use arcsim_facade::kernel::traits::ProgressKind;
use arcsim_facade::{ArcsimFacade, ErrorKind};

use common::{garment, obstacle};

fn facade_with(kernel: &RecordingKernel) -> ArcsimFacade {
    ArcsimFacade::new(Arc::new(kernel.clone()))
}

#[tokio::test]
async fn test_full_lifecycle() {
    let kernel = RecordingKernel::new();
    let facade = facade_with(&kernel);

    let h = facade
        .create_session(SessionConfig::new(0.01, 50))
        .await
        .unwrap();
    assert_eq!(h, SessionHandle(1));

    assert_eq!(
        facade.add_obstacle(h, obstacle("floor")).await.unwrap(),
        SessionState::Configured
    );
    let err = facade.start_sim(h).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalState);

    facade.add_garment(h, garment("shirt")).await.unwrap();
    assert_eq!(facade.start_sim(h).await.unwrap(), SessionState::Running);

    let err = facade.add_garment(h, garment("jacket")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalState);
    assert_eq!(facade.session_status(h).await.unwrap().garments, 1);

    assert_eq!(facade.pause_sim(h).await.unwrap(), SessionState::Paused);
    assert_eq!(
        facade.add_obstacle(h, obstacle("chair")).await.unwrap(),
        SessionState::Paused
    );
    assert_eq!(facade.start_sim(h).await.unwrap(), SessionState::Running);
    let err = facade.start_sim(h).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalState);

    facade.destroy_session(h).await.unwrap();
    assert_eq!(
        kernel.commands_for(1),
        vec![
            "add_obstacle",
            "add_garment",
            "prepare",
            "start",
            "pause",
            "add_obstacle",
            "start",
            "release"
        ]
    );

    for err in [
        facade.start_sim(h).await.unwrap_err(),
        facade.pause_sim(h).await.unwrap_err(),
        facade.add_obstacle(h, obstacle("late")).await.unwrap_err(),
        facade.session_status(h).await.unwrap_err(),
        facade.destroy_session(h).await.unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::InvalidHandle);
    }
}

#[tokio::test]
async fn test_start_without_garments_fails_regardless_of_obstacles() {
    let kernel = RecordingKernel::new();
    let facade = facade_with(&kernel);
    let h = facade.create_session(SessionConfig::default()).await.unwrap();

    assert_eq!(facade.start_sim(h).await.unwrap_err().kind(), ErrorKind::IllegalState);
    for i in 0..3 {
        facade.add_obstacle(h, obstacle(&format!("o{}", i))).await.unwrap();
        let err = facade.start_sim(h).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalState);
    }
    assert!(!kernel.commands_for(1).contains(&"start"));
}

#[tokio::test]
async fn test_negative_time_step_leaves_handles_untouched() {
    let kernel = RecordingKernel::new();
    let facade = facade_with(&kernel);
    let a = facade.create_session(SessionConfig::default()).await.unwrap();

    let err = facade
        .create_session(SessionConfig::new(-0.5, 50))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    assert_eq!(facade.live_sessions(), vec![a]);

    let b = facade.create_session(SessionConfig::default()).await.unwrap();
    assert_eq!(b, SessionHandle(a.0 + 1));
}

#[tokio::test]
async fn test_unknown_handle_is_rejected() {
    let facade = facade_with(&RecordingKernel::new());
    let err = facade.start_sim(SessionHandle(42)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidHandle);
}

#[tokio::test]
async fn test_malformed_garment_is_format_error() {
    let kernel = RecordingKernel::new();
    let facade = facade_with(&kernel);
    let h = facade.create_session(SessionConfig::default()).await.unwrap();

    let mut bad = garment("broken");
    bad.initial_geometry.faces[0].tri_ws = [0, 1, 7];
    let err = facade.add_garment(h, bad).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);

    let status = facade.session_status(h).await.unwrap();
    assert_eq!(status.state, SessionState::Created);
    assert_eq!(status.garments, 0);
    assert!(kernel.log().is_empty());
}

#[tokio::test]
async fn test_concurrent_adds_reach_kernel_in_arrival_order() {
    let kernel = RecordingKernel::with_latency(Duration::from_millis(5));
    let facade = facade_with(&kernel);
    let h = facade.create_session(SessionConfig::default()).await.unwrap();

    // Single-threaded runtime: each task queues on the session slot in spawn order.
    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let facade = facade.clone();
            tokio::spawn(async move { facade.add_obstacle(h, obstacle(&format!("o{}", i))).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let order: Vec<String> = kernel.log().into_iter().filter_map(|c| c.detail).collect();
    let expected: Vec<String> = (0..8).map(|i| format!("o{}", i)).collect();
    assert_eq!(order, expected);
    assert_eq!(kernel.max_concurrent(), 1);
    assert_eq!(facade.session_status(h).await.unwrap().obstacles, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sessions_run_concurrently() {
    let kernel = RecordingKernel::with_latency(Duration::from_millis(100));
    let facade = facade_with(&kernel);
    let a = facade.create_session(SessionConfig::default()).await.unwrap();
    let b = facade.create_session(SessionConfig::default()).await.unwrap();

    let (ra, rb) = tokio::join!(
        facade.add_obstacle(a, obstacle("a")),
        facade.add_obstacle(b, obstacle("b"))
    );
    ra.unwrap();
    rb.unwrap();
    assert_eq!(kernel.max_concurrent(), 2);
}

#[tokio::test]
async fn test_destroy_waits_for_queued_commands() {
    let kernel = RecordingKernel::with_latency(Duration::from_millis(10));
    let facade = facade_with(&kernel);
    let h = facade.create_session(SessionConfig::default()).await.unwrap();

    let adds: Vec<_> = (0..3)
        .map(|i| {
            let facade = facade.clone();
            tokio::spawn(async move { facade.add_obstacle(h, obstacle(&format!("o{}", i))).await })
        })
        .collect();
    let destroy = {
        let facade = facade.clone();
        tokio::spawn(async move { facade.destroy_session(h).await })
    };
    tokio::task::yield_now().await;

    // Destruction has begun: new commands are refused immediately.
    let err = facade.add_obstacle(h, obstacle("late")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidHandle);
    assert!(facade.live_sessions().is_empty());

    for add in adds {
        add.await.unwrap().unwrap();
    }
    destroy.await.unwrap().unwrap();
    assert_eq!(
        kernel.commands_for(1),
        vec!["add_obstacle", "add_obstacle", "add_obstacle", "release"]
    );
}

#[tokio::test]
async fn test_lifecycle_events() {
    let facade = facade_with(&RecordingKernel::new());
    let mut events = facade.subscribe();

    let h = facade.create_session(SessionConfig::default()).await.unwrap();
    facade.add_garment(h, garment("shirt")).await.unwrap();
    facade.start_sim(h).await.unwrap();
    facade.destroy_session(h).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if !matches!(event, SessionEvent::Progress { .. }) {
            seen.push(event);
        }
    }
    assert_eq!(
        seen,
        vec![
            SessionEvent::Created { handle: h },
            SessionEvent::GarmentAdded {
                handle: h,
                garments: 1
            },
            SessionEvent::StateChanged {
                handle: h,
                from: SessionState::Created,
                to: SessionState::Configured
            },
            SessionEvent::StateChanged {
                handle: h,
                from: SessionState::Configured,
                to: SessionState::Running
            },
            SessionEvent::StateChanged {
                handle: h,
                from: SessionState::Running,
                to: SessionState::Destroyed
            },
            SessionEvent::Destroyed { handle: h },
        ]
    );
}

#[tokio::test]
async fn test_stats_track_commands() {
    let kernel = RecordingKernel::new();
    let facade = facade_with(&kernel);
    let h = facade.create_session(SessionConfig::default()).await.unwrap();
    facade.add_garment(h, garment("shirt")).await.unwrap();
    let _ = facade.pause_sim(h).await;

    let stats = facade.stats();
    assert_eq!(stats.commands_dispatched, 2);
    assert_eq!(stats.commands_failed, 1);
    assert_eq!(stats.commands_in_flight, 0);
    assert_eq!(stats.sessions_created, 1);
    assert_eq!(stats.live_sessions, 1);
}

#[tokio::test]
async fn test_start_reports_progress_with_garment_mesh() {
    let facade = facade_with(&RecordingKernel::new());
    let mut events = facade.subscribe();
    let h = facade
        .create_session(SessionConfig::new(0.25, 50))
        .await
        .unwrap();
    let shirt = garment("shirt");
    let mesh = shirt.initial_geometry.clone();
    facade.add_garment(h, shirt).await.unwrap();
    facade.start_sim(h).await.unwrap();

    let progress = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if let SessionEvent::Progress { handle, progress } = events.recv().await.unwrap() {
                return (handle, progress);
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(progress.0, h);
    assert_eq!(progress.1.kind, ProgressKind::Frame);
    assert_eq!(progress.1.frame, 1);
    assert!((progress.1.time - 0.25).abs() < 1e-9);
    assert_eq!(progress.1.garment, Some(mesh));
}

#[tokio::test]
async fn test_abandoned_destroy_still_releases_once() {
    let kernel = RecordingKernel::with_latency(Duration::from_millis(50));
    let facade = facade_with(&kernel);
    let h = facade.create_session(SessionConfig::default()).await.unwrap();

    let abandoned = tokio::time::timeout(Duration::from_millis(10), facade.destroy_session(h)).await;
    assert!(abandoned.is_err());
    let err = facade.destroy_session(h).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidHandle);

    tokio::time::sleep(Duration::from_millis(150)).await;
    let stats = facade.stats();
    assert_eq!(stats.live_sessions, 0);
    assert_eq!(stats.commands_in_flight, 0);
    assert_eq!(stats.sessions_destroyed, 1);
    assert_eq!(facade.shutdown().await, 0);
    assert_eq!(kernel.commands_for(1), vec!["release"]);
}
