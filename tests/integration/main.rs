//! Uses the single integration test approach.
//!
//! Every test drives the real `hostwatch` binary with a scripted discovery feed.

mod common;

use std::process::Command;
use std::time::Duration;

use common::{FakeBroker, KillOnDrop, TestDir, spawn_monitor, wait_for_exit};

const PRINTER_UP: &str = "2024-01-01 10:00:00;up;10.0.0.5;;printer.local;aa:bb:cc:dd:ee:ff;Acme";

#[tokio::test]
async fn new_host_is_published_and_sigterm_stops_cleanly() {
    let dir = TestDir::new("new_host");
    let mut broker = FakeBroker::start().await;
    let feed = dir.write_feed(&format!(
        "echo 'garbage-no-semicolons'\necho '{PRINTER_UP}'\nsleep 30\n"
    ));
    let config = dir.write_config(&feed, broker.port);

    let mut guard = KillOnDrop(spawn_monitor(&config, "10.0.0.0/24"));

    let mut published = Vec::new();
    for _ in 0..3 {
        published.push(broker.next_publish(Duration::from_secs(15)).await);
    }
    assert_eq!(published[0].0, "/test/monitor/printer/event_time");
    assert_eq!(
        published[1],
        ("/test/monitor/printer/cause".to_string(), "NEW".to_string())
    );
    assert_eq!(
        published[2],
        ("/test/monitor/printer/state".to_string(), "up".to_string())
    );
    assert!(
        dir.0.join("hosts.db").exists(),
        "database should be created next to the config"
    );

    let status = Command::new("kill")
        .args(["-TERM", &guard.0.id().to_string()])
        .status()
        .expect("failed to send SIGTERM");
    assert!(status.success(), "kill should succeed");

    let exit = wait_for_exit(&mut guard.0, Duration::from_secs(10)).await;
    assert!(exit.success(), "monitor should exit cleanly, got {exit:?}");
}

#[tokio::test]
async fn feed_end_stops_monitor() {
    let dir = TestDir::new("feed_end");
    let broker = FakeBroker::start().await;
    let feed = dir.write_feed("echo 'not;enough;fields'\n");
    let config = dir.write_config(&feed, broker.port);

    let mut guard = KillOnDrop(spawn_monitor(&config, "10.0.0.1"));
    let exit = wait_for_exit(&mut guard.0, Duration::from_secs(10)).await;
    assert!(exit.success(), "feed end should stop the monitor cleanly, got {exit:?}");
}

#[tokio::test]
async fn missing_config_is_a_startup_failure() {
    let dir = TestDir::new("missing_config");
    let mut guard = KillOnDrop(spawn_monitor(&dir.0.join("absent.toml"), "10.0.0.0/24"));
    let exit = wait_for_exit(&mut guard.0, Duration::from_secs(10)).await;
    assert!(!exit.success(), "missing config must fail startup");
}

#[tokio::test]
async fn unstartable_feed_is_a_startup_failure() {
    let dir = TestDir::new("bad_feed");
    let broker = FakeBroker::start().await;
    let config = dir.write_config(&dir.0.join("feed.sh"), broker.port);
    std::fs::write(
        &config,
        std::fs::read_to_string(&config)
            .unwrap()
            .replace(r#"command = ["sh","#, r#"command = ["/nonexistent/hostwatch-feed","#),
    )
    .unwrap();

    let mut guard = KillOnDrop(spawn_monitor(&config, "10.0.0.0/24"));
    let exit = wait_for_exit(&mut guard.0, Duration::from_secs(10)).await;
    assert!(!exit.success(), "a feed that cannot be spawned must fail startup");
}
