//! Common utilities for integration tests.
//!
//! Spawning the monitor binary against a scripted discovery feed, a scratch directory for its
//! config and database, and an in-process MQTT broker that records what gets published.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use rumqttc::{Packet, mqttbytes};
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::{TcpListener, TcpStream},
    sync::mpsc,
};

/// Guard that kills and waits on a child process when dropped.
pub struct KillOnDrop(pub Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        drop(self.0.kill());
        drop(self.0.wait());
    }
}

fn get_monitor_bin() -> &'static str {
    env!("CARGO_BIN_EXE_hostwatch")
}

/// Scratch directory holding the config, feed script and database of one test.
pub struct TestDir(pub PathBuf);

impl TestDir {
    pub fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!(
            "hostwatch_integration_{}_{name}",
            std::process::id()
        ));
        drop(std::fs::remove_dir_all(&dir));
        std::fs::create_dir_all(&dir).expect("failed to create test dir");
        Self(dir)
    }

    /// Writes a shell script that plays the discovery feed.
    pub fn write_feed(&self, script: &str) -> PathBuf {
        let path = self.0.join("feed.sh");
        std::fs::write(&path, script).expect("failed to write feed script");
        path
    }

    /// Writes a config that runs `feed` and publishes to a broker on `broker_port`.
    pub fn write_config(&self, feed: &Path, broker_port: u16) -> PathBuf {
        let path = self.0.join("hostwatch.toml");
        let config = format!(
            r#"
[monitor]
idle_poll_ms = 50

[probe]
echo_timeout_short_ms = 100
echo_timeout_long_ms = 100

[feed]
command = ["sh", "{feed}"]

[broker]
host = "127.0.0.1"
port = {broker_port}
client_id = "hostwatch-integration"
connect_timeout_ms = 2000

[db]
path = "hosts.db"
"#,
            feed = feed.display()
        );
        std::fs::write(&path, config).expect("failed to write config");
        path
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        drop(std::fs::remove_dir_all(&self.0));
    }
}

/// Spawn the monitor binary for `target` with the given config file.
pub fn spawn_monitor(config_path: &Path, target: &str) -> Child {
    Command::new(get_monitor_bin())
        .args(["--config", config_path.to_str().unwrap(), target])
        .env("RUST_LOG", "error")
        .stdout(Stdio::null())
        .spawn()
        .expect("failed to start hostwatch")
}

/// Poll the child until it exits or `timeout` elapses.
pub async fn wait_for_exit(child: &mut Child, timeout: Duration) -> ExitStatus {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().expect("failed to poll child") {
            return status;
        }
        assert!(
            start.elapsed() < timeout,
            "process did not exit within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Minimal broker: accepts every CONNECT and forwards each PUBLISH as `(topic, payload)`.
pub struct FakeBroker {
    pub port: u16,
    publishes: mpsc::UnboundedReceiver<(String, String)>,
}

impl FakeBroker {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind fake broker");
        let port = listener.local_addr().unwrap().port();
        let (tx, publishes) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(serve(socket, tx));
            }
        });

        Self { port, publishes }
    }

    /// Next published `(topic, payload)`, panicking after `timeout`.
    pub async fn next_publish(&mut self, timeout: Duration) -> (String, String) {
        tokio::time::timeout(timeout, self.publishes.recv())
            .await
            .expect("no publish within timeout")
            .expect("broker stopped")
    }
}

/// One client session: CONNACK every CONNECT, forward every PUBLISH, stop on DISCONNECT.
async fn serve(mut socket: TcpStream, tx: mpsc::UnboundedSender<(String, String)>) {
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        match mqttbytes::v4::read(&mut buf, 64 * 1024) {
            Ok(Packet::Connect(_)) => {
                if socket.write_all(&[0x20, 2, 0, 0]).await.is_err() {
                    return;
                }
            }
            Ok(Packet::Publish(publish)) => {
                let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                drop(tx.send((publish.topic, payload)));
            }
            Ok(Packet::Disconnect) => return,
            Ok(_) => {}
            Err(mqttbytes::Error::InsufficientBytes(_)) => match socket.read_buf(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            },
            Err(_) => return,
        }
    }
}
