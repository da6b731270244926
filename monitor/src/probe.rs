//! Active reachability probing used to confirm candidate transitions.
//!
//! A probe never fails: lack of connectivity is reported as [`HostState::Down`].

use core::{future::Future, net::IpAddr, net::SocketAddr, time::Duration};
use std::process::Stdio;

use tokio::{net::TcpStream, process::Command, time::timeout};
use tracing::debug;

use crate::{config::ProbeConfig, model::HostState};

/// Decides whether a host is currently reachable.
pub trait Prober {
    fn probe(&self, ip: IpAddr, port: Option<u16>) -> impl Future<Output = HostState> + Send;
}

/// A single echo request/reply exchange.
pub trait EchoProbe {
    /// Returns `true` if a reply arrived within `wait`.
    fn echo(&self, ip: IpAddr, wait: Duration) -> impl Future<Output = bool> + Send;
}

/// Echo probe that shells out to the system `ping` binary.
#[derive(Debug, Clone)]
pub struct PingCommand {
    program: String,
}

impl PingCommand {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

/// Rounds up to whole seconds, never below one.
fn whole_secs(wait: Duration) -> u64 {
    (wait.as_secs() + u64::from(wait.subsec_nanos() > 0)).max(1)
}

/// Arguments for one echo request to `ip` that waits at most `wait` for the reply.
///
/// BSD-derived pings (macOS included) take `-W` in milliseconds, iputils in whole seconds.
fn ping_args(ip: IpAddr, wait: Duration) -> Vec<String> {
    #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "dragonfly"
    ))]
    let wait_arg = wait.as_millis().max(1).to_string();
    #[cfg(not(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "dragonfly"
    )))]
    let wait_arg = whole_secs(wait).to_string();

    vec![
        "-c".to_string(),
        "1".to_string(),
        "-W".to_string(),
        wait_arg,
        ip.to_string(),
    ]
}

impl EchoProbe for PingCommand {
    async fn echo(&self, ip: IpAddr, wait: Duration) -> bool {
        let mut command = Command::new(&self.program);
        command
            .args(ping_args(ip, wait))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        // ping enforces `-W` itself; the outer timeout only guards against a wedged binary
        let grace = Duration::from_secs(whole_secs(wait) + 1);
        match timeout(grace, command.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!("Failed to run {} for {}: {}", self.program, ip, e);
                false
            }
            Err(_) => {
                debug!("{} for {} did not exit within {:?}", self.program, ip, grace);
                false
            }
        }
    }
}

/// TCP connect probe with an escalating echo-probe fallback.
#[derive(Debug, Clone)]
pub struct ActiveProber<E = PingCommand> {
    echo: E,
    connect_timeout: Duration,
    echo_timeout_short: Duration,
    echo_timeout_long: Duration,
}

impl ActiveProber<PingCommand> {
    #[must_use]
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self::with_echo(PingCommand::new(config.ping_command.clone()), config)
    }
}

impl<E: EchoProbe> ActiveProber<E> {
    #[must_use]
    pub fn with_echo(echo: E, config: &ProbeConfig) -> Self {
        Self {
            echo,
            connect_timeout: config.connect_timeout(),
            echo_timeout_short: config.echo_timeout_short(),
            echo_timeout_long: config.echo_timeout_long(),
        }
    }

    async fn connect(&self, addr: SocketAddr) -> bool {
        match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!("Connect probe to {} failed: {}", addr, e);
                false
            }
            Err(_elapsed) => {
                debug!("Connect probe to {} timed out", addr);
                false
            }
        }
    }
}

impl<E: EchoProbe + Sync> Prober for ActiveProber<E> {
    #[tracing::instrument(skip(self), level = "debug")]
    async fn probe(&self, ip: IpAddr, port: Option<u16>) -> HostState {
        if let Some(port) = port.filter(|&p| p > 0)
            && self.connect(SocketAddr::new(ip, port)).await
        {
            return HostState::Up;
        }

        for wait in [self.echo_timeout_short, self.echo_timeout_long] {
            if self.echo.echo(ip, wait).await {
                return HostState::Up;
            }
            debug!("No echo reply from {} within {:?}", ip, wait);
        }
        HostState::Down
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use alloc::sync::Arc;
    use core::net::Ipv4Addr;
    use std::sync::Mutex;

    use tokio::net::TcpListener;

    use super::*;

    /// Echo probe answering from a script and remembering the waits it was asked for.
    #[derive(Clone)]
    pub(crate) struct ScriptedEcho {
        replies: Arc<Mutex<Vec<bool>>>,
        pub(crate) waits: Arc<Mutex<Vec<Duration>>>,
    }

    impl ScriptedEcho {
        pub(crate) fn new(replies: &[bool]) -> Self {
            Self {
                replies: Arc::new(Mutex::new(replies.iter().rev().copied().collect())),
                waits: Arc::default(),
            }
        }

        pub(crate) fn calls(&self) -> Vec<Duration> {
            self.waits.lock().unwrap().clone()
        }
    }

    impl EchoProbe for ScriptedEcho {
        async fn echo(&self, _ip: IpAddr, wait: Duration) -> bool {
            self.waits.lock().unwrap().push(wait);
            self.replies.lock().unwrap().pop().unwrap_or(false)
        }
    }

    fn config() -> ProbeConfig {
        ProbeConfig {
            connect_timeout_ms: 200,
            echo_timeout_short_ms: 1000,
            echo_timeout_long_ms: 2000,
            ..ProbeConfig::default()
        }
    }

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[tokio::test]
    async fn open_port_is_up_without_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let echo = ScriptedEcho::new(&[]);
        let prober = ActiveProber::with_echo(echo.clone(), &config());

        assert_eq!(prober.probe(LOCALHOST, Some(port)).await, HostState::Up);
        assert!(echo.calls().is_empty(), "echo must not run after a successful connect");
    }

    #[tokio::test]
    async fn closed_port_falls_back_to_echo() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let echo = ScriptedEcho::new(&[true]);
        let prober = ActiveProber::with_echo(echo.clone(), &config());

        assert_eq!(prober.probe(LOCALHOST, Some(port)).await, HostState::Up);
        assert_eq!(echo.calls(), vec![Duration::from_secs(1)]);
    }

    #[tokio::test]
    async fn no_port_goes_straight_to_echo() {
        let echo = ScriptedEcho::new(&[true]);
        let prober = ActiveProber::with_echo(echo.clone(), &config());

        assert_eq!(prober.probe(LOCALHOST, None).await, HostState::Up);
        assert_eq!(prober.probe(LOCALHOST, Some(0)).await, HostState::Down);
        assert_eq!(echo.calls().len(), 3);
    }

    #[tokio::test]
    async fn second_echo_uses_longer_timeout() {
        let echo = ScriptedEcho::new(&[false, true]);
        let prober = ActiveProber::with_echo(echo.clone(), &config());

        assert_eq!(prober.probe(LOCALHOST, None).await, HostState::Up);
        assert_eq!(
            echo.calls(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn two_missed_echoes_mean_down() {
        let echo = ScriptedEcho::new(&[false, false]);
        let prober = ActiveProber::with_echo(echo.clone(), &config());

        assert_eq!(prober.probe(LOCALHOST, None).await, HostState::Down);
        assert_eq!(echo.calls().len(), 2);
    }

    #[test]
    #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "dragonfly"
    ))]
    fn ping_wait_is_in_milliseconds_on_bsd() {
        assert_eq!(
            ping_args(LOCALHOST, Duration::from_secs(1)),
            ["-c", "1", "-W", "1000", "127.0.0.1"]
        );
        assert_eq!(ping_args(LOCALHOST, Duration::from_secs(2))[3], "2000");
        assert_eq!(ping_args(LOCALHOST, Duration::ZERO)[3], "1");
    }

    #[test]
    #[cfg(not(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "dragonfly"
    )))]
    fn ping_wait_is_in_whole_seconds_on_iputils() {
        assert_eq!(
            ping_args(LOCALHOST, Duration::from_secs(1)),
            ["-c", "1", "-W", "1", "127.0.0.1"]
        );
        assert_eq!(ping_args(LOCALHOST, Duration::from_secs(2))[3], "2");
        assert_eq!(ping_args(LOCALHOST, Duration::from_millis(1500))[3], "2");
        assert_eq!(ping_args(LOCALHOST, Duration::from_millis(100))[3], "1");
    }

    #[test]
    fn grace_period_rounds_up() {
        assert_eq!(whole_secs(Duration::from_millis(100)), 1);
        assert_eq!(whole_secs(Duration::from_millis(2001)), 3);
        assert_eq!(whole_secs(Duration::from_secs(2)), 2);
    }

    #[tokio::test]
    async fn missing_ping_binary_reads_as_no_reply() {
        let ping = PingCommand::new("/nonexistent/hostwatch-ping");
        assert!(!ping.echo(LOCALHOST, Duration::from_millis(100)).await);
    }
}
