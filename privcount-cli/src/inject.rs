//! A development stand-in for the relay-local event source a Data
//! Collector dials: authenticates connections the same way the real
//! control port does, then streams wire-format event lines to whoever
//! connects, so `privcount dc` can be exercised without a live relay.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

/// Configuration for the development event injector.
#[derive(Parser, Debug)]
pub struct InjectConfig {
    /// Address to listen on for a Data Collector's event-source
    /// connection.
    #[clap(long, env = "PRIVCOUNT_INJECT_LISTEN_ADDR", default_value = "127.0.0.1:9999")]
    pub listen_addr: SocketAddr,

    /// Password a connecting Data Collector must send as its first
    /// line. Any password is accepted if unset.
    #[clap(long, env = "PRIVCOUNT_INJECT_PASSWORD")]
    pub password: Option<SecretString>,

    /// Path to a file of wire-format event lines
    /// (`EventType field1=value1 field2=value2`) replayed to each
    /// connecting client, one line per `--period`. A short synthetic
    /// burst of `Cell` events is sent if unset.
    #[clap(long, env = "PRIVCOUNT_INJECT_EVENTS_FILE")]
    pub events_file: Option<PathBuf>,

    /// Delay between consecutive replayed lines.
    #[clap(
        long,
        env = "PRIVCOUNT_INJECT_PERIOD",
        default_value = "100ms",
        value_parser = humantime::parse_duration
    )]
    pub period: Duration,
}

/// Accepts connections on `config.listen_addr` until a shutdown signal
/// arrives, replaying the configured event stream to each one.
pub async fn run(config: InjectConfig) -> eyre::Result<()> {
    let listener = TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "event injector listening");

    let password = Arc::new(config.password);
    let events_file = Arc::new(config.events_file);
    let period = config.period;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                info!(%peer, "data collector connected");
                let password = password.clone();
                let events_file = events_file.clone();
                tokio::spawn(async move {
                    if let Err(err) = serve(stream, &password, &events_file, period).await {
                        warn!(%peer, %err, "event injector connection ended");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                return Ok(());
            }
        }
    }
}

async fn serve(
    stream: TcpStream,
    password: &Option<SecretString>,
    events_file: &Option<PathBuf>,
    period: Duration,
) -> eyre::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let sent = lines.next_line().await?.unwrap_or_default();
    if let Some(password) = password {
        if sent != password.expose_secret() {
            eyre::bail!("wrong event-source password");
        }
    }

    let events = match events_file {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => synthetic_burst(),
    };
    for line in events.lines().filter(|l| !l.trim().is_empty()) {
        write_half.write_all(line.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
        tokio::time::sleep(period).await;
    }
    Ok(())
}

fn synthetic_burst() -> String {
    (0..20)
        .map(|i| format!("Cell circuit_id=synthetic-{i} relay=guard\n"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn serve_rejects_the_wrong_password() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let password = Some(SecretString::from("right".to_string()));
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            serve(stream, &password, &None, Duration::from_millis(1)).await
        });
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"wrong\n").await.unwrap();
        let result = server.await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn serve_replays_the_synthetic_burst_on_no_password() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            serve(stream, &None, &None, Duration::from_millis(1)).await
        });
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"anything\n").await.unwrap();
        let mut received = String::new();
        client.read_to_string(&mut received).await.unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(received.lines().count(), 20);
        assert!(received.lines().next().unwrap().starts_with("Cell "));
    }
}
