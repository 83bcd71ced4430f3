// Upstream measurement channel.
//
// The realtime feed is a reconnecting TCP subscription delivering
// newline-delimited JSON measurement records. Reads block until the next
// record; any connect or read error tears the connection down and the loop
// redials with bounded exponential backoff. Undecodable frames are dropped
// without touching the reconnect state. Nothing here ever terminates the
// ingestion side short of the whole process going down.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::message::Message;
use crate::{PulseError, Result};

/// Reconnect delay growth: `first × factor^attempt`, clamped to `max`.
/// The attempt counter resets on every successful connect.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    pub first: Duration,
    pub max: Duration,
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(250),
            max: Duration::from_secs(15),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let secs = self.first.as_secs_f64() * self.factor.powi(attempt.min(i32::MAX as u32) as i32);
        if !secs.is_finite() || secs < 0.0 || secs > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Decode one wire frame into a measurement.
pub fn decode_frame(frame: &str) -> Result<Message> {
    Ok(serde_json::from_str(frame)?)
}

/// Realtime TCP subscription to the upstream metrics feed.
pub struct TcpMeasurementSource {
    address: String,
    backoff: BackoffPolicy,
}

impl TcpMeasurementSource {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Start the reader task and hand back the channel of decoded
    /// measurements. The task runs for process lifetime; it only exits
    /// once the receiver is dropped.
    pub fn spawn(self) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move { self.run(tx).await });
        rx
    }

    async fn run(self, tx: mpsc::Sender<Message>) {
        let mut attempt: u32 = 0;
        loop {
            match TcpStream::connect(&self.address).await {
                Ok(stream) => {
                    info!(address = %self.address, "connected to measurement feed");
                    attempt = 0;
                    if let Err(e) = self.read_stream(stream, &tx).await {
                        warn!(error = %e, "measurement feed read failed");
                    }
                }
                Err(e) => warn!(address = %self.address, error = %e, "measurement feed connect failed"),
            }
            if tx.is_closed() {
                return;
            }
            let delay = self.backoff.delay(attempt);
            attempt = attempt.saturating_add(1);
            debug!(delay_ms = delay.as_millis() as u64, "reconnecting to measurement feed");
            tokio::time::sleep(delay).await;
        }
    }

    async fn read_stream(&self, stream: TcpStream, tx: &mpsc::Sender<Message>) -> Result<()> {
        let mut lines = BufReader::new(stream).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match decode_frame(&line) {
                Ok(message) => {
                    if tx.send(message).await.is_err() {
                        return Ok(());
                    }
                }
                Err(e) => warn!(error = %e, "dropping undecodable measurement"),
            }
        }
        Ok(())
    }
}

/// One-shot snapshot of recent measurements from the upstream HTTP
/// endpoint, used to prime profiles at startup before the realtime
/// subscription begins.
pub async fn fetch_snapshot(http_address: &str) -> Result<Vec<Message>> {
    let url = format!("{}/measurements", http_address.trim_end_matches('/'));
    let response = reqwest::get(&url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| PulseError::UpstreamError(e.to_string()))?;
    response
        .json::<Vec<Message>>()
        .await
        .map_err(|e| PulseError::UpstreamError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Value;

    #[test]
    fn backoff_grows_by_the_factor() {
        let backoff = BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2.0,
        };
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
    }

    #[test]
    fn backoff_clamps_at_the_max() {
        let backoff = BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(1),
            factor: 2.0,
        };
        assert_eq!(backoff.delay(10), Duration::from_secs(1));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn frames_decode_or_error() {
        let message =
            decode_frame(r#"{"name":"cpu_temp","timestamp":17,"value":54.5}"#).unwrap();
        assert_eq!(message.name, "cpu_temp");
        assert_eq!(message.value, Some(Value::Float(54.5)));

        assert!(decode_frame("not json").is_err());
    }

    #[tokio::test]
    async fn undecodable_lines_are_dropped_and_reads_continue() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"garbage\n{\"name\":\"cpu_temp\",\"value\":2}\n")
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });

        let mut messages = TcpMeasurementSource::new(address).spawn();
        let message = messages.recv().await.unwrap();
        assert_eq!(message.name, "cpu_temp");
        assert_eq!(message.value, Some(Value::Int(2)));
    }
}
