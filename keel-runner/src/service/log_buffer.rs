//! Log buffer service
//!
//! Collects raw sandbox output between flushes. A background task drains the
//! buffer on a short debounce and sends it to the orchestrator.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::repository::ControlPlane;

/// Thread-safe output buffer shared between the output pump and the flusher
#[derive(Clone, Default)]
pub struct LogBuffer {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, bytes: &[u8]) {
        self.lock().extend_from_slice(bytes);
    }

    pub fn push_line(&self, line: &str) {
        let mut buffer = self.lock();
        buffer.extend_from_slice(line.as_bytes());
        buffer.push(b'\n');
    }

    /// Take everything that forms complete UTF-8 text
    ///
    /// A character split across output frames stays buffered until the rest arrives.
    pub fn drain(&self) -> String {
        let mut buffer = self.lock();
        let complete = match std::str::from_utf8(&buffer) {
            Ok(_) => buffer.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => buffer.len(),
        };

        let bytes: Vec<u8> = buffer.drain(..complete).collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Take everything, replacing any incomplete trailing character
    pub fn drain_all(&self) -> String {
        let bytes: Vec<u8> = self.lock().drain(..).collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Send buffered output every `interval` until `stop` fires
///
/// Stopping only takes effect between sends. A drained chunk is always
/// delivered before the task ends, so await the handle before the final
/// flush to keep chunks in order.
pub fn spawn_log_flusher(
    job_id: i64,
    buffer: LogBuffer,
    control: Arc<dyn ControlPlane>,
    interval: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let chunk = buffer.drain();
            if chunk.is_empty() {
                continue;
            }

            tracing::debug!(job_id, "Flushing {} bytes of output", chunk.len());
            if let Err(e) = control.append_logs(job_id, &chunk).await {
                tracing::error!(job_id, "Failed to send logs: {:#}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_empties_buffer() {
        let buffer = LogBuffer::new();
        buffer.push(b"hello ");
        buffer.push_line("world");

        assert_eq!(buffer.drain(), "hello world\n");
        assert_eq!(buffer.drain(), "");
    }

    #[test]
    fn test_drain_holds_back_split_character() {
        let buffer = LogBuffer::new();
        let check = "✓".as_bytes();

        buffer.push(b"ok ");
        buffer.push(&check[..1]);
        assert_eq!(buffer.drain(), "ok ");

        buffer.push(&check[1..]);
        assert_eq!(buffer.drain(), "✓");
    }

    #[test]
    fn test_drain_all_flushes_partial_character() {
        let buffer = LogBuffer::new();
        buffer.push(&"✓".as_bytes()[..2]);
        assert_eq!(buffer.drain(), "");
        assert_eq!(buffer.drain_all(), "\u{FFFD}");
    }

    #[tokio::test]
    async fn test_flusher_finishes_inflight_send_when_stopped() {
        use crate::service::execution::tests::FakeControlPlane;

        let control = Arc::new(FakeControlPlane::default());
        *control.append_delay.lock().unwrap() = Duration::from_millis(50);
        let buffer = LogBuffer::new();
        buffer.push_line("first");

        let stop = CancellationToken::new();
        let flusher = spawn_log_flusher(
            7,
            buffer.clone(),
            control.clone(),
            Duration::from_millis(5),
            stop.clone(),
        );

        time::sleep(Duration::from_millis(20)).await;
        stop.cancel();
        flusher.await.unwrap();

        assert_eq!(control.logs.lock().unwrap().as_str(), "first\n");
    }

    #[test]
    fn test_clones_share_storage() {
        let buffer = LogBuffer::new();
        let writer = buffer.clone();
        writer.push_line("from pump");
        assert_eq!(buffer.drain(), "from pump\n");
    }
}
