//! Chain access: the [`ChainClient`] the watcher consumes, the raw
//! `eth_getLogs` shape client implementors decode from, and the fixed-delay
//! retry wrapped around every node round-trip.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use chainwatch_core::error::WatcherError;
use chainwatch_core::types::{Log, LogFilter};

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    #[serde(rename = "data")]
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockHash")]
    pub block_hash: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(rename = "removed")]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Decode the hex fields into a [`Log`].
    ///
    /// The node's own `removed` flag is ignored: only the reorg classifier
    /// marks logs removed.
    pub fn into_log(self) -> Result<Log, WatcherError> {
        let block_number = parse_hex_u64(&self.block_number).ok_or_else(|| {
            WatcherError::Rpc(format!("bad blockNumber in log: {}", self.block_number))
        })?;
        let log_index = parse_hex_u64(&self.log_index)
            .and_then(|i| u32::try_from(i).ok())
            .ok_or_else(|| WatcherError::Rpc(format!("bad logIndex in log: {}", self.log_index)))?;
        Ok(Log {
            block_number,
            block_hash: self.block_hash,
            tx_hash: self.tx_hash,
            address: self.address,
            topics: self.topics,
            data: self.data,
            log_index,
            removed: false,
        })
    }
}

/// Node access the watcher depends on.
///
/// Implementations must tolerate concurrent `header_hash` calls.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current chain height.
    async fn current_height(&self) -> Result<u64, WatcherError>;

    /// All logs in `[from, to]` matching `filter`.
    async fn filter_logs(
        &self,
        from: u64,
        to: u64,
        filter: &LogFilter,
    ) -> Result<Vec<Log>, WatcherError>;

    /// Hash of the canonical block at `number`.
    async fn header_hash(&self, number: u64) -> Result<String, WatcherError>;
}

#[async_trait]
impl<C: ChainClient + ?Sized> ChainClient for Arc<C> {
    async fn current_height(&self) -> Result<u64, WatcherError> {
        (**self).current_height().await
    }

    async fn filter_logs(
        &self,
        from: u64,
        to: u64,
        filter: &LogFilter,
    ) -> Result<Vec<Log>, WatcherError> {
        (**self).filter_logs(from, to, filter).await
    }

    async fn header_hash(&self, number: u64) -> Result<String, WatcherError> {
        (**self).header_hash(number).await
    }
}

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Run `op` until it succeeds, fails with a fatal error, or the attempts
    /// are used up (→ [`WatcherError::FetchExhausted`]).
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, WatcherError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, WatcherError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= self.attempts => {
                    tracing::error!(what, attempt, error = %e, "Fetch retries exhausted");
                    return Err(WatcherError::FetchExhausted {
                        attempts: attempt,
                        last: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!(what, attempt, error = %e, "Transient fetch error, retrying");
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

/// Parse a hex-encoded string (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn raw(block_number: &str, log_index: &str) -> RawLog {
        RawLog {
            address: "0xpool".into(),
            topics: vec!["0xtopic".into()],
            data: "0x".into(),
            block_number: block_number.into(),
            block_hash: "0xhash".into(),
            tx_hash: "0xtx".into(),
            log_index: log_index.into(),
            removed: Some(true),
        }
    }

    #[test]
    fn parse_hex_u64_basic() {
        assert_eq!(parse_hex_u64("0x1"), Some(1));
        assert_eq!(parse_hex_u64("0xff"), Some(255));
        assert_eq!(parse_hex_u64("1234"), Some(0x1234));
        assert_eq!(parse_hex_u64("0xzz"), None);
    }

    #[test]
    fn raw_log_decodes_and_clears_removed() {
        let log = raw("0x12a05f200", "0x5").into_log().unwrap();
        assert_eq!(log.block_number, 5_000_000_000);
        assert_eq!(log.log_index, 5);
        assert!(!log.removed);
    }

    #[test]
    fn raw_log_deserializes_from_rpc_json() {
        let json = r#"{"address":"0xa","topics":["0xt"],"data":"0x00","blockNumber":"0x64",
            "blockHash":"0xb","transactionHash":"0xc","logIndex":"0x0"}"#;
        let log = serde_json::from_str::<RawLog>(json).unwrap().into_log().unwrap();
        assert_eq!(log.block_number, 100);
        assert_eq!(log.block_hash, "0xb");
    }

    #[test]
    fn raw_log_rejects_bad_hex() {
        assert!(raw("0xnope", "0x0").into_log().is_err());
        assert!(raw("0x1", "0x1ffffffff").into_log().is_err());
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_errors() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let v = policy
            .run("height", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(WatcherError::Rpc("timeout".into()))
                } else {
                    Ok(42u64)
                }
            })
            .await
            .unwrap();
        assert_eq!(v, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_exhausts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let err = policy
            .run("height", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<u64, _>(WatcherError::Rpc("refused".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WatcherError::FetchExhausted { attempts: 2, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_does_not_repeat_fatal_errors() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let err = policy
            .run("poll", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(WatcherError::InconsistentBlockHash {
                    block_number: 1,
                    first: "0xa".into(),
                    second: "0xb".into(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WatcherError::InconsistentBlockHash { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
