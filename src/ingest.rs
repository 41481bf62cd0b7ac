//! Feed ingestion.
//!
//! Each feed is one long-lived websocket. Frames are decoded at this
//! boundary and forwarded as [`Inbound`] records; anything unrecognized is
//! dropped. A transport error, a server close, or a frame that fails to
//! decode ends the session, and the feed reconnects after a fixed delay,
//! forever, until cancelled.
//!
//! This is the only module that holds sockets.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::errors::QuakewatchError;
use crate::models::{EewAlert, SeismicReport, decode_eew_frame, decode_report_frame};

/// Which of the two feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    /// Finalized earthquake reports
    Report,
    /// Early-warning alerts
    Eew,
}

impl FeedKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::Eew => "eew",
        }
    }

    /// Decode a text frame for this feed.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed.
    pub fn decode(self, text: &str) -> Result<Option<Inbound>, QuakewatchError> {
        Ok(match self {
            Self::Report => decode_report_frame(text)?.map(Inbound::Report),
            Self::Eew => decode_eew_frame(text)?.map(Inbound::Alert),
        })
    }
}

/// Connectivity of one feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    #[default]
    Disconnected,
}

/// A normalized record handed to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Report(SeismicReport),
    Alert(EewAlert),
    Status {
        feed: FeedKind,
        status: ConnectionStatus,
    },
}

/// Text frames from one open connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, QuakewatchError>> + Send>>;

/// Opens connections to a feed endpoint.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str)
    -> impl Future<Output = Result<FrameStream, QuakewatchError>> + Send;
}

/// Websocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<FrameStream, QuakewatchError> {
        let (ws, response) = connect_async(url).await?;
        debug!(status = %response.status(), "websocket handshake complete");

        // Pings are answered by tungstenite on the next read.
        let frames = ws.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "server sent close frame");
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(QuakewatchError::from(e))),
            }
        });
        Ok(Box::pin(frames))
    }
}

/// How a session ended.
enum SessionEnd {
    /// Shutdown requested or downstream gone
    Stop,
    /// Connection lost; try again
    Retry(QuakewatchError),
}

/// Keep one feed connected until `cancel` fires.
pub async fn run_feed<C: Connector>(
    connector: C,
    kind: FeedKind,
    url: String,
    reconnect_delay: Duration,
    tx: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
) {
    let feed = kind.as_str();
    let mut attempts = 0u64;

    loop {
        attempts += 1;
        let end = tokio::select! {
            biased;
            () = cancel.cancelled() => SessionEnd::Stop,
            end = session(&connector, kind, &url, &tx, &cancel) => end,
        };

        match end {
            SessionEnd::Stop => break,
            SessionEnd::Retry(e) => {
                warn!(feed, attempts, "feed disconnected: {e}; reconnecting in {}s", reconnect_delay.as_secs());
            }
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(reconnect_delay) => {}
        }
    }

    info!(feed, "feed stopped");
}

/// One connection's lifetime.
async fn session<C: Connector>(
    connector: &C,
    kind: FeedKind,
    url: &str,
    tx: &mpsc::Sender<Inbound>,
    cancel: &CancellationToken,
) -> SessionEnd {
    let mut frames = match connector.connect(url).await {
        Ok(frames) => frames,
        Err(e) => return SessionEnd::Retry(e),
    };

    info!(feed = kind.as_str(), url, "feed connected");
    if !send_status(tx, kind, ConnectionStatus::Connected).await {
        return SessionEnd::Stop;
    }

    let reason = loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => return SessionEnd::Stop,
            frame = frames.next() => frame,
        };

        let text = match frame {
            Some(Ok(text)) => text,
            Some(Err(e)) => break e,
            None => break QuakewatchError::Closed,
        };

        match kind.decode(&text) {
            Ok(Some(record)) => {
                if tx.send(record).await.is_err() {
                    return SessionEnd::Stop;
                }
            }
            Ok(None) => {}
            // A stream that keeps sending garbage is treated as broken
            Err(e) => break e,
        }
    };

    drop(frames);
    if !send_status(tx, kind, ConnectionStatus::Disconnected).await {
        return SessionEnd::Stop;
    }
    SessionEnd::Retry(reason)
}

async fn send_status(tx: &mpsc::Sender<Inbound>, feed: FeedKind, status: ConnectionStatus) -> bool {
    tx.send(Inbound::Status { feed, status }).await.is_ok()
}

/// Spawn both websocket feeds.
pub fn spawn_feeds(
    config: &FeedConfig,
    tx: &mpsc::Sender<Inbound>,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    [
        (FeedKind::Report, config.report_url.clone()),
        (FeedKind::Eew, config.eew_url.clone()),
    ]
    .into_iter()
    .map(|(kind, url)| {
        tokio::spawn(run_feed(
            WsConnector,
            kind,
            url,
            config.reconnect_delay,
            tx.clone(),
            cancel.child_token(),
        ))
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    const REPORT: &str = r#"{"code":551,"id":"r1","earthquake":{"time":"2024/01/01 16:10:00",
        "hypocenter":{"name":"石川県能登地方","latitude":37.5,"longitude":137.2,"depth":10,"magnitude":7.6},
        "maxScale":70,"domesticTsunami":"Warning"},"points":[]}"#;

    const EEW: &str = r#"{"type":"jma_eew","Title":"緊急地震速報（予報）","EventID":"E1",
        "Hypocenter":"石川県能登地方","Magunitude":5.9,"Depth":10,"MaxIntensity":"4",
        "isWarn":false,"isFinal":false,"isCancel":false}"#;

    /// Serves one scripted list of frames per connection, then refuses.
    #[derive(Clone, Default)]
    struct ScriptedConnector {
        scripts: Arc<Mutex<VecDeque<Vec<&'static str>>>>,
        attempts: Arc<AtomicUsize>,
    }

    impl ScriptedConnector {
        fn new(scripts: Vec<Vec<&'static str>>) -> Self {
            Self {
                scripts: Arc::new(Mutex::new(scripts.into())),
                attempts: Arc::default(),
            }
        }
    }

    impl Connector for ScriptedConnector {
        async fn connect(&self, _url: &str) -> Result<FrameStream, QuakewatchError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let script = self.scripts.lock().unwrap().pop_front();
            match script {
                Some(frames) => Ok(futures_util::stream::iter(
                    frames.into_iter().map(|f| Ok(f.to_string())),
                )
                .boxed()),
                None => Err(QuakewatchError::Closed),
            }
        }
    }

    #[test]
    fn test_decode_routes_by_feed() {
        assert!(matches!(FeedKind::Report.decode(REPORT), Ok(Some(Inbound::Report(_)))));
        assert!(matches!(FeedKind::Eew.decode(EEW), Ok(Some(Inbound::Alert(_)))));
        // Each feed only understands its own frames
        assert!(matches!(FeedKind::Report.decode(EEW), Ok(None)));
        assert!(matches!(FeedKind::Eew.decode(REPORT), Ok(None)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_forces_reconnect() {
        let connector = ScriptedConnector::new(vec![
            vec![REPORT, r#"{"code":554}"#, "{not json", REPORT],
            vec![EEW],
        ]);
        let attempts = Arc::clone(&connector.attempts);
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_feed(
            connector,
            FeedKind::Report,
            "ws://test".into(),
            Duration::from_secs(5),
            tx,
            cancel.clone(),
        ));

        let connected = Inbound::Status {
            feed: FeedKind::Report,
            status: ConnectionStatus::Connected,
        };
        let disconnected = Inbound::Status {
            feed: FeedKind::Report,
            status: ConnectionStatus::Disconnected,
        };

        assert_eq!(rx.recv().await.unwrap(), connected);
        assert!(matches!(rx.recv().await.unwrap(), Inbound::Report(r) if r.id == "r1"));
        // Code 554 dropped, then the bad frame ends the session before the second report
        assert_eq!(rx.recv().await.unwrap(), disconnected);
        assert_eq!(rx.recv().await.unwrap(), connected);
        // The report feed ignores EEW frames; the stream then ends
        assert_eq!(rx.recv().await.unwrap(), disconnected);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_on_fixed_delay_forever() {
        let connector = ScriptedConnector::new(Vec::new());
        let attempts = Arc::clone(&connector.attempts);
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_feed(
            connector,
            FeedKind::Eew,
            "ws://test".into(),
            Duration::from_secs(5),
            tx,
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        tokio::time::sleep(Duration::from_secs(50)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 13);

        cancel.cancel();
        task.await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 13);
    }
}
