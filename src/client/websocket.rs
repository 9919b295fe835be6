//! WebSocket client for the GDAX real-time feed.
//!
//! This module provides the [`FeedClient`] for streaming the `full` channel
//! (every order book change, sequenced per product) and [`ReconnectingFeed`],
//! which reconnects with backoff and replays subscriptions. A reconnect
//! always loses messages; the sync engine sees the jump in sequence numbers
//! as a gap and resyncs the affected books.
//!
//! # Example
//!
//! ```rust,no_run
//! use futures_util::StreamExt;
//! use gdax_book::{Config, GdaxClient};
//!
//! # async fn example() -> gdax_book::Result<()> {
//! let client = GdaxClient::new(Config::new())?;
//!
//! let mut feed = client.connect_feed().await?;
//! feed.subscribe(&["BTC-USD", "ETH-USD"]).await?;
//!
//! let mut diffs = Box::pin(feed.into_diffs());
//! while let Some(diff) = diffs.next().await {
//!     let diff = diff?;
//!     println!("{} #{} {}", diff.product_id, diff.sequence, diff.kind);
//! }
//! # Ok(())
//! # }
//! ```

use futures_util::stream::{self, SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::{Config, RetryPolicy};
use crate::error::Error;
use crate::types::messages::{FeedCommand, FeedMessage, FULL_CHANNEL, HEARTBEAT_CHANNEL};
use crate::types::RawDiff;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket client for the order book feed
///
/// # Thread Safety
///
/// This client is NOT thread-safe. For concurrent access from multiple tasks,
/// use channels or wrap in a mutex. [`into_diffs`](Self::into_diffs) turns it
/// into a stream that can be handed to
/// [`SyncCoordinator::run`](crate::orderbook::SyncCoordinator::run).
#[derive(Debug)]
pub struct FeedClient {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    /// Products subscribed on this connection
    product_ids: Vec<String>,
}

impl FeedClient {
    /// Connect to the feed
    ///
    /// # Errors
    ///
    /// Returns an error if the WebSocket handshake fails.
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        let url = config.websocket_url();
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();
        info!(url, "connected to feed");

        Ok(Self {
            write,
            read,
            product_ids: Vec::new(),
        })
    }

    /// Send a command to the feed
    async fn send_command(&mut self, cmd: &FeedCommand) -> Result<(), Error> {
        let json = serde_json::to_string(cmd)?;
        self.write.send(Message::Text(json)).await?;
        Ok(())
    }

    /// Products subscribed on this connection
    pub fn product_ids(&self) -> &[String] {
        &self.product_ids
    }

    /// Subscribe to the full and heartbeat channels for the given products
    pub async fn subscribe(&mut self, product_ids: &[&str]) -> Result<(), Error> {
        let ids: Vec<String> = product_ids.iter().map(|s| s.to_string()).collect();
        self.send_command(&FeedCommand::subscribe_full(&ids)).await?;

        for id in ids {
            if !self.product_ids.contains(&id) {
                self.product_ids.push(id);
            }
        }
        Ok(())
    }

    /// Unsubscribe the given products from the full and heartbeat channels
    pub async fn unsubscribe(&mut self, product_ids: &[&str]) -> Result<(), Error> {
        let cmd = FeedCommand::Unsubscribe {
            product_ids: product_ids.iter().map(|s| s.to_string()).collect(),
            channels: vec![FULL_CHANNEL.to_string(), HEARTBEAT_CHANNEL.to_string()],
        };
        self.send_command(&cmd).await?;
        self.product_ids
            .retain(|id| !product_ids.contains(&id.as_str()));
        Ok(())
    }

    /// Receive the next message from the feed
    ///
    /// Pings are answered automatically.
    ///
    /// # Returns
    ///
    /// The next message, or `None` if the connection is closed.
    pub async fn next(&mut self) -> Option<Result<FeedMessage, Error>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => return Some(FeedMessage::parse(&text)),
                Ok(Message::Ping(data)) => {
                    // Respond to pings automatically
                    if let Err(e) = self.write.send(Message::Pong(data)).await {
                        return Some(Err(e.into()));
                    }
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "feed sent close frame");
                    return Some(Err(Error::ConnectionClosed));
                }
                Ok(_) => {
                    // Ignore other message types (Binary, Pong, Frame)
                    continue;
                }
                Err(e) => {
                    return Some(Err(e.into()));
                }
            }
        }
    }

    /// Receive the next order book diff, skipping other messages
    pub async fn next_diff(&mut self) -> Option<Result<RawDiff, Error>> {
        loop {
            if let Some(item) = diff_of(self.next().await?) {
                return Some(item);
            }
        }
    }

    /// Turn the connection into a stream of order book diffs
    ///
    /// The stream ends when the connection closes.
    pub fn into_diffs(self) -> impl Stream<Item = Result<RawDiff, Error>> + Send {
        stream::unfold(self, |mut client| async move {
            let item = client.next_diff().await?;
            Some((item, client))
        })
    }

    /// Close the WebSocket connection
    pub async fn close(&mut self) -> Result<(), Error> {
        self.write.close().await?;
        Ok(())
    }
}

/// Keep diffs and feed errors, drop everything else
fn diff_of(message: Result<FeedMessage, Error>) -> Option<Result<RawDiff, Error>> {
    match message {
        Ok(FeedMessage::Diff(diff)) => Some(Ok(diff)),
        Ok(FeedMessage::Error(e)) => {
            let detail = match e.reason {
                Some(reason) => format!("{} ({})", e.message, reason),
                None => e.message,
            };
            Some(Err(Error::Feed(detail)))
        }
        Ok(_) => None,
        Err(e) => Some(Err(e)),
    }
}

/// Feed client with automatic reconnection support.
///
/// This wrapper around [`FeedClient`] provides:
/// - Automatic reconnection with exponential backoff
/// - Subscription replay after reconnection
///
/// # Example
///
/// ```rust,no_run
/// use gdax_book::Config;
/// use gdax_book::client::websocket::ReconnectingFeed;
///
/// # async fn example() -> gdax_book::Result<()> {
/// let mut feed = ReconnectingFeed::connect(Config::new()).await?;
///
/// // Replayed automatically on reconnection
/// feed.subscribe(&["BTC-USD"]).await?;
///
/// while let Some(msg) = feed.next().await {
///     match msg {
///         Ok(msg) => println!("{:?}", msg),
///         Err(e) => eprintln!("Error: {}", e),
///     }
/// }
/// // Reconnect attempts exhausted
/// # Ok(())
/// # }
/// ```
pub struct ReconnectingFeed {
    /// The underlying feed client
    client: Option<FeedClient>,
    /// Configuration for the connection
    config: Config,
    /// Backoff between reconnection attempts
    retry: RetryPolicy,
    /// Products to resubscribe after reconnection
    product_ids: Vec<String>,
    /// Current reconnection attempt
    reconnect_attempt: u32,
}

impl std::fmt::Debug for ReconnectingFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectingFeed")
            .field("connected", &self.client.is_some())
            .field("reconnect_attempt", &self.reconnect_attempt)
            .field("product_ids", &self.product_ids)
            .finish()
    }
}

impl ReconnectingFeed {
    /// Connect to the feed with reconnection support
    ///
    /// Uses the config's [`RetryPolicy`] between attempts.
    pub async fn connect(config: Config) -> Result<Self, Error> {
        let client = FeedClient::connect(&config).await?;
        let retry = config.retry_policy().clone();

        Ok(Self {
            client: Some(client),
            config,
            retry,
            product_ids: Vec::new(),
            reconnect_attempt: 0,
        })
    }

    /// Check if currently connected
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Get the current reconnection attempt number
    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt
    }

    /// Products that will be resubscribed after a reconnect
    pub fn product_ids(&self) -> &[String] {
        &self.product_ids
    }

    /// Subscribe to products
    ///
    /// The subscription will be automatically replayed if the connection is lost.
    pub async fn subscribe(&mut self, product_ids: &[&str]) -> Result<(), Error> {
        for id in product_ids {
            if !self.product_ids.iter().any(|p| p == id) {
                self.product_ids.push(id.to_string());
            }
        }

        if let Some(ref mut client) = self.client {
            client.subscribe(product_ids).await
        } else {
            Err(Error::ConnectionClosed)
        }
    }

    /// Receive the next message, reconnecting if necessary
    ///
    /// Returns `None` once the retry policy gives up.
    pub async fn next(&mut self) -> Option<Result<FeedMessage, Error>> {
        loop {
            if let Some(ref mut client) = self.client {
                match client.next().await {
                    Some(Ok(msg)) => {
                        self.reconnect_attempt = 0; // Reset on successful message
                        return Some(Ok(msg));
                    }
                    Some(Err(Error::ConnectionClosed)) | None => {
                        warn!("feed connection lost");
                        self.client = None;
                    }
                    Some(Err(e @ Error::WebSocket(_))) => {
                        warn!(error = %e, "feed transport error");
                        self.client = None;
                        return Some(Err(e));
                    }
                    Some(Err(e)) => {
                        return Some(Err(e));
                    }
                }
            } else if !self.attempt_reconnect().await {
                return None;
            }
        }
    }

    /// Receive the next order book diff, skipping other messages
    pub async fn next_diff(&mut self) -> Option<Result<RawDiff, Error>> {
        loop {
            if let Some(item) = diff_of(self.next().await?) {
                return Some(item);
            }
        }
    }

    /// Turn the feed into a stream of order book diffs that survives
    /// disconnects
    pub fn into_diffs(self) -> impl Stream<Item = Result<RawDiff, Error>> + Send {
        stream::unfold(self, |mut feed| async move {
            let item = feed.next_diff().await?;
            Some((item, feed))
        })
    }

    /// Attempt to reconnect with exponential backoff
    ///
    /// Returns `false` when the retry policy is exhausted.
    async fn attempt_reconnect(&mut self) -> bool {
        loop {
            if !self.retry.allows(self.reconnect_attempt) {
                warn!(attempts = self.reconnect_attempt, "giving up on feed reconnection");
                return false;
            }

            // Calculate and wait for backoff delay
            let delay = self.retry.jittered_delay(self.reconnect_attempt);
            tokio::time::sleep(delay).await;

            self.reconnect_attempt += 1;

            match FeedClient::connect(&self.config).await {
                Ok(mut client) => {
                    let ids: Vec<&str> = self.product_ids.iter().map(String::as_str).collect();
                    if !ids.is_empty() {
                        if let Err(e) = client.subscribe(&ids).await {
                            warn!(error = %e, "failed to replay subscriptions");
                            continue;
                        }
                    }

                    info!(attempt = self.reconnect_attempt, "feed reconnected");
                    self.client = Some(client);
                    return true;
                }
                Err(e) => {
                    warn!(attempt = self.reconnect_attempt, error = %e, "feed reconnect failed");
                    continue;
                }
            }
        }
    }
}
