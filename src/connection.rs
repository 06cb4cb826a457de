//! Connection to the server
//!
//! A [`Connection`] owns one authenticated byte stream and serializes every
//! request/response exchange on it. Statements and result sets created from
//! the connection share its inner state, so closing the connection cascades
//! to everything opened from it.
//!
//! # Example
//!
//! ```rust,ignore
//! use dualsql::{Config, Connection};
//!
//! let stream = tokio::net::TcpStream::connect("db:2881").await?;
//! // ... authenticate on `stream` ...
//! let conn = Connection::from_stream(stream, Config::default());
//!
//! let mut stmt = conn.prepare("SELECT name FROM users WHERE id = ?")?;
//! stmt.bind(1, 42)?;
//! let mut rs = stmt.execute_query().await?;
//! while rs.next().await? {
//!     println!("{:?}", rs.get_string(1)?);
//! }
//! conn.close().await?;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as SyncMutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::constants::{error_code, MarkerType};
use crate::cursor::{Concurrency, ResultSetType};
use crate::error::{Error, Result};
use crate::executor::StatementHandle;
use crate::messages::{Request, Response};
use crate::statement::StatementKind;
use crate::statement_cache::StatementCache;
use crate::transport::{self, PacketReader, PacketWriter};

static CONNECTION_ID_COUNTER: AtomicU32 = AtomicU32::new(1);

pub(crate) fn lock<T>(mutex: &SyncMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Scopes
// =============================================================================

/// Open/closed flag of a resource plus the flags of every resource it lives
/// in. A scope is closed when its own flag or any ancestor's flag is set.
#[derive(Debug, Clone)]
pub(crate) struct Scope {
    flags: Vec<Arc<AtomicBool>>,
}

impl Scope {
    pub(crate) fn root() -> Self {
        Self {
            flags: vec![Arc::new(AtomicBool::new(false))],
        }
    }

    pub(crate) fn child(&self) -> Self {
        let mut flags = Vec::with_capacity(self.flags.len() + 1);
        flags.push(Arc::new(AtomicBool::new(false)));
        flags.extend(self.flags.iter().cloned());
        Self { flags }
    }

    /// Close this scope; returns `false` if it was already closed itself
    pub(crate) fn close(&self) -> bool {
        !self.flags[0].swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.flags.iter().any(|f| f.load(Ordering::SeqCst))
    }

    /// Closed by its own `close`, not by an ancestor
    pub(crate) fn is_closed_itself(&self) -> bool {
        self.flags[0].load(Ordering::SeqCst)
    }

    /// Closed because the root (the connection) is closed
    pub(crate) fn is_root_closed(&self) -> bool {
        self.flags
            .last()
            .map(|f| f.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

// =============================================================================
// Cancellation
// =============================================================================

/// Interrupts the statement currently running on a connection
///
/// The handle is cheap to clone and can be moved to another task. Cancelling
/// when nothing is running, or after the running statement completed, does
/// nothing.
#[derive(Clone)]
pub struct CancelHandle {
    writer: Arc<Mutex<Box<dyn PacketWriter>>>,
    in_flight: Arc<AtomicU64>,
    scope: Scope,
}

impl CancelHandle {
    /// Send an interrupt for the in-flight exchange
    ///
    /// Returns whether an interrupt was actually sent.
    pub async fn cancel(&self) -> Result<bool> {
        if self.scope.is_closed() {
            return Ok(false);
        }
        let target = self.in_flight.load(Ordering::SeqCst);
        if target == 0 {
            tracing::trace!("cancel with nothing in flight");
            return Ok(false);
        }
        let mut writer = self.writer.lock().await;
        if self.in_flight.load(Ordering::SeqCst) != target {
            tracing::trace!(exchange = target, "cancel lost the race with completion");
            return Ok(false);
        }
        tracing::debug!(exchange = target, "sending interrupt");
        writer.send_marker(MarkerType::Interrupt).await?;
        Ok(true)
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .finish()
    }
}

// =============================================================================
// Shared connection state
// =============================================================================

/// How far the last exchange on the channel got
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    /// Request partly written
    Sending,
    /// Request sent, response not fully read
    Receiving,
}

struct Channel {
    reader: Box<dyn PacketReader>,
    seq: u8,
    phase: Phase,
}

impl Channel {
    fn next_seq(&mut self) -> u8 {
        self.seq = self.seq.wrapping_add(1);
        if self.seq == 0 {
            self.seq = 1;
        }
        self.seq
    }

    /// Read packets until the response is complete
    async fn read_response(&mut self) -> Result<Response> {
        let mut response = Response::default();
        while !response.is_complete() {
            let packet = self.reader.receive_packet().await?;
            if packet.is_marker() {
                let kind = packet.marker_type()?;
                tracing::trace!(?kind, "marker from server");
                continue;
            }
            response.absorb(packet.payload)?;
        }
        Ok(response)
    }
}

/// Publishes the running exchange to cancel handles until dropped
struct InFlight<'a>(&'a AtomicU64);

impl<'a> InFlight<'a> {
    fn enter(slot: &'a AtomicU64, exchange_id: u64) -> Self {
        slot.store(exchange_id, Ordering::SeqCst);
        Self(slot)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

/// State shared by a connection and everything opened from it
pub(crate) struct ConnectionInner {
    id: u32,
    config: Config,
    channel: Mutex<Channel>,
    writer: Arc<Mutex<Box<dyn PacketWriter>>>,
    scope: Scope,
    in_flight: Arc<AtomicU64>,
    exchanges: AtomicU64,
    pending_closes: SyncMutex<Vec<u32>>,
    cache: SyncMutex<StatementCache>,
    auto_commit: AtomicBool,
}

impl ConnectionInner {
    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn scope(&self) -> &Scope {
        &self.scope
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.scope.is_closed() {
            Err(Error::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn cache(&self) -> MutexGuard<'_, StatementCache> {
        lock(&self.cache)
    }

    /// Queue server cursors for release before the next exchange
    pub(crate) fn queue_close(&self, cursor_ids: impl IntoIterator<Item = u32>) {
        let mut pending = lock(&self.pending_closes);
        pending.extend(cursor_ids.into_iter().filter(|id| *id != 0));
    }

    fn take_pending_closes(&self) -> Vec<u32> {
        std::mem::take(&mut *lock(&self.pending_closes))
    }

    /// Send `request` and collect the complete response
    ///
    /// Queued cursor closes go out first. Server errors stay in the
    /// response except for an interrupted call, which becomes
    /// [`Error::Cancelled`].
    pub(crate) async fn exchange(&self, request: Request) -> Result<Response> {
        self.ensure_open()?;
        let mut channel = self.channel.lock().await;
        if channel.phase != Phase::Idle {
            self.recover(&mut channel).await?;
        }

        let pending = self.take_pending_closes();
        if !pending.is_empty() {
            tracing::debug!(cursors = ?pending, "releasing server cursors");
            let response = self
                .round_trip(&mut channel, Request::CloseCursors(pending))
                .await?;
            if let Some(err) = response.error {
                tracing::warn!(code = err.code, message = %err.message, "cursor release failed");
            }
        }

        let response = self.round_trip(&mut channel, request).await?;
        match &response.error {
            Some(err) if err.code == error_code::QUERY_INTERRUPTED => Err(Error::Cancelled),
            _ => Ok(response),
        }
    }

    /// [`exchange`](Self::exchange) bounded by a query timeout
    ///
    /// When the timeout elapses an interrupt is sent and the response of the
    /// interrupted call is still drained, so the channel stays in sync.
    pub(crate) async fn exchange_timed(
        &self,
        request: Request,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let Some(limit) = timeout.filter(|t| !t.is_zero()) else {
            return self.exchange(request).await;
        };
        let cancel = self.cancel_handle();
        let exchange = self.exchange(request);
        tokio::pin!(exchange);

        match tokio::time::timeout(limit, exchange.as_mut()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout = ?limit, "query timeout elapsed, interrupting");
                cancel.cancel().await?;
                match exchange.await {
                    Err(Error::Cancelled) => Err(Error::QueryTimeout(limit)),
                    other => other,
                }
            }
        }
    }

    /// Settle an exchange whose caller went away before it finished
    ///
    /// A request cut off mid-write leaves the stream unusable and closes the
    /// connection. A request that was fully sent is interrupted, and its
    /// response is read and discarded.
    async fn recover(&self, channel: &mut Channel) -> Result<()> {
        if channel.phase == Phase::Sending {
            tracing::warn!("request abandoned mid-write, closing connection");
            self.scope.close();
            return Err(Error::ConnectionLost(
                "previous request was abandoned mid-write".to_string(),
            ));
        }
        tracing::warn!("response abandoned by its caller, interrupting and draining");
        let drained = async {
            self.writer
                .lock()
                .await
                .send_marker(MarkerType::Interrupt)
                .await?;
            channel.read_response().await
        }
        .await;
        match drained {
            Ok(response) => {
                if let Some(err) = &response.error {
                    tracing::debug!(code = err.code, "abandoned exchange ended with error");
                }
                channel.phase = Phase::Idle;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "connection unusable after abandoned exchange");
                self.scope.close();
                Err(Error::ConnectionLost(format!(
                    "abandoned exchange could not be drained: {}",
                    e
                )))
            }
        }
    }

    async fn round_trip(&self, channel: &mut Channel, request: Request) -> Result<Response> {
        let seq = channel.next_seq();
        let payload = request.encode(seq)?;
        let exchange_id = self.exchanges.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight::enter(&self.in_flight, exchange_id);

        let result = async {
            let mut writer = self.writer.lock().await;
            channel.phase = Phase::Sending;
            writer.send_data(payload).await?;
            drop(writer);
            channel.phase = Phase::Receiving;
            let response = channel.read_response().await?;
            channel.phase = Phase::Idle;
            Ok::<_, Error>(response)
        }
        .await;

        if let Err(e) = &result {
            if e.is_fatal() || matches!(e, Error::Protocol(_)) {
                tracing::warn!(error = %e, "connection unusable after failed exchange");
                self.scope.close();
            }
        }
        result
    }

    pub(crate) fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            writer: Arc::clone(&self.writer),
            in_flight: Arc::clone(&self.in_flight),
            scope: self.scope.clone(),
        }
    }
}

// =============================================================================
// Connection
// =============================================================================

/// A connection to the server
///
/// All operations are serialized internally; one statement runs at a time.
/// Use [`cancel_handle`](Connection::cancel_handle) to interrupt a running
/// statement from another task.
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Wrap an authenticated stream
    pub fn from_stream<S>(stream: S, config: Config) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = transport::split(stream);
        let id = CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(id, mode = ?config.mode, "connection opened");
        let cache = StatementCache::new(config.stmt_cache_size);
        let inner = ConnectionInner {
            id,
            channel: Mutex::new(Channel {
                reader: Box::new(reader),
                seq: 0,
                phase: Phase::Idle,
            }),
            writer: Arc::new(Mutex::new(Box::new(writer))),
            scope: Scope::root(),
            in_flight: Arc::new(AtomicU64::new(0)),
            exchanges: AtomicU64::new(0),
            pending_closes: SyncMutex::new(Vec::new()),
            cache: SyncMutex::new(cache),
            auto_commit: AtomicBool::new(true),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Connection id, unique within the process
    pub fn id(&self) -> u32 {
        self.inner.id
    }

    /// Configuration the connection was opened with
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Check if the connection is closed
    pub fn is_closed(&self) -> bool {
        self.inner.scope.is_closed()
    }

    /// Handle that interrupts the running statement
    pub fn cancel_handle(&self) -> CancelHandle {
        self.inner.cancel_handle()
    }

    /// Create a plain statement with forward-only, read-only results
    pub fn create_statement(&self) -> Result<StatementHandle> {
        self.create_statement_with(ResultSetType::ForwardOnly, Concurrency::ReadOnly)
    }

    /// Create a plain statement with the given result-set options
    pub fn create_statement_with(
        &self,
        result_type: ResultSetType,
        concurrency: Concurrency,
    ) -> Result<StatementHandle> {
        self.inner.ensure_open()?;
        Ok(StatementHandle::new(
            Arc::clone(&self.inner),
            StatementKind::Simple,
            None,
            result_type,
            concurrency,
        ))
    }

    /// Prepare a statement with `?` (or `:name`) placeholders
    pub fn prepare(&self, sql: &str) -> Result<StatementHandle> {
        self.prepare_with(sql, ResultSetType::ForwardOnly, Concurrency::ReadOnly)
    }

    /// Prepare a statement with the given result-set options
    pub fn prepare_with(
        &self,
        sql: &str,
        result_type: ResultSetType,
        concurrency: Concurrency,
    ) -> Result<StatementHandle> {
        self.inner.ensure_open()?;
        Ok(StatementHandle::new(
            Arc::clone(&self.inner),
            StatementKind::Prepared,
            Some(sql),
            result_type,
            concurrency,
        ))
    }

    /// Prepare a procedure or function call (`{call p(?)}`, `{? = call f(?)}`,
    /// `call p(?)`, `begin p(?); end;`)
    pub fn prepare_call(&self, sql: &str) -> Result<StatementHandle> {
        self.inner.ensure_open()?;
        Ok(StatementHandle::new(
            Arc::clone(&self.inner),
            StatementKind::Callable,
            Some(sql),
            ResultSetType::ForwardOnly,
            Concurrency::ReadOnly,
        ))
    }

    /// Current autocommit mode
    pub fn auto_commit(&self) -> bool {
        self.inner.auto_commit.load(Ordering::SeqCst)
    }

    /// Switch autocommit on or off
    pub async fn set_auto_commit(&self, on: bool) -> Result<()> {
        if self.auto_commit() == on {
            return Ok(());
        }
        self.inner
            .exchange(Request::SetAutoCommit(on))
            .await?
            .into_result()?;
        self.inner.auto_commit.store(on, Ordering::SeqCst);
        tracing::debug!(id = self.id(), auto_commit = on, "autocommit changed");
        Ok(())
    }

    /// Commit the current transaction
    pub async fn commit(&self) -> Result<()> {
        self.inner.exchange(Request::Commit).await?.into_result()?;
        Ok(())
    }

    /// Roll back the current transaction
    pub async fn rollback(&self) -> Result<()> {
        self.inner.exchange(Request::Rollback).await?.into_result()?;
        Ok(())
    }

    /// Round trip with no side effects
    pub async fn ping(&self) -> Result<()> {
        self.inner.exchange(Request::Ping).await?.into_result()?;
        Ok(())
    }

    /// Close the connection and every statement and result set opened on it
    ///
    /// Cached and queued server cursors are released on a best-effort basis.
    /// Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.inner.scope.is_closed() {
            return Ok(());
        }
        let mut cursors = self.inner.cache().clear();
        cursors.extend(self.inner.take_pending_closes());

        if !cursors.is_empty() {
            let mut channel = self.inner.channel.lock().await;
            if let Err(e) = self
                .inner
                .round_trip(&mut channel, Request::CloseCursors(cursors))
                .await
            {
                tracing::debug!(error = %e, "cursor release on close failed");
            }
        }

        self.inner.scope.close();
        tracing::debug!(id = self.id(), "connection closed");
        let mut writer = self.inner.writer.lock().await;
        writer.close().await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // async cleanup is not possible here; mark closed so that statements
        // still holding the shared state fail fast
        self.inner.scope.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("mode", &self.inner.config.mode)
            .field("closed", &self.is_closed())
            .finish()
    }
}
