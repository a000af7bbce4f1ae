//! Component identity, health endpoints and lifecycle
//!
//! Every nyft process is a [`Component`]: it owns a unique identity, one transport
//! handle, a metrics registry and a logging span. Handlers are declared in a
//! [`DispatchTable`] and served as independent tasks, one per inbound message.
//!
//! Shutdown has two paths:
//! - [`Component::graceful_shutdown`]: unsubscribe, handle every message already
//!   delivered, let in-flight handlers and tracked tasks finish and publish, then
//!   drain the transport (SIGTERM)
//! - [`Component::immediate_exit`]: close without draining and exit (SIGINT, or
//!   the transport closing for good)

mod health;
pub mod signals;
pub mod status;

pub use signals::{shutdown_signal, Signal};
pub use status::{heap_bytes, CountingAllocator};

use std::sync::atomic::{AtomicBool, Ordering};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use nyft_common::{ComponentIdentity, StatusSnapshot};
use prometheus::Registry;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::config::ComponentConfig;
use crate::handler::{self, DispatchTable, Reply, Route};
use crate::lifecycle::ConnectionState;
use crate::metrics::HealthMetrics;
use crate::transport::{Message, Subscription, Transport};
use crate::{logging, NyftError, Result};

struct Inner {
    identity: ComponentIdentity,
    transport: Option<Arc<dyn Transport>>,
}

pub struct Component {
    inner: Mutex<Inner>,
    config: ComponentConfig,
    tracker: TaskTracker,
    stop: CancellationToken,
    abort: CancellationToken,
    shutting_down: AtomicBool,
    registry: Registry,
    health: HealthMetrics,
    span: Span,
}

impl Component {
    /// Create a component of `kind` with a fresh identity
    pub fn new(kind: impl Into<String>) -> Result<Arc<Self>> {
        Self::with_config(
            ComponentIdentity::generate(kind),
            ComponentConfig::default(),
        )
    }

    pub fn with_config(identity: ComponentIdentity, config: ComponentConfig) -> Result<Arc<Self>> {
        let registry = Registry::new();
        let health = HealthMetrics::register(&registry)?;
        let span = logging::component_span(&identity);

        Ok(Arc::new(Self {
            inner: Mutex::new(Inner {
                identity,
                transport: None,
            }),
            config,
            tracker: TaskTracker::new(),
            stop: CancellationToken::new(),
            abort: CancellationToken::new(),
            shutting_down: AtomicBool::new(false),
            registry,
            health,
            span,
        }))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn identity(&self) -> ComponentIdentity {
        self.lock().identity.clone()
    }

    pub fn id(&self) -> String {
        self.lock().identity.id.clone()
    }

    pub fn kind(&self) -> String {
        self.lock().identity.kind.clone()
    }

    /// Connection label, `<kind>:<id>`
    pub fn name(&self) -> String {
        self.lock().identity.name()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Span carrying pid, kind and id; every handler task runs inside it
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Token cancelled when the component starts shutting down. Tasks started
    /// with [`Component::spawn`] should stop taking new work on it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Run `task` on the component's tracker, inside its span. Graceful
    /// shutdown waits for it before draining the transport.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task.instrument(self.span.clone()));
    }

    pub fn attach(&self, transport: Arc<dyn Transport>) {
        self.lock().transport = Some(transport);
    }

    pub fn transport(&self) -> Result<Arc<dyn Transport>> {
        self.lock().transport.clone().ok_or(NyftError::NotConnected)
    }

    pub fn state(&self) -> ConnectionState {
        match self.transport() {
            Ok(transport) => transport.lifecycle().state(),
            Err(_) => ConnectionState::Disconnected,
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        status::snapshot(&self.lock().identity)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Make the component discoverable and answer status queries
    pub async fn register(self: &Arc<Self>) -> Result<()> {
        self.serve(health::routes(self)).await
    }

    /// Subscribe every route in `table` and handle its messages until shutdown
    pub async fn serve(self: &Arc<Self>, table: DispatchTable) -> Result<()> {
        let transport = self.transport()?;

        for route in table.into_routes() {
            let subscription = match &route.queue_group {
                Some(group) => transport.queue_subscribe(&route.subject, group).await?,
                None => transport.subscribe(&route.subject).await?,
            };

            self.span.in_scope(|| {
                info!(
                    subject = %route.subject,
                    group = route.queue_group.as_deref().unwrap_or("-"),
                    input = route.contract.input,
                    output = route.contract.output,
                    "Serving route"
                )
            });

            let component = Arc::clone(self);
            self.tracker.spawn(
                component
                    .route_loop(route, subscription)
                    .instrument(self.span.clone()),
            );
        }

        Ok(())
    }

    /// Runs until the subscription ends. On graceful shutdown the transport
    /// unsubscribes and the stream ends after its buffered messages, so nothing
    /// already delivered is dropped.
    async fn route_loop(self: Arc<Self>, route: Route, mut subscription: Subscription) {
        loop {
            tokio::select! {
                biased;
                _ = self.abort.cancelled() => break,
                next = subscription.next() => match next {
                    Some(msg) => {
                        let component = Arc::clone(&self);
                        let route = route.clone();
                        self.tracker.spawn(
                            async move { component.handle_one(&route, msg).await }
                                .instrument(self.span.clone()),
                        );
                    }
                    None => {
                        debug!(subject = %route.subject, "Subscription ended");
                        break;
                    }
                },
            }
        }
    }

    async fn handle_one(&self, route: &Route, msg: Message) {
        let reply_to = msg.reply.clone();
        let reply = handler::invoke(route, msg).await;

        match (reply, reply_to) {
            (Reply::Send(payload), Some(reply_to)) => match self.transport() {
                Ok(transport) => {
                    if let Err(e) = transport.publish(&reply_to, payload).await {
                        warn!(subject = %route.subject, error = %e, "Failed to publish reply");
                    }
                }
                Err(e) => warn!(subject = %route.subject, error = %e, "Cannot publish reply"),
            },
            (Reply::Send(_), None) => {
                debug!(subject = %route.subject, "No reply inbox, dropping reply");
            }
            (Reply::Silent, _) => {}
        }
    }

    /// Drain: unsubscribe, handle what was already delivered, wait for handlers
    /// and tracked tasks (bounded by the drain timeout), flush and disconnect
    pub async fn graceful_shutdown(&self) -> Result<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.drain().instrument(self.span.clone()).await
    }

    async fn drain(&self) -> Result<()> {
        info!("Shutting down...");

        let transport = self.transport()?;
        if let Err(e) = transport.lifecycle().transition(ConnectionState::Draining) {
            warn!(error = %e, "Cannot enter draining state");
        }

        if let Err(e) = transport.stop_inbound().await {
            warn!(error = %e, "Failed to stop inbound delivery");
        }
        self.stop.cancel();
        self.tracker.close();
        if tokio::time::timeout(self.config.drain_timeout, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                pending = self.tracker.len(),
                "Drain timeout elapsed with handlers still running"
            );
        }

        transport.drain().await?;
        info!("Shutdown complete");
        Ok(())
    }

    /// Close the transport without draining
    pub async fn close(&self) -> Result<()> {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.stop.cancel();
        self.abort.cancel();
        self.tracker.close();
        self.transport()?.close().await
    }

    /// Close without draining, then terminate the process. Never returns.
    pub async fn immediate_exit(&self) -> Result<()> {
        self.span.in_scope(|| info!("Exiting..."));
        if let Err(e) = self.close().await {
            self.span.in_scope(|| warn!(error = %e, "Error while closing"));
        }
        std::process::exit(1)
    }

    /// Resolves when the transport reaches `Closed`, for whatever reason
    pub async fn transport_closed(&self) {
        match self.transport() {
            Ok(transport) => transport.lifecycle().closed().await,
            Err(_) => std::future::pending().await,
        }
    }

    /// Block until a termination signal or a fatal transport close, then run the
    /// matching shutdown path
    pub async fn run_until_shutdown(&self) -> Result<()> {
        tokio::select! {
            signal = shutdown_signal() => {
                let signal = signal?;
                self.span.in_scope(|| info!(%signal, "Trapped signal"));
                match signal {
                    Signal::Interrupt => self.immediate_exit().await,
                    Signal::Terminate => self.graceful_shutdown().await,
                }
            }
            _ = self.transport_closed() => {
                if self.is_shutting_down() {
                    return Ok(());
                }
                self.span.in_scope(|| error!("Connection closed for good"));
                self.immediate_exit().await
            }
        }
    }
}
