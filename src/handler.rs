//! Dispatch table
//!
//! Every subscription a component makes is declared as a [`Route`]: the subject,
//! an optional queue group, the payload contract and a handler deadline. The
//! component turns the table into subscriptions (see
//! [`Component::serve`](crate::component::Component::serve)) and publishes each
//! handler's [`Reply`] at most once.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::transport::Message;

/// What a handler wants sent back to the requester
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Send(Bytes),
    Silent,
}

impl Reply {
    pub fn send(payload: impl Into<Bytes>) -> Self {
        Reply::Send(payload.into())
    }
}

#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, msg: Message) -> Reply;

    /// Reply used when the route deadline elapses before `handle` returns
    fn fallback(&self, _msg: &Message) -> Reply {
        Reply::Silent
    }
}

/// Declared input/output of a route, for logs and auditing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contract {
    pub input: &'static str,
    pub output: &'static str,
    /// Upper bound on one handler invocation
    pub deadline: Option<Duration>,
}

#[derive(Clone)]
pub struct Route {
    pub subject: String,
    pub queue_group: Option<String>,
    pub contract: Contract,
    pub handler: Arc<dyn Handler>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("subject", &self.subject)
            .field("queue_group", &self.queue_group)
            .field("contract", &self.contract)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    routes: Vec<Route>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route with a plain (fan-out) subscription
    pub fn route(
        mut self,
        subject: impl Into<String>,
        contract: Contract,
        handler: impl Handler,
    ) -> Self {
        self.routes.push(Route {
            subject: subject.into(),
            queue_group: None,
            contract,
            handler: Arc::new(handler),
        });
        self
    }

    /// Add a route served through a load-balanced queue group
    pub fn queue_route(
        mut self,
        subject: impl Into<String>,
        group: impl Into<String>,
        contract: Contract,
        handler: impl Handler,
    ) -> Self {
        self.routes.push(Route {
            subject: subject.into(),
            queue_group: Some(group.into()),
            contract,
            handler: Arc::new(handler),
        });
        self
    }

    pub fn merge(mut self, other: DispatchTable) -> Self {
        self.routes.extend(other.routes);
        self
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn into_routes(self) -> Vec<Route> {
        self.routes
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Run a handler under its route deadline
pub async fn invoke(route: &Route, msg: Message) -> Reply {
    let Some(deadline) = route.contract.deadline else {
        return route.handler.handle(msg).await;
    };

    let fallback = route.handler.fallback(&msg);
    match tokio::time::timeout(deadline, route.handler.handle(msg)).await {
        Ok(reply) => reply,
        Err(_) => {
            tracing::warn!(
                subject = %route.subject,
                deadline_ms = deadline.as_millis() as u64,
                "Handler deadline elapsed, using fallback reply"
            );
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn handle(&self, msg: Message) -> Reply {
            Reply::Send(msg.payload)
        }
    }

    struct Stuck;

    #[async_trait]
    impl Handler for Stuck {
        async fn handle(&self, _msg: Message) -> Reply {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Reply::send("late")
        }

        fn fallback(&self, _msg: &Message) -> Reply {
            Reply::send("fallback")
        }
    }

    const CONTRACT: Contract = Contract {
        input: "bytes",
        output: "bytes",
        deadline: Some(Duration::from_millis(100)),
    };

    #[test]
    fn test_table_keeps_declaration_order() {
        let table = DispatchTable::new()
            .route("a", CONTRACT, Echo)
            .queue_route("b", "workers", CONTRACT, Echo);

        let subjects: Vec<_> = table.routes().iter().map(|r| r.subject.as_str()).collect();
        assert_eq!(subjects, ["a", "b"]);
        assert_eq!(table.routes()[1].queue_group.as_deref(), Some("workers"));
    }

    #[tokio::test]
    async fn test_invoke_returns_handler_reply() {
        let table = DispatchTable::new().route("a", CONTRACT, Echo);
        let reply = invoke(&table.routes()[0], Message::new("a", "ping")).await;
        assert_eq!(reply, Reply::send("ping"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_uses_fallback_after_deadline() {
        let table = DispatchTable::new().route("a", CONTRACT, Stuck);
        let reply = invoke(&table.routes()[0], Message::new("a", "ping")).await;
        assert_eq!(reply, Reply::send("fallback"));
    }
}
