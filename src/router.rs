//! # Result Router
//!
//! Delivers each finished task's single reply to the reply address carried by
//! its request message. Delivery problems are logged and never propagate into
//! the worker; a reply that cannot be delivered is dropped.

use tracing::{debug, warn};

use crate::constants::transport::REPLY_MESSAGE_TYPE;
use crate::logging::{log_error, log_transport_operation};
use crate::messaging::{
    ActiveConnection, AnalysisFailure, AnalysisResult, OutboundMessage, Reply, ReplyAddress, TransportResult,
};

/// Sink for task outcomes
pub trait ReplyRouter: Send + Sync {
    fn send_result(&self, result: AnalysisResult, reply_to: Option<&ReplyAddress>);

    fn send_failure(&self, failure: AnalysisFailure, reply_to: Option<&ReplyAddress>);
}

/// What happened to one routed reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered,
    /// The request carried no reply address
    NoAddress,
    /// The transport refused or had no connection
    Failed,
}

/// Router that publishes replies over the listener's current connection
///
/// A short-lived sender is created per reply, so replies keep flowing across
/// reconnects without any coordination with the supervisor.
#[derive(Debug, Clone)]
pub struct ResultRouter {
    connection: ActiveConnection,
}

impl ResultRouter {
    pub fn new(connection: ActiveConnection) -> Self {
        Self { connection }
    }

    /// Send one reply; failures are logged, never retried
    pub fn route(&self, reply: Reply, reply_to: Option<&ReplyAddress>) -> RouteOutcome {
        let request_id = reply.request_id().to_string();

        let Some(destination) = reply_to else {
            warn!(request = %request_id, "⚠️ ROUTER: Request carried no reply address; reply dropped");
            return RouteOutcome::NoAddress;
        };

        match self.deliver(&reply, destination) {
            Ok(()) => {
                log_transport_operation("send_reply", Some(destination.as_str()), "delivered", None);
                debug!(request = %request_id, destination = %destination, "ROUTER: Reply delivered");
                RouteOutcome::Delivered
            }
            Err(e) => {
                log_error(
                    "ROUTER",
                    "send_reply",
                    &e.to_string(),
                    Some(&format!("request={request_id} destination={destination}")),
                );
                RouteOutcome::Failed
            }
        }
    }

    fn deliver(&self, reply: &Reply, destination: &ReplyAddress) -> TransportResult<()> {
        let body = reply.to_bytes()?;
        let mut sender = self.connection.create_sender()?;
        let sent = sender.send(
            destination,
            OutboundMessage {
                body,
                message_type: REPLY_MESSAGE_TYPE.to_string(),
            },
        );
        if let Err(e) = sender.close() {
            warn!(destination = %destination, error = %e, "⚠️ ROUTER: Error closing reply sender");
        }
        sent
    }
}

impl ReplyRouter for ResultRouter {
    fn send_result(&self, result: AnalysisResult, reply_to: Option<&ReplyAddress>) {
        self.route(Reply::Result(result), reply_to);
    }

    fn send_failure(&self, failure: AnalysisFailure, reply_to: Option<&ReplyAddress>) {
        self.route(Reply::Failure(failure), reply_to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{
        ConnectionFactory, CorrelationResult, MemoryBroker, Request, RequestId,
    };
    use crate::test_utils::ftest_request;
    use std::time::Duration;

    fn result(task: &str) -> AnalysisResult {
        AnalysisResult::Correlation(CorrelationResult {
            id: RequestId::new("s", task),
            group1_name: None,
            group2_name: None,
            correlation: Some(0.5),
            data_points: Vec::new(),
        })
    }

    fn connected(broker: &MemoryBroker) -> ActiveConnection {
        let connection = ActiveConnection::new();
        connection.replace(Some(broker.create_connection().unwrap()));
        connection
    }

    #[test]
    fn test_result_reaches_reply_address() {
        let broker = MemoryBroker::new();
        let router = ResultRouter::new(connected(&broker));
        let address = ReplyAddress::new("client-1");

        router.send_result(result("t1"), Some(&address));

        let reply = broker.receive_reply(&address, Duration::from_secs(1)).unwrap();
        assert_eq!(reply, Reply::Result(result("t1")));
        let raw = broker.receive(&address, Duration::from_millis(10));
        assert!(raw.is_none());
    }

    #[test]
    fn test_failure_reaches_reply_address() {
        let broker = MemoryBroker::new();
        let router = ResultRouter::new(connected(&broker));
        let address = ReplyAddress::new("client-2");
        let failure = AnalysisFailure::new("bad", Request::FTest(ftest_request("s", "t", &[])));

        router.send_failure(failure.clone(), Some(&address));

        let reply = broker.receive_reply(&address, Duration::from_secs(1)).unwrap();
        assert_eq!(reply, Reply::Failure(failure));
    }

    #[test]
    fn test_send_errors_are_swallowed() {
        let broker = MemoryBroker::new();
        let router = ResultRouter::new(connected(&broker));
        let address = ReplyAddress::new("client-3");
        broker.fail_next_sends(1);

        router.send_result(result("t1"), Some(&address));
        router.send_result(result("t2"), Some(&address));

        let reply = broker.receive_reply(&address, Duration::from_secs(1)).unwrap();
        assert_eq!(reply.request_id(), &RequestId::new("s", "t2"));
    }

    #[test]
    fn test_lost_connection_drops_reply() {
        let broker = MemoryBroker::new();
        let connection = connected(&broker);
        let router = ResultRouter::new(connection.clone());
        let address = ReplyAddress::new("nowhere");
        connection.take();

        let outcome = router.route(Reply::Result(result("t1")), Some(&address));

        assert_eq!(outcome, RouteOutcome::Failed);
        assert_eq!(broker.pending(address.as_str()), 0);
    }

    #[test]
    fn test_missing_address_drops_reply() {
        let broker = MemoryBroker::new();
        let router = ResultRouter::new(connected(&broker));

        assert_eq!(router.route(Reply::Result(result("t1")), None), RouteOutcome::NoAddress);
        assert_eq!(
            router.route(Reply::Result(result("t2")), Some(&ReplyAddress::new("client-4"))),
            RouteOutcome::Delivered
        );
        assert_eq!(broker.pending("client-4"), 1);
    }
}
