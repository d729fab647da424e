//! dispatcher.rs
//! Main loop: receive → route → respond, strictly one request at a time.
//!
//! Every request gets exactly one response. Per-request failures become failure responses
//! and never leave `dispatch`. `run` returns `Ok` when the running flag clears or the
//! channel closes, and `Err` when `receive` fails any other way.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};

use crate::controller::registry::ControllerRegistry;
use crate::dispatch::channel::NetworkChannel;
use crate::dispatch::request::{Failure, Request, RequestKind, Response};
use crate::error::{ChannelError, ControllerError};
use crate::store::value::Value;
use crate::utils::metrics::{SharedMetrics, lock_metrics};
use crate::utils::request_log::RequestLog;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct Dispatcher {
    registry: Arc<ControllerRegistry>,
    channel: Arc<dyn NetworkChannel>,
    metrics: SharedMetrics,
    request_log: Option<Arc<RequestLog>>,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ControllerRegistry>,
        channel: Arc<dyn NetworkChannel>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            registry,
            channel,
            metrics,
            request_log: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_request_log(mut self, log: Arc<RequestLog>) -> Self {
        self.request_log = Some(log);
        self
    }

    /// How long one `receive` may block before the running flag is re-checked.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Routes one request to its owner. Never fails: errors become failure responses.
    pub fn handle(&self, request: &Request) -> Response {
        match self.route(request) {
            Ok(value) => Response::success(request, value),
            Err(e) => Response::failure(request, Failure::from(&e)),
        }
    }

    fn route(&self, request: &Request) -> Result<Value, ControllerError> {
        match request.kind {
            RequestKind::Get => {
                let (owner, local) = self.registry.find_owner(&request.name)?;
                owner.get_variable(local)
            }
            RequestKind::Set => {
                let value = request.value.clone().ok_or_else(|| {
                    ControllerError::MalformedRequest(format!(
                        "set '{}' carries no value",
                        request.name
                    ))
                })?;
                let (owner, local) = self.registry.find_owner(&request.name)?;
                owner.set_variable(local, value)?;
                Ok(Value::Bool(true))
            }
            RequestKind::Action => {
                let (owner, local) = self.registry.find_owner(&request.name)?;
                owner.perform_action(local, &request.args)
            }
        }
    }

    /// `handle` plus bookkeeping: metrics, request log, failure logging.
    pub fn dispatch(&self, request: Request) -> Response {
        let start = Instant::now();
        let response = self.handle(&request);
        let latency_us = start.elapsed().as_micros() as u64;
        let failure = response.failure_kind().map(|k| k.as_str());

        {
            let mut m = lock_metrics(&self.metrics);
            m.record_request(request.kind);
            m.record_latency(latency_us);
            if let Some(kind) = failure {
                m.record_failure(kind);
            }
        }

        if let Some(log) = &self.request_log {
            log.record(
                request.kind,
                &request.name,
                &request.peer.0,
                &request.correlation_id.to_string(),
                failure,
                latency_us,
            );
        }

        match &response.error {
            Some(f) => warn!(
                "[Dispatcher] {} '{}' from {} failed: {}",
                request.kind.as_str(),
                request.name,
                request.peer,
                f.message
            ),
            None => debug!(
                "[Dispatcher] {} '{}' from {} ok in {}us",
                request.kind.as_str(),
                request.name,
                request.peer,
                latency_us
            ),
        }

        response
    }

    /// Serves requests until `running` is cleared or the channel closes.
    /// Returns the number of requests answered.
    pub fn run(&self, running: &AtomicBool) -> Result<u64, ChannelError> {
        info!("[Dispatcher] main loop started");
        let mut served: u64 = 0;

        while running.load(Ordering::Acquire) {
            let request = match self.channel.receive(self.poll_interval) {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(ChannelError::Closed) => {
                    info!("[Dispatcher] channel closed");
                    break;
                }
                Err(e) => {
                    error!("[Dispatcher] receive failed: {}", e);
                    return Err(e);
                }
            };

            let response = self.dispatch(request);
            served += 1;
            if let Err(e) = self.channel.send(response) {
                // The peer went away; nothing else is affected.
                warn!("[Dispatcher] response not delivered: {}", e);
            }
        }

        info!("[Dispatcher] main loop stopped after {} request(s)", served);
        Ok(served)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{
        base::{Controller, DEFAULT_REFRESH_PERIOD, Subsystem},
        battery::Battery,
        motor::Motor,
        proximity::Proximity,
    };
    use crate::dispatch::channel::LocalChannel;
    use crate::dispatch::request::{CorrelationId, FailureKind};
    use crate::utils::metrics::Metrics;
    use std::thread;

    fn dispatcher(channel: Arc<LocalChannel>) -> (Dispatcher, SharedMetrics) {
        let metrics = Metrics::shared();
        let mut registry = ControllerRegistry::new();
        let subsystems: Vec<Box<dyn Subsystem>> = vec![
            Box::new(Motor::with_feed(None)),
            Box::new(Battery::with_feed(None)),
            Box::new(Proximity::with_feed(None)),
        ];
        for s in subsystems {
            let c = Arc::new(Controller::new(s, metrics.clone()));
            c.start(DEFAULT_REFRESH_PERIOD).unwrap();
            registry.add(c).unwrap();
        }
        let d = Dispatcher::new(Arc::new(registry), channel, metrics.clone())
            .with_poll_interval(Duration::from_millis(5));
        (d, metrics)
    }

    #[test]
    fn set_then_get_round_trips() {
        let (d, _) = dispatcher(Arc::new(LocalChannel::new()));
        let set = d.handle(&Request::set("battery.voltage", 400i64).with_key(1u64));
        assert!(set.ok);
        assert_eq!(set.result, Some(Value::Bool(true)));
        let get = d.handle(&Request::get("battery.voltage").with_key(2u64));
        assert_eq!(get.result, Some(Value::Int(400)));
        assert_eq!(get.correlation_id, CorrelationId::from(2u64));
    }

    #[test]
    fn failures_carry_their_kind() {
        let (d, _) = dispatcher(Arc::new(LocalChannel::new()));
        let cases = [
            (Request::get("distanceFront"), FailureKind::AccessViolation),
            (Request::set("rpm", 10i64), FailureKind::AccessViolation),
            (Request::set("speed", 1.5), FailureKind::TypeMismatch),
            (Request::get("warpDrive"), FailureKind::NameNotFound),
            (Request::get("setSpeed"), FailureKind::VariableNotFound),
            (Request::action("speed", vec![]), FailureKind::ActionNotFound),
            (Request::action("setSpeed", vec![Value::Int(-1)]), FailureKind::ActionFailed),
        ];
        for (req, kind) in cases {
            let resp = d.handle(&req);
            assert!(!resp.ok, "{:?} should fail", req);
            assert_eq!(resp.failure_kind(), Some(kind), "{:?}", req);
        }
    }

    #[test]
    fn set_without_value_is_malformed() {
        let (d, _) = dispatcher(Arc::new(LocalChannel::new()));
        let mut req = Request::set("speed", 1i64);
        req.value = None;
        assert_eq!(d.handle(&req).failure_kind(), Some(FailureKind::MalformedRequest));
    }

    #[test]
    fn type_mismatch_leaves_value_unchanged() {
        let (d, _) = dispatcher(Arc::new(LocalChannel::new()));
        d.handle(&Request::set("speed", 55i64));
        d.handle(&Request::set("speed", "fast"));
        assert_eq!(d.handle(&Request::get("speed")).result, Some(Value::Int(55)));
    }

    #[test]
    fn one_failure_does_not_disturb_the_rest() {
        let channel = Arc::new(LocalChannel::new());
        let (d, metrics) = dispatcher(channel.clone());
        let peer = channel.connect();

        let requests = vec![
            Request::set("speed", 30i64),
            Request::get("speed"),
            Request::get("distanceFront"),
            Request::action("setSpeed", vec![Value::Int(60)]),
            Request::get("speed"),
        ];
        let n = requests.len();
        for (i, r) in requests.into_iter().enumerate() {
            peer.submit(r.with_key(i as u64)).unwrap();
        }
        channel.close();

        let running = AtomicBool::new(true);
        let served = d.run(&running).unwrap();
        assert_eq!(served, n as u64);

        let responses: Vec<Response> = (0..n)
            .map(|_| peer.recv(Duration::from_secs(1)).unwrap())
            .collect();
        assert!(peer.recv(Duration::from_millis(20)).is_none());

        let ok: Vec<bool> = responses.iter().map(|r| r.ok).collect();
        assert_eq!(ok, vec![true, true, false, true, true]);
        assert_eq!(responses[1].result, Some(Value::Int(30)));
        assert_eq!(responses[4].result, Some(Value::Int(60)));
        for (i, r) in responses.iter().enumerate() {
            assert_eq!(r.correlation_id, CorrelationId::from(i as u64));
        }

        let m = lock_metrics(&metrics);
        assert_eq!(m.total_requests(), n as u64);
        assert_eq!(m.failures.get("AccessViolation"), Some(&1));
    }

    /// Receive fails with an io error; nothing is ever sent.
    struct FailingChannel;

    impl NetworkChannel for FailingChannel {
        fn receive(&self, _timeout: Duration) -> Result<Option<Request>, ChannelError> {
            Err(ChannelError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                "listener gone",
            )))
        }

        fn send(&self, _response: Response) -> Result<(), ChannelError> {
            unreachable!("nothing was received")
        }
    }

    #[test]
    fn receive_errors_other_than_closed_end_the_loop_with_that_error() {
        let d = Dispatcher::new(
            Arc::new(ControllerRegistry::new()),
            Arc::new(FailingChannel),
            Metrics::shared(),
        );
        let running = AtomicBool::new(true);
        assert!(matches!(d.run(&running), Err(ChannelError::Io(_))));
    }

    #[test]
    fn responses_go_back_to_the_right_peer() {
        let channel = Arc::new(LocalChannel::new());
        let (d, _) = dispatcher(channel.clone());
        let a = channel.connect();
        let b = channel.connect();

        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let running = running.clone();
            thread::spawn(move || d.run(&running))
        };

        let ra = a.call(Request::get("warpDrive").with_key("a"), Duration::from_secs(1)).unwrap();
        let rb = b.call(Request::get("speed").with_key("b"), Duration::from_secs(1)).unwrap();
        assert_eq!(ra.failure_kind(), Some(FailureKind::NameNotFound));
        assert_eq!(ra.peer, *a.id());
        assert!(rb.ok);
        assert_eq!(rb.peer, *b.id());

        running.store(false, Ordering::Release);
        assert_eq!(handle.join().unwrap().unwrap(), 2);
    }
}
