use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::{Registry, Unit},
};
use tokio::time;

/// Per-RPC counters and latencies, labeled by service, method and type.
#[derive(Clone, Debug)]
pub struct RpcMetrics {
    started: Family<Labels, Counter>,
    handled: Family<CodeLabels, Counter>,
    handling: Family<Labels, Histogram>,
    msg_sent: Family<Labels, Counter>,
}

/// Metrics for a single procedure.
#[derive(Clone, Debug)]
pub(crate) struct Rpc {
    started: Counter,
    handled: Family<CodeLabels, Counter>,
    handling: Histogram,
    msg_sent: Counter,
    labels: Labels,
}

/// Observes one call. A call that is dropped without being ended is counted
/// as cancelled.
pub(crate) struct Call {
    msg_sent: Counter,
    end: Option<End>,
}

struct End {
    start: time::Instant,
    handling: Histogram,
    handled: Family<CodeLabels, Counter>,
    labels: Labels,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct Labels {
    grpc_service: &'static str,
    grpc_method: &'static str,
    grpc_type: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct CodeLabels {
    grpc_service: &'static str,
    grpc_method: &'static str,
    grpc_type: &'static str,
    grpc_code: &'static str,
}

// === impl RpcMetrics ===

impl RpcMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let started = Family::<Labels, Counter>::default();
        reg.register(
            "started",
            "Total number of RPCs started on the server",
            started.clone(),
        );

        let handled = Family::<CodeLabels, Counter>::default();
        reg.register(
            "handled",
            "Total number of RPCs completed on the server, regardless of success or failure",
            handled.clone(),
        );

        let msg_sent = Family::<Labels, Counter>::default();
        reg.register(
            "msg_sent",
            "Total number of stream messages sent by the server",
            msg_sent.clone(),
        );

        // Unary calls are bounded by the request deadline; log streams may be
        // held open for hours.
        let handling = Family::<Labels, Histogram>::new_with_constructor(|| {
            Histogram::new([0.01, 0.1, 1.0, 10.0, 30.0, 300.0, 3600.0])
        });
        reg.register_with_unit(
            "handling",
            "Histogram of the time taken to handle RPCs on the server",
            Unit::Seconds,
            handling.clone(),
        );

        Self {
            started,
            handled,
            handling,
            msg_sent,
        }
    }

    pub(crate) fn unary(&self, service: &'static str, method: &'static str) -> Rpc {
        self.rpc(service, method, "unary")
    }

    pub(crate) fn server_stream(&self, service: &'static str, method: &'static str) -> Rpc {
        self.rpc(service, method, "server_stream")
    }

    fn rpc(
        &self,
        grpc_service: &'static str,
        grpc_method: &'static str,
        grpc_type: &'static str,
    ) -> Rpc {
        let labels = Labels {
            grpc_service,
            grpc_method,
            grpc_type,
        };
        Rpc {
            started: self.started.get_or_create(&labels).clone(),
            handled: self.handled.clone(),
            handling: self.handling.get_or_create(&labels).clone(),
            msg_sent: self.msg_sent.get_or_create(&labels).clone(),
            labels,
        }
    }
}

#[cfg(test)]
impl Default for RpcMetrics {
    fn default() -> Self {
        Self::register(&mut Registry::default())
    }
}

// === impl Rpc ===

impl Rpc {
    pub(crate) fn start(&self) -> Call {
        self.started.inc();
        Call {
            msg_sent: self.msg_sent.clone(),
            end: Some(End {
                start: time::Instant::now(),
                handling: self.handling.clone(),
                handled: self.handled.clone(),
                labels: self.labels.clone(),
            }),
        }
    }
}

// === impl Call ===

impl Call {
    pub(crate) fn msg_sent(&self) {
        self.msg_sent.inc();
    }

    pub(crate) fn end(mut self, code: tonic::Code) {
        if let Some(end) = self.end.take() {
            end.record(code);
        }
    }

    /// Ends the call with the code of `res`.
    pub(crate) fn end_with<T>(self, res: &Result<T, tonic::Status>) {
        self.end(match res {
            Ok(_) => tonic::Code::Ok,
            Err(status) => status.code(),
        });
    }
}

impl Drop for Call {
    fn drop(&mut self) {
        if let Some(end) = self.end.take() {
            end.record(tonic::Code::Cancelled);
        }
    }
}

// === impl End ===

impl End {
    fn record(self, code: tonic::Code) {
        let Self {
            start,
            handling,
            handled,
            labels,
        } = self;
        handling.observe(start.elapsed().as_secs_f64());
        handled
            .get_or_create(&CodeLabels {
                grpc_service: labels.grpc_service,
                grpc_method: labels.grpc_method,
                grpc_type: labels.grpc_type,
                grpc_code: code_name(code),
            })
            .inc();
    }
}

/// Status code names as they appear on the wire, indexed by code.
const CODE_NAMES: [&str; 17] = [
    "OK",
    "CANCELLED",
    "UNKNOWN",
    "INVALID_ARGUMENT",
    "DEADLINE_EXCEEDED",
    "NOT_FOUND",
    "ALREADY_EXISTS",
    "PERMISSION_DENIED",
    "RESOURCE_EXHAUSTED",
    "FAILED_PRECONDITION",
    "ABORTED",
    "OUT_OF_RANGE",
    "UNIMPLEMENTED",
    "INTERNAL",
    "UNAVAILABLE",
    "DATA_LOSS",
    "UNAUTHENTICATED",
];

fn code_name(code: tonic::Code) -> &'static str {
    usize::try_from(i32::from(code))
        .ok()
        .and_then(|i| CODE_NAMES.get(i).copied())
        .unwrap_or("UNKNOWN")
}
