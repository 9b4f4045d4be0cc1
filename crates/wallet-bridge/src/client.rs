//! Bridge transport: one logical connection to the embedded script host.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::environment::BridgeConfig;
use crate::error::{BridgeError, DeliveryError};
use crate::pending::RequestTable;
use crate::readiness::{ReadinessGate, TransportState};
use crate::types::{
    HostMessage, InboundFrame, InitArguments, InitMessage, InvokeMessage, RequestId,
    SUPPORTED_BRIDGE_METHODS,
};

pub const WIRE_LOG_TARGET: &str = "wallet_bridge::wire";

/// Execution channel into the script host, e.g. a web view's script
/// evaluator. Inbound frames are pushed back through
/// [`BridgeTransport::handle_host_message`].
#[async_trait]
pub trait HostChannel: Send + Sync {
    async fn post_message(&self, payload: String) -> Result<(), DeliveryError>;
}

pub type HostWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub type HostReader = Box<dyn AsyncRead + Send + Unpin>;

/// Newline-delimited JSON over any async byte stream.
pub struct StreamHostChannel {
    writer: tokio::sync::Mutex<HostWriter>,
}

impl StreamHostChannel {
    pub fn new(writer: HostWriter) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
        }
    }
}

#[async_trait]
impl HostChannel for StreamHostChannel {
    async fn post_message(&self, payload: String) -> Result<(), DeliveryError> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(payload.as_bytes())
            .await
            .map_err(|err| DeliveryError(format!("bridge write failed: {err}")))?;
        writer
            .write_all(b"\n")
            .await
            .map_err(|err| DeliveryError(format!("bridge write failed: {err}")))?;
        writer
            .flush()
            .await
            .map_err(|err| DeliveryError(format!("bridge flush failed: {err}")))?;
        Ok(())
    }
}

struct TransportInner {
    channel: Box<dyn HostChannel>,
    requests: Arc<RequestTable>,
    readiness: Arc<ReadinessGate>,
    init: InitArguments,
    call_timeout: Duration,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for TransportInner {
    fn drop(&mut self) {
        let task = self
            .reader_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

#[derive(Clone)]
pub struct BridgeTransport {
    inner: Arc<TransportInner>,
}

impl BridgeTransport {
    pub fn new(channel: impl HostChannel + 'static, config: &BridgeConfig) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                channel: Box::new(channel),
                requests: Arc::new(RequestTable::new()),
                readiness: Arc::new(ReadinessGate::new(config.ready_timeout)),
                init: config.init_arguments(),
                call_timeout: config.call_timeout,
                reader_task: Mutex::new(None),
            }),
        }
    }

    /// Runs the transport over a byte stream, one JSON frame per line. Must be
    /// called inside a tokio runtime.
    pub fn connect_with_io(writer: HostWriter, reader: HostReader, config: &BridgeConfig) -> Self {
        let transport = Self::new(StreamHostChannel::new(writer), config);

        let requests = Arc::clone(&transport.inner.requests);
        let readiness = Arc::clone(&transport.inner.readiness);
        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => dispatch_frame(&requests, &readiness, &line),
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(error = %err, "Bridge host read failed");
                        break;
                    }
                }
            }
            close(&requests, &readiness);
        });

        *transport
            .inner
            .reader_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reader_task);
        transport
    }

    pub fn state(&self) -> TransportState {
        self.inner.readiness.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<TransportState> {
        self.inner.readiness.subscribe()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.requests.len()
    }

    pub async fn ensure_ready(&self) -> Result<(), BridgeError> {
        self.inner.readiness.ensure_ready().await
    }

    /// Host finished loading: send the init message and wait for its ack.
    pub async fn handle_navigation_finished(&self) -> Result<(), BridgeError> {
        if !self.inner.readiness.begin_handshake() {
            tracing::debug!(state = self.state().label(), "Ignoring repeated host load event");
            return Ok(());
        }

        let payload = serde_json::to_string(&InitMessage::new(&self.inner.init))
            .map_err(|err| BridgeError::InvalidArguments(format!("init encode failed: {err}")))?;
        tracing::trace!(target: WIRE_LOG_TARGET, direction = "out", raw = %redact_init(&payload, &self.inner.init.api_key));

        if let Err(err) = self.inner.channel.post_message(payload).await {
            tracing::warn!(error = %err, "Bridge init delivery failed");
            self.inner.readiness.mark_failed();
            return Err(BridgeError::Delivery(err.0));
        }
        Ok(())
    }

    pub fn handle_navigation_failed(&self, reason: &str) {
        tracing::warn!(reason, "Bridge host navigation failed");
        close(&self.inner.requests, &self.inner.readiness);
    }

    pub fn handle_host_closed(&self) {
        close(&self.inner.requests, &self.inner.readiness);
    }

    /// Feeds one raw inbound frame. Unknown, late and duplicate frames are
    /// logged and dropped.
    pub fn handle_host_message(&self, raw: &str) {
        dispatch_frame(&self.inner.requests, &self.inner.readiness, raw);
    }

    pub async fn call<A>(&self, method: &str, arguments: &A) -> Result<Value, BridgeError>
    where
        A: Serialize + ?Sized,
    {
        self.inner.readiness.ensure_ready().await?;
        if !SUPPORTED_BRIDGE_METHODS.contains(&method) {
            tracing::warn!(method, "Calling a method outside the known host surface");
        }

        let arguments = serde_json::to_value(arguments)
            .map_err(|err| BridgeError::InvalidArguments(format!("{method}: {err}")))?;
        let request_id = RequestId::generate();
        let payload = serde_json::to_string(&InvokeMessage::new(method, &arguments, &request_id))
            .map_err(|err| BridgeError::InvalidArguments(format!("{method}: {err}")))?;

        let requests = &self.inner.requests;
        let completion = requests.register(request_id.clone(), method);
        let watcher = spawn_timeout_watcher(
            Arc::clone(requests),
            request_id.clone(),
            method.to_string(),
            self.inner.call_timeout,
        );
        requests.attach_watcher(&request_id, watcher);

        tracing::trace!(target: WIRE_LOG_TARGET, direction = "out", raw = %payload);
        if let Err(err) = self.inner.channel.post_message(payload).await {
            tracing::warn!(method, request_id = %request_id, error = %err, "Bridge message delivery failed");
            requests.resolve(&request_id, Err(BridgeError::Delivery(err.0)));
        }

        completion.await.unwrap_or(Err(BridgeError::HostClosed))
    }

    /// [`Self::call`] with the success payload decoded into `R`.
    pub async fn call_as<A, R>(&self, method: &str, arguments: &A) -> Result<R, BridgeError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let value = self.call(method, arguments).await?;
        serde_json::from_value(value).map_err(|err| BridgeError::malformed(method, err))
    }
}

fn spawn_timeout_watcher(
    requests: Arc<RequestTable>,
    request_id: RequestId,
    method: String,
    timeout: Duration,
) -> tokio::task::AbortHandle {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let error = BridgeError::Timeout {
            method: method.clone(),
            timeout,
        };
        if requests.resolve(&request_id, Err(error)) {
            tracing::warn!(method = %method, request_id = %request_id, timeout_ms = timeout.as_millis() as u64, "Bridge call timed out");
        }
    })
    .abort_handle()
}

fn dispatch_frame(requests: &RequestTable, readiness: &ReadinessGate, raw: &str) {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return;
    }
    tracing::trace!(target: WIRE_LOG_TARGET, direction = "in", raw = %trimmed);

    let message: HostMessage = match serde_json::from_str(trimmed) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!(error = %err, line = %trimmed, "Bridge host JSON parse failed");
            return;
        }
    };

    match message.into_frame() {
        InboundFrame::InitAck => {
            if !readiness.mark_ready() {
                tracing::debug!(state = readiness.state().label(), "Ignoring init ack");
            }
        }
        InboundFrame::Response {
            request_id,
            method,
            outcome,
        } => {
            if !requests.resolve(&request_id, outcome) {
                tracing::warn!(
                    request_id = %request_id,
                    method = method.as_deref().unwrap_or("<none>"),
                    "Bridge response without pending request"
                );
            }
        }
        InboundFrame::Unrecognized { method } => {
            tracing::warn!(
                method = method.as_deref().unwrap_or("<none>"),
                "Bridge frame without request id"
            );
        }
    }
}

fn close(requests: &RequestTable, readiness: &ReadinessGate) {
    let error = if readiness.state() == TransportState::Ready {
        BridgeError::HostClosed
    } else {
        BridgeError::NotReady
    };
    readiness.mark_failed();
    let dropped = requests.fail_all(&error);
    if dropped > 0 {
        tracing::debug!(dropped, "Failed pending bridge calls on close");
    }
}

fn redact_init(payload: &str, api_key: &str) -> String {
    if api_key.is_empty() {
        payload.to_string()
    } else {
        payload.replace(api_key, "<redacted>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingChannel {
        sent: Arc<Mutex<Vec<String>>>,
        fail_after: Option<usize>,
        posts: AtomicUsize,
    }

    #[async_trait]
    impl HostChannel for RecordingChannel {
        async fn post_message(&self, payload: String) -> Result<(), DeliveryError> {
            let count = self.posts.fetch_add(1, Ordering::SeqCst);
            if self.fail_after.is_some_and(|limit| count >= limit) {
                return Err(DeliveryError("web view detached".to_string()));
            }
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(payload);
            Ok(())
        }
    }

    fn config() -> BridgeConfig {
        BridgeConfig::new(Environment::Sandbox, "test-key")
            .with_call_timeout(Duration::from_millis(80))
            .with_ready_timeout(Duration::from_millis(200))
    }

    async fn ready_transport(channel: RecordingChannel) -> BridgeTransport {
        let transport = BridgeTransport::new(channel, &config());
        assert_eq!(transport.handle_navigation_finished().await, Ok(()));
        transport.handle_host_message(r#"{"method":"init"}"#);
        assert_eq!(transport.state(), TransportState::Ready);
        transport
    }

    fn last_request_id(sent: &Arc<Mutex<Vec<String>>>) -> String {
        let sent = sent.lock().unwrap_or_else(PoisonError::into_inner);
        sent.last()
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .and_then(|value| value["requestId"].as_str().map(str::to_string))
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn init_message_carries_config() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let channel = RecordingChannel {
            sent: Arc::clone(&sent),
            ..RecordingChannel::default()
        };
        let transport = BridgeTransport::new(channel, &config());
        assert_eq!(transport.state(), TransportState::NotReady);
        assert_eq!(transport.handle_navigation_finished().await, Ok(()));
        assert_eq!(transport.state(), TransportState::Handshaking);

        let init: Value = serde_json::from_str(&sent.lock().unwrap_or_else(PoisonError::into_inner)[0])
            .unwrap_or_default();
        assert_eq!(init["messageType"], "init");
        assert_eq!(init["arguments"]["environment"], "SANDBOX");
        assert_eq!(init["arguments"]["apiKey"], "test-key");
        assert_eq!(init["arguments"]["isPasskeySupported"], true);
        assert!(init.get("requestId").is_none());
    }

    #[tokio::test]
    async fn late_response_after_timeout_is_dropped() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = ready_transport(RecordingChannel {
            sent: Arc::clone(&sent),
            ..RecordingChannel::default()
        })
        .await;

        let outcome = transport.call("fetchWallets", &json!({})).await;
        assert!(matches!(outcome, Err(BridgeError::Timeout { ref method, .. }) if method == "fetchWallets"));
        assert_eq!(transport.in_flight(), 0);

        let request_id = last_request_id(&sent);
        transport.handle_host_message(
            &json!({"method": "fetchWallets", "requestId": request_id, "responseData": []})
                .to_string(),
        );
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test]
    async fn delivery_failure_resolves_immediately() {
        let transport = ready_transport(RecordingChannel {
            fail_after: Some(1),
            ..RecordingChannel::default()
        })
        .await;

        let outcome = transport.call("logout", &json!({})).await;
        assert_eq!(
            outcome,
            Err(BridgeError::Delivery("web view detached".to_string()))
        );
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test]
    async fn unserializable_arguments_never_register() {
        let transport = ready_transport(RecordingChannel::default()).await;
        let mut bad = std::collections::HashMap::new();
        bad.insert(vec![1_u8], "non-string key");

        let outcome = transport.call("signMessage", &bad).await;
        assert!(matches!(outcome, Err(BridgeError::InvalidArguments(_))));
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test]
    async fn calls_before_ready_fail_after_ceiling() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = BridgeTransport::new(
            RecordingChannel {
                sent: Arc::clone(&sent),
                ..RecordingChannel::default()
            },
            &config(),
        );

        let outcome = transport.call("isSessionActive", &json!({})).await;
        assert_eq!(outcome, Err(BridgeError::NotReady));
        assert_eq!(transport.state(), TransportState::Failed);
        assert!(sent.lock().unwrap_or_else(PoisonError::into_inner).is_empty());
    }

    #[tokio::test]
    async fn navigation_failure_fails_calls_fast() {
        let transport = BridgeTransport::new(RecordingChannel::default(), &config());
        transport.handle_navigation_failed("offline");
        assert_eq!(transport.state(), TransportState::Failed);
        assert_eq!(
            transport.call("isSessionActive", &json!({})).await,
            Err(BridgeError::NotReady)
        );
    }

    #[tokio::test]
    async fn host_close_fails_in_flight_calls() {
        let transport = ready_transport(RecordingChannel::default()).await;
        let pending = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.call("fetchWallets", &json!({})).await })
        };
        for _ in 0..50 {
            if transport.in_flight() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(transport.in_flight(), 1);

        transport.handle_host_closed();
        assert_eq!(pending.await.ok(), Some(Err(BridgeError::HostClosed)));
        assert_eq!(transport.state(), TransportState::Failed);
        assert_eq!(transport.in_flight(), 0);
        assert_eq!(
            transport.call("logout", &json!({})).await,
            Err(BridgeError::NotReady)
        );
    }

    #[tokio::test]
    async fn garbage_frames_are_ignored() {
        let transport = ready_transport(RecordingChannel::default()).await;
        transport.handle_host_message("not json");
        transport.handle_host_message("");
        transport.handle_host_message(r#"{"method":"unknownEvent"}"#);
        transport.handle_host_message(r#"{"method":"x","requestId":"nobody","responseData":1}"#);
        assert_eq!(transport.state(), TransportState::Ready);
    }

    #[test]
    fn init_payload_redacts_api_key() {
        let redacted = redact_init(r#"{"apiKey":"secret"}"#, "secret");
        assert_eq!(redacted, r#"{"apiKey":"<redacted>"}"#);
    }
}
