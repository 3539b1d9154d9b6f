// mcp-client/src/client.rs
use serde_json::{json, Value};
use tracing::{debug, debug_span, info, info_span, warn, Instrument, Span};

use ontomcp_protocol::{
    constants::{error_codes, methods, PROTOCOL_VERSION},
    messages::{InitializeParams, InitializeResult, JsonRpcError, JsonRpcMessage},
    types::{CapabilityError, ClientInfo, ServerCapabilities, ServerInfo},
};

use crate::error::{ClientError, TransportError};
use crate::transport::Transport;

/// Most replies to earlier messages skipped while waiting for one reply
const MAX_STALE_REPLIES: usize = 16;

/// MCP client state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No transport bound
    Unbound,
    /// Transport bound, handshake not done
    Uninitialized,
    Initialized,
    /// Terminal; the client cannot be used again
    Exited,
}

/// MCP client builder
pub struct ClientBuilder {
    name: String,
    version: String,
    transport: Option<Box<dyn Transport>>,
}

impl ClientBuilder {
    /// Create a new client builder
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            transport: None,
        }
    }

    /// Set the transport to use
    pub fn with_transport<T: Transport>(mut self, transport: T) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Build the client
    pub fn build(self) -> Client {
        let span = info_span!("mcp_client", client = %self.name);
        let state = if self.transport.is_some() {
            ClientState::Uninitialized
        } else {
            ClientState::Unbound
        };

        Client {
            info: ClientInfo {
                name: self.name,
                version: self.version,
            },
            transport: self.transport,
            state,
            capabilities: ServerCapabilities::default(),
            server_info: None,
            protocol_version: None,
            next_id: 1,
            span,
        }
    }
}

/// MCP client: one handshake, then strictly sequential request/reply calls
pub struct Client {
    info: ClientInfo,
    transport: Option<Box<dyn Transport>>,
    state: ClientState,
    capabilities: ServerCapabilities,
    server_info: Option<ServerInfo>,
    protocol_version: Option<String>,
    next_id: i64,
    span: Span,
}

impl Client {
    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == ClientState::Initialized
    }

    pub fn client_info(&self) -> &ClientInfo {
        &self.info
    }

    /// Capability tree from the last successful handshake
    pub fn server_capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    /// Bind a transport, returning the one it replaces.
    ///
    /// Only allowed before the handshake.
    pub fn set_transport<T: Transport>(
        &mut self,
        transport: T,
    ) -> Result<Option<Box<dyn Transport>>, ClientError> {
        match self.state {
            ClientState::Exited => Err(ClientError::Exited),
            ClientState::Initialized => Err(ClientError::InvalidState(
                "cannot replace the transport of an initialized client",
            )),
            ClientState::Unbound | ClientState::Uninitialized => {
                self.state = ClientState::Uninitialized;
                Ok(self.transport.replace(Box::new(transport)))
            }
        }
    }

    /// Get the next request ID
    fn next_request_id(&mut self) -> i64 {
        let current = self.next_id;
        self.next_id += 1;
        current
    }

    /// Perform the handshake and return the server's raw result object.
    ///
    /// Calling this again on an initialized client redoes the handshake.
    pub async fn initialize_connection(&mut self) -> Result<Value, ClientError> {
        let span = self.span.clone();
        self.initialize_inner().instrument(span).await
    }

    async fn initialize_inner(&mut self) -> Result<Value, ClientError> {
        match self.state {
            ClientState::Exited => return Err(ClientError::Exited),
            ClientState::Initialized => {
                warn!("Client is already initialized; repeating the handshake");
                self.state = ClientState::Uninitialized;
            }
            ClientState::Unbound | ClientState::Uninitialized => {}
        }
        if self.transport.is_none() {
            return Err(ClientError::NoTransport);
        }

        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            client_info: self.info.clone(),
        };

        let id = self.next_request_id();
        let request =
            JsonRpcMessage::request(id, methods::INITIALIZE, Some(serde_json::to_value(&params)?));
        let response = match self.exchange(request).await {
            Ok(response) => response,
            Err(ClientError::MalformedReply(detail)) => {
                return Err(ClientError::Protocol {
                    code: None,
                    message: format!("malformed initialize reply: {detail}"),
                })
            }
            Err(err) => return Err(err),
        };

        let result = match response.into_outcome() {
            Some(Err(error)) => {
                return Err(ClientError::Protocol {
                    code: Some(error.code),
                    message: error.message,
                })
            }
            Some(Ok(Value::Object(result))) => result,
            _ => {
                return Err(ClientError::Protocol {
                    code: None,
                    message: "initialize reply has no result object".to_string(),
                })
            }
        };

        let parsed = InitializeResult::from_result(&result);
        self.capabilities = parsed.capabilities.unwrap_or_else(|| {
            warn!("Initialize result carries no capability tree; assuming no capabilities");
            ServerCapabilities::default()
        });
        self.server_info = parsed.server_info;
        self.protocol_version = parsed.protocol_version;
        self.state = ClientState::Initialized;

        if let Err(err) = self.send_notification(methods::INITIALIZED, json!({})).await {
            warn!("Failed to send initialized notification: {}", err);
        }

        match &self.server_info {
            Some(server) => info!(server = %server.name, version = %server.version, "Connected"),
            None => info!("Connected"),
        }
        Ok(Value::Object(result))
    }

    /// Check that the server declared support for the capability at `path`
    pub fn ensure_capability(&self, path: &[&str]) -> Result<(), CapabilityError> {
        self.capabilities.ensure(path)
    }

    fn require_initialized(&self) -> Result<(), ClientError> {
        match self.state {
            ClientState::Initialized => Ok(()),
            ClientState::Exited => Err(ClientError::Exited),
            ClientState::Unbound | ClientState::Uninitialized => Err(ClientError::NotInitialized),
        }
    }

    /// Send a request and return the full reply envelope.
    ///
    /// Server errors, and transport failures synthesized as errors, come back
    /// as `Ok` with the reply's `error` set.
    pub async fn dispatch_raw(
        &mut self,
        method: &str,
        params: Value,
    ) -> Result<JsonRpcMessage, ClientError> {
        self.require_initialized()?;

        let id = self.next_request_id();
        let span = debug_span!(parent: &self.span, "request", method, id);
        let request = JsonRpcMessage::request(id, method, Some(params));
        self.exchange(request).instrument(span).await
    }

    /// Send a request and return its result, or the error the reply carried
    pub async fn dispatch(&mut self, method: &str, params: Value) -> Result<Value, ClientError> {
        match self.dispatch_raw(method, params).await?.into_outcome() {
            Some(Ok(result)) => Ok(result),
            Some(Err(error)) => Err(ClientError::Rpc(error)),
            None => Err(ClientError::MalformedReply("reply is not a response".to_string())),
        }
    }

    /// Dispatch only if the server declared the capability at `path`
    pub async fn dispatch_gated(
        &mut self,
        path: &[&str],
        method: &str,
        params: Value,
    ) -> Result<Value, ClientError> {
        self.require_initialized()?;
        self.ensure_capability(path)?;
        self.dispatch(method, params).await
    }

    /// Send a notification; no reply is awaited
    pub async fn notify(&mut self, method: &str, params: Value) -> Result<(), ClientError> {
        self.require_initialized()?;
        let span = self.span.clone();
        self.send_notification(method, params).instrument(span).await
    }

    /// Ask the server to shut down.
    ///
    /// A server without a `shutdown` method counts as having acknowledged it.
    pub async fn shutdown(&mut self) -> Result<bool, ClientError> {
        let span = self.span.clone();
        let reply = self.dispatch_raw(methods::SHUTDOWN, json!({})).await?;

        span.in_scope(|| match reply.into_outcome() {
            Some(Ok(_)) => Ok(true),
            Some(Err(error)) if error.code == error_codes::METHOD_NOT_FOUND => {
                debug!("Server has no shutdown method");
                Ok(true)
            }
            Some(Err(error)) => {
                warn!("Server rejected shutdown: {}", error);
                Ok(false)
            }
            None => Ok(false),
        })
    }

    /// Tell the server to exit and close the transport. The client is unusable afterwards.
    pub async fn exit(&mut self) {
        let span = self.span.clone();
        self.exit_inner().instrument(span).await
    }

    async fn exit_inner(&mut self) {
        if self.state == ClientState::Exited {
            return;
        }

        if self.transport.is_some() {
            if let Err(err) = self.send_notification(methods::EXIT, json!({})).await {
                debug!("Exit notification not delivered: {}", err);
            }
        }
        if let Some(transport) = self.transport.take() {
            if let Err(err) = transport.close().await {
                warn!("Failed to close transport: {}", err);
            }
        }

        self.state = ClientState::Exited;
        info!("Client exited");
    }

    async fn send_notification(&self, method: &str, params: Value) -> Result<(), ClientError> {
        let transport = self.transport.as_ref().ok_or(ClientError::NoTransport)?;
        let line = JsonRpcMessage::notification(method, Some(params)).to_line()?;

        debug!(method, "Sending notification");
        match transport.send(&line).await {
            Ok(()) => Ok(()),
            Err(err) => Err(ClientError::Rpc(transport_error_object(&err))),
        }
    }

    /// Send one request and classify the reply
    ///
    /// Replies that answer an earlier message (a notification the server chose
    /// to answer, or an older request) are discarded, up to `MAX_STALE_REPLIES`.
    async fn exchange(&self, request: JsonRpcMessage) -> Result<JsonRpcMessage, ClientError> {
        let transport = self.transport.as_ref().ok_or(ClientError::NoTransport)?;
        let expected_id = request.id().cloned().unwrap_or(Value::Null);
        let line = request.to_line()?;

        let mut received = transport.send_and_receive(&line).await;
        let mut skipped = 0;
        let reply = loop {
            let raw = match received {
                Ok(raw) => raw,
                Err(err) => {
                    debug!("Transport unavailable: {}", err);
                    let error = transport_error_object(&err);
                    return Ok(JsonRpcMessage::error(
                        expected_id,
                        error.code,
                        &error.message,
                        error.data,
                    ));
                }
            };

            let reply = classify_reply(&raw, &expected_id)?;
            if skipped == MAX_STALE_REPLIES || !is_stale(&reply, &expected_id) {
                break reply;
            }

            debug!(received = ?reply.id(), "Discarding reply to an earlier message");
            skipped += 1;
            received = transport.receive().await;
        };

        if reply.id() != Some(&expected_id) {
            warn!(
                expected = %expected_id,
                received = ?reply.id(),
                "Reply id does not match the request"
            );
        }
        Ok(reply)
    }
}

/// Whether `reply` answers something sent before the request with `expected_id`.
///
/// A success with a null id can only answer a notification, and numeric ids
/// below the expected one belong to earlier requests. A null-id error is the
/// server failing to read the request, so it is kept as the answer.
fn is_stale(reply: &JsonRpcMessage, expected_id: &Value) -> bool {
    match reply.id() {
        Some(Value::Null) => reply.error_object().is_none(),
        Some(Value::Number(id)) => match (id.as_i64(), expected_id.as_i64()) {
            (Some(id), Some(expected)) => id < expected,
            _ => false,
        },
        _ => false,
    }
}

/// The error object standing in for a reply the transport could not obtain
fn transport_error_object(err: &TransportError) -> JsonRpcError {
    let kind = match err {
        TransportError::NotLaunched => "not_launched",
        TransportError::Closed => "closed",
        TransportError::Io(_) => "io",
        TransportError::NotFound(_) | TransportError::Launch { .. } => "launch",
    };
    JsonRpcError::new(
        error_codes::INTERNAL_ERROR,
        err.to_string(),
        Some(json!({ "kind": kind })),
    )
}

/// Turn raw reply text into a response envelope.
///
/// Text that is not JSON and objects that are not responses become
/// synthesized error replies; JSON that is not an object is rejected.
fn classify_reply(raw: &str, expected_id: &Value) -> Result<JsonRpcMessage, ClientError> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            return Ok(JsonRpcMessage::error(
                expected_id.clone(),
                error_codes::PARSE_ERROR,
                &format!("reply is not valid JSON: {err}"),
                Some(json!({ "reply": raw })),
            ))
        }
    };

    if !value.is_object() {
        return Err(ClientError::MalformedReply(format!(
            "expected a JSON object, got: {raw}"
        )));
    }

    match serde_json::from_value::<JsonRpcMessage>(value) {
        Ok(reply @ JsonRpcMessage::Response { .. }) => Ok(reply),
        _ => Ok(JsonRpcMessage::error(
            expected_id.clone(),
            error_codes::INVALID_REQUEST,
            "reply is not a JSON-RPC response",
            Some(json!({ "reply": raw })),
        )),
    }
}
