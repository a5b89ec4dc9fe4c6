//! Relay facade
//!
//! `Relay` is the command surface a host talks to. It validates arguments
//! before anything touches the pool or the network, then hands the work to
//! the settings store, the pairing pool, or the transfer coordinator.
//! Asynchronous notifications are delivered on the event receiver returned
//! by [`Relay::new`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use relay_common::StreamHandle;
use relay_common::body::RequestBody;
use relay_common::protocol::{
    DataTaskArgs, DataTaskResponse, DownloadArgs, RelayEvent, SettingsArgs, UploadArgs,
    relay_response_message,
};
use relay_common::validators::{
    HttpMethod, relay_origin, split_encrypted_headers, validate_download_location,
    validate_http_method, validate_relay_url,
};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, instrument, warn};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::pairing::{PairingEngine, PairingPool};
use crate::settings::{Settings, SettingsStore};
use crate::streams::StreamRegistry;
use crate::transfers::{EventSender, TransferContext, TransferCoordinator};
use crate::transport::{RelayRequest, RelayTransport};

const INITIALIZED_MESSAGE: &str = "Relay initialized";

/// Streaming transfer and session-settings manager
pub struct Relay {
    engine: Arc<dyn PairingEngine>,
    pool: Arc<PairingPool>,
    settings: SettingsStore,
    transfers: TransferCoordinator,
    events: EventSender,
    init_lock: Mutex<()>,
    initialized: AtomicBool,
}

impl Relay {
    /// Build a relay around the external engine and transport
    ///
    /// # Returns
    /// The relay and the receiver its events are delivered on.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Settings` if `settings` holds an out-of-range
    /// value.
    pub fn new(
        engine: Arc<dyn PairingEngine>,
        transport: Arc<dyn RelayTransport>,
        settings: Settings,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RelayEvent>), RelayError> {
        check_settings(&settings)?;

        let pool = PairingPool::new(
            Arc::clone(&engine),
            settings.pair_pool_size,
            settings.persist_pairs,
        );
        let store = SettingsStore::new(settings, Arc::clone(&pool));
        let (events, receiver) = mpsc::unbounded_channel();

        let ctx = TransferContext {
            pool: Arc::clone(&pool),
            engine: Arc::clone(&engine),
            transport,
            registry: Arc::new(StreamRegistry::new()),
            settings: store.subscribe(),
            events: events.clone(),
        };

        let relay = Self {
            engine,
            pool,
            settings: store,
            transfers: TransferCoordinator::new(ctx),
            events,
            init_lock: Mutex::new(()),
            initialized: AtomicBool::new(false),
        };
        Ok((relay, receiver))
    }

    /// Build a relay with the session settings from a config file
    ///
    /// # Errors
    ///
    /// See [`Relay::new`].
    pub fn from_config(
        engine: Arc<dyn PairingEngine>,
        transport: Arc<dyn RelayTransport>,
        config: &RelayConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RelayEvent>), RelayError> {
        Self::new(engine, transport, config.settings)
    }

    /// `"<os> <arch>"` of the running process
    pub fn platform_version(&self) -> String {
        format!("{} {}", std::env::consts::OS, std::env::consts::ARCH)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Initialize the pairing engine
    ///
    /// Only the first successful call does anything; later calls return
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Init` if the engine fails to initialize. A
    /// later call may try again.
    pub async fn initialize_relay(&self) -> Result<(), RelayError> {
        if self.is_initialized() {
            return Ok(());
        }
        let _init = self.init_lock.lock().await;
        if self.is_initialized() {
            return Ok(());
        }

        if let Err(e) = self.engine.initialize().await {
            let message = e.to_string();
            warn!(error = %message, "relay initialization failed");
            self.emit_message(false, "Relay initialization failed", Some(&message));
            return Err(RelayError::Init(message));
        }

        self.initialized.store(true, Ordering::Release);
        info!("relay initialized");
        self.emit_message(true, INITIALIZED_MESSAGE, None);
        Ok(())
    }

    /// Send one request through the relay and return the whole response
    ///
    /// # Errors
    ///
    /// `Init` before initialization, `InvalidArguments` for a bad URL or
    /// method or a missing body, and otherwise whatever the exchange
    /// reports.
    #[instrument(skip_all, fields(method = %args.method))]
    pub async fn data_task(&self, args: DataTaskArgs) -> Result<DataTaskResponse, RelayError> {
        self.require_initialized()?;
        let method = parse_method(&args.method)?;
        let body = args
            .body
            .filter(|body| !body.is_empty())
            .map(RequestBody::into_bytes)
            .map(Bytes::from);
        if method.requires_body() && body.is_none() {
            return Err(RelayError::InvalidArguments(format!(
                "{method} requests require a body"
            )));
        }

        let request = build_request(
            &args.url,
            method,
            args.headers,
            args.headers_to_encrypt,
            body,
            args.pathname_prefix,
        )?;
        self.transfers.data_task(request).await
    }

    /// Open a streamed upload
    ///
    /// The body is supplied afterwards with [`Relay::write_to_stream`] and
    /// finished with [`Relay::close_stream`].
    ///
    /// # Errors
    ///
    /// `Init` before initialization, `InvalidArguments` for a bad URL or a
    /// method other than POST.
    pub fn upload_file_stream(&self, args: UploadArgs) -> Result<StreamHandle, RelayError> {
        self.require_initialized()?;
        let method = parse_method(&args.method)?;
        if method != HttpMethod::Post {
            return Err(RelayError::InvalidArguments(format!(
                "streamed uploads must use POST, not {method}"
            )));
        }
        let request = build_request(
            &args.url,
            method,
            args.headers,
            args.headers_to_encrypt,
            None,
            args.pathname_prefix,
        )?;
        let total_bytes = args.total_bytes.or_else(|| request.content_length());
        Ok(self.transfers.start_upload(request, total_bytes))
    }

    /// Submit one chunk to an open upload, waiting until it is drained
    ///
    /// # Errors
    ///
    /// `Init` before initialization, `UnknownStream` for a handle that is
    /// not open, `InvalidArguments` for a download handle, or the error
    /// that stopped the upload.
    pub async fn write_to_stream(
        &self,
        handle: StreamHandle,
        data: Bytes,
    ) -> Result<u64, RelayError> {
        self.require_initialized()?;
        self.transfers.write(handle, data).await
    }

    /// Finish an upload or cancel a download
    ///
    /// Returns once the stream's terminal event has been emitted.
    ///
    /// # Errors
    ///
    /// `Init` before initialization, `UnknownStream` for a handle that is
    /// not open.
    pub async fn close_stream(&self, handle: StreamHandle) -> Result<(), RelayError> {
        self.require_initialized()?;
        self.transfers.close(handle).await
    }

    /// Open a streamed download into `downloadLocation`
    ///
    /// # Errors
    ///
    /// `Init` before initialization, `InvalidArguments` for a bad URL,
    /// method, or download location.
    pub fn download_file_stream(&self, args: DownloadArgs) -> Result<StreamHandle, RelayError> {
        self.require_initialized()?;
        let destination = validate_download_location(&args.download_location)
            .map_err(|e| RelayError::InvalidArguments(e.to_string()))?;
        let method = parse_method(&args.method)?;
        let request = build_request(
            &args.url,
            method,
            args.headers,
            args.headers_to_encrypt,
            None,
            args.pathname_prefix,
        )?;
        Ok(self.transfers.start_download(request, destination))
    }

    /// Discard the pairings held for `url`'s relay server and handshake
    /// again
    ///
    /// # Errors
    ///
    /// `Init` before initialization, `InvalidArguments` for a bad URL,
    /// `RePairFailed` if the handshake could not be completed.
    #[instrument(skip(self))]
    pub async fn re_pair(&self, url: &str) -> Result<String, RelayError> {
        self.require_initialized()?;
        let parsed =
            validate_relay_url(url).map_err(|e| RelayError::InvalidArguments(e.to_string()))?;
        let origin = relay_origin(&parsed);

        self.pool
            .re_pair(&origin)
            .await
            .map_err(|e| RelayError::RePairFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        info!(origin = %origin, "re-paired");
        Ok(format!("Successfully Re-Paired with {url}"))
    }

    /// Apply a settings patch and describe what changed
    ///
    /// # Errors
    ///
    /// `Init` before initialization, `Settings` for out-of-range values.
    pub fn adjust_relay_settings(&self, patch: &SettingsArgs) -> Result<String, RelayError> {
        self.require_initialized()?;
        let outcome = self.settings.apply(patch)?;
        Ok(outcome.summary())
    }

    /// Current settings snapshot
    pub fn settings(&self) -> Settings {
        self.settings.get()
    }

    /// Open streams
    pub fn streams(&self) -> &Arc<StreamRegistry> {
        self.transfers.registry()
    }

    /// Close every open stream, then tear the pool down
    ///
    /// Pairings are forgotten through the engine unless `persistPairs` is
    /// set.
    pub async fn shutdown(&self) {
        self.transfers.close_all().await;
        self.pool.teardown();
        info!(persist_pairs = self.pool.persist(), "relay shut down");
    }

    fn require_initialized(&self) -> Result<(), RelayError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(RelayError::Init(
                "relay is not initialized; call initializeRelay first".to_string(),
            ))
        }
    }

    fn emit_message(&self, success: bool, message: &str, error: Option<&str>) {
        let _ = self.events.send(RelayEvent::RelayResponseMessage {
            message: relay_response_message(success, message, error),
        });
    }
}

fn check_settings(settings: &Settings) -> Result<(), RelayError> {
    settings
        .check()
        .map_err(|(field, e)| RelayError::Settings(format!("{field} {e}")))
}

fn parse_method(method: &str) -> Result<HttpMethod, RelayError> {
    validate_http_method(method).map_err(|e| RelayError::InvalidArguments(format!("{e}: {method}")))
}

/// Validate the URL and assemble a request
///
/// `headersToEncrypt` names that match no header are kept; only their
/// count is logged.
fn build_request(
    url: &str,
    method: HttpMethod,
    headers: BTreeMap<String, String>,
    headers_to_encrypt: Vec<String>,
    body: Option<Bytes>,
    pathname_prefix: Option<String>,
) -> Result<RelayRequest, RelayError> {
    let url = validate_relay_url(url).map_err(|e| RelayError::InvalidArguments(e.to_string()))?;

    let names = split_encrypted_headers(&headers, &headers_to_encrypt);
    if names.unmatched > 0 {
        debug!(
            matched = names.matched,
            unmatched = names.unmatched,
            "headersToEncrypt names headers the request does not carry"
        );
    }

    Ok(RelayRequest {
        url,
        method,
        headers,
        headers_to_encrypt,
        body,
        pathname_prefix,
    })
}
