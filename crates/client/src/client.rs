//! Relay client
//!
//! Per request: resolve the origin status (validating and pairing on first
//! contact, waiting while someone else pairs), take the next pair, encode,
//! send, classify relay errors and decode. Pair-specific failures evict the
//! pair and start a background replacement; a rejected client id sends the
//! origin back through validation. Either way the request is retried once.
//! A paired origin whose queue ran dry is paired again before the request
//! goes out.

use std::sync::Arc;
use std::time::Duration;

use mterelay_cache::{client_id_key, state_key, MemoryStore, StateStore};
use mterelay_core::{ClientId, Origin, OriginStatus, PairId, Recovery, RelayError, Result, Role};
use mterelay_crypto::{EngineFactory, SoftwareEngineFactory};
use mterelay_settings::RelaySettings;
use tracing::{debug, info, warn};

use crate::codec::{decode_response, encode_request};
use crate::context::RelayContext;
use crate::origin::OriginSnapshot;
use crate::pairing::{pair_additional, store_client_id, validate_and_pair};
use crate::payload::Payload;
use crate::request::{PreparedRequest, RelayRequest};
use crate::response::RelayResponse;
use crate::transport::{ReqwestTransport, Transport};

/// Attempts per request: the first try plus one retry
const MAX_ATTEMPTS: u32 = 2;

/// Failure of one attempt, with the pair and client id it used if it got
/// that far
struct AttemptError {
    error: RelayError,
    pair_id: Option<PairId>,
    client_id: Option<ClientId>,
}

impl AttemptError {
    fn origin(error: RelayError) -> Self {
        Self {
            error,
            pair_id: None,
            client_id: None,
        }
    }

    fn pair(error: RelayError, pair_id: &PairId, client_id: Option<&ClientId>) -> Self {
        Self {
            error,
            pair_id: Some(pair_id.clone()),
            client_id: client_id.cloned(),
        }
    }
}

/// Builder for [`RelayClient`]
#[derive(Default)]
pub struct RelayClientBuilder {
    settings: RelaySettings,
    store: Option<Arc<dyn StateStore>>,
    factory: Option<Arc<dyn EngineFactory>>,
    transport: Option<Arc<dyn Transport>>,
}

impl RelayClientBuilder {
    pub fn settings(mut self, settings: RelaySettings) -> Self {
        self.settings = settings;
        self
    }

    /// State backend, in-memory by default
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn engine_factory(mut self, factory: Arc<dyn EngineFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// HTTP transport, reqwest by default
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<RelayClient> {
        self.settings.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(Duration::from_secs(
                self.settings.request_timeout_secs,
            ))?),
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn StateStore>);
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(SoftwareEngineFactory::new()) as Arc<dyn EngineFactory>);

        Ok(RelayClient {
            ctx: Arc::new(RelayContext::new(self.settings, factory, store, transport)),
        })
    }
}

/// Entry point for sending requests through relays.
///
/// Cheap to clone; clones share origins, pairs and session state.
#[derive(Clone)]
pub struct RelayClient {
    ctx: Arc<RelayContext>,
}

impl RelayClient {
    /// Client with default settings, memory store and reqwest transport
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> RelayClientBuilder {
        RelayClientBuilder::default()
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.ctx.settings
    }

    pub fn context(&self) -> &Arc<RelayContext> {
        &self.ctx
    }

    pub async fn get(&self, url: &str) -> Result<RelayResponse> {
        self.request(RelayRequest::get(url)).await
    }

    pub async fn post(&self, url: &str, payload: impl Into<Payload>) -> Result<RelayResponse> {
        self.request(RelayRequest::post(url).body(payload)).await
    }

    /// Send a request, retrying once after a recoverable relay error
    pub async fn request(&self, request: RelayRequest) -> Result<RelayResponse> {
        let prepared = request.prepare(&self.ctx.settings)?;
        let origin = prepared.origin.clone();

        let mut revalidate = false;
        let mut attempt = 1;
        loop {
            let failure = match self.attempt(&prepared, revalidate).await {
                Ok(response) => return Ok(response),
                Err(failure) => failure,
            };
            revalidate = false;

            let recovery = failure.error.recovery();
            if recovery == Recovery::None {
                return Err(failure.error);
            }
            if let (Recovery::Pair, Some(pair_id)) = (recovery, &failure.pair_id) {
                self.replace_pair(&origin, pair_id);
            }
            if attempt >= MAX_ATTEMPTS {
                warn!("{} {} failed after retry: {}", prepared.method, origin, failure.error);
                return Err(RelayError::RetryExhausted {
                    source: Box::new(failure.error),
                });
            }
            if recovery == Recovery::Origin {
                revalidate = self
                    .begin_revalidation(&origin, failure.client_id.as_ref())
                    .await?;
            }

            info!(
                "Retrying {} {} after: {}",
                prepared.method, origin, failure.error
            );
            attempt += 1;
        }
    }

    async fn attempt(
        &self,
        request: &PreparedRequest,
        revalidate: bool,
    ) -> std::result::Result<RelayResponse, AttemptError> {
        let ctx = &self.ctx;
        let origin = &request.origin;

        self.ensure_paired(origin, revalidate)
            .await
            .map_err(AttemptError::origin)?;
        let pair_id = match ctx.pairs.acquire_next(origin) {
            Ok(pair_id) => pair_id,
            Err(RelayError::QueueEmpty(_)) => {
                self.refill_pairs(origin)
                    .await
                    .map_err(AttemptError::origin)?;
                ctx.pairs.acquire_next(origin).map_err(AttemptError::origin)?
            }
            Err(e) => return Err(AttemptError::origin(e)),
        };
        let _lease = ctx.locks.lease(origin, &pair_id).await;
        let client_id = ctx.origins.client_id(origin);
        let runner = ctx.runner();

        let wire_request = encode_request(
            &runner,
            request,
            client_id.as_ref(),
            &pair_id,
            ctx.settings.max_url_length,
        )
        .await
        .map_err(|e| AttemptError::pair(e, &pair_id, client_id.as_ref()))?;

        let response = ctx
            .transport
            .send(wire_request)
            .await
            .map_err(AttemptError::origin)?;

        let rejection =
            RelayError::from_status(response.status, &String::from_utf8_lossy(&response.body));
        if let Some(error) = rejection {
            debug!(
                "Relay {} rejected pair {}: {} ({})",
                origin,
                pair_id.short(),
                response.status,
                error
            );
            return Err(AttemptError::pair(error, &pair_id, client_id.as_ref()));
        }

        let response = decode_response(&runner, origin, response)
            .await
            .map_err(|e| AttemptError::pair(e, &pair_id, client_id.as_ref()))?;

        if let Some(reported) = response.client_id() {
            if client_id.as_ref() != Some(reported) {
                store_client_id(ctx, origin, reported)
                    .await
                    .map_err(AttemptError::origin)?;
            }
        }
        Ok(response)
    }

    async fn ensure_paired(&self, origin: &Origin, revalidate: bool) -> Result<()> {
        if revalidate {
            return validate_and_pair(&self.ctx, origin).await;
        }
        match self.ctx.origins.get_status(origin) {
            OriginStatus::Paired => Ok(()),
            OriginStatus::Validating => validate_and_pair(&self.ctx, origin).await,
            OriginStatus::Invalid => Err(RelayError::OriginInvalid(origin.to_string())),
            OriginStatus::Pending | OriginStatus::Unknown => self.wait_for_pairing(origin).await,
        }
    }

    /// Poll with linearly growing delays until another caller finishes pairing
    async fn wait_for_pairing(&self, origin: &Origin) -> Result<()> {
        let interval = Duration::from_millis(self.ctx.settings.poll_interval_ms);
        for i in 1..=self.ctx.settings.poll_attempts {
            tokio::time::sleep(interval * i).await;
            match self.ctx.origins.peek(origin) {
                OriginStatus::Paired => return Ok(()),
                OriginStatus::Invalid => return Err(RelayError::OriginInvalid(origin.to_string())),
                _ => {}
            }
        }
        Err(RelayError::PendingTimeout(origin.to_string()))
    }

    /// Negotiate a full set of pairs for a paired origin with an empty queue.
    ///
    /// One caller claims the work and holds the origin `pending`; everyone
    /// else waits for it like a first-contact pairing.
    async fn refill_pairs(&self, origin: &Origin) -> Result<()> {
        let ctx = &self.ctx;
        if !ctx.origins.claim_repair(origin) {
            return self.ensure_paired(origin, false).await;
        }
        // A background replacement may have landed in the meantime
        if !ctx.pairs.is_empty(origin) {
            ctx.origins.set_status(origin, OriginStatus::Paired, None);
            return Ok(());
        }

        match pair_additional(ctx, origin, ctx.settings.number_of_pairs).await {
            Ok(added) => {
                info!("Re-paired {} ({} pairs)", origin, added);
                ctx.origins.set_status(origin, OriginStatus::Paired, None);
                Ok(())
            }
            Err(e) => {
                warn!("Re-pairing {} failed, validating again: {}", origin, e);
                validate_and_pair(ctx, origin).await
            }
        }
    }

    /// Evict a failed pair and negotiate one replacement in the background
    fn replace_pair(&self, origin: &Origin, pair_id: &PairId) {
        if !self.ctx.pairs.evict(origin, pair_id) {
            // Someone else already evicted and replaced it
            return;
        }

        let ctx = self.ctx.clone();
        let origin = origin.clone();
        let pair_id = pair_id.clone();
        tokio::spawn(async move {
            for role in [Role::Encoder, Role::Decoder] {
                if let Err(e) = ctx.store.delete(&state_key(role, &origin, &pair_id)).await {
                    debug!("Could not drop state of pair {}: {}", pair_id.short(), e);
                }
            }
            match pair_additional(&ctx, &origin, 1).await {
                Ok(_) => debug!("Replaced pair {} for {}", pair_id.short(), origin),
                Err(e) => warn!("Failed to replace pair {} for {}: {}", pair_id.short(), origin, e),
            }
        });
    }

    /// Drop the client id and pairs after the relay rejected the id.
    ///
    /// Returns true when this caller must run the new handshake.
    async fn begin_revalidation(&self, origin: &Origin, rejected: Option<&ClientId>) -> Result<bool> {
        if !self.ctx.origins.claim_revalidation(origin, rejected) {
            return Ok(false);
        }
        let dropped = self.ctx.pairs.clear(origin);
        debug!("Dropped {} pairs for {}", dropped.len(), origin);
        self.ctx.store.delete(&client_id_key(origin)).await?;
        Ok(true)
    }

    /// Pairs currently queued for an origin
    pub fn pair_count(&self, origin: &str) -> Result<usize> {
        Ok(self.ctx.pairs.len(&Origin::parse(origin)?))
    }

    pub fn origin_status(&self, origin: &str) -> Result<OriginStatus> {
        Ok(self.ctx.origins.peek(&Origin::parse(origin)?))
    }

    pub fn origins(&self) -> Vec<OriginSnapshot> {
        self.ctx.origins.snapshot()
    }

    /// Forget everything about an origin; the next request validates it again
    pub async fn revalidate(&self, origin: &str) -> Result<()> {
        let origin = Origin::parse(origin)?;
        self.ctx.origins.reset(&origin);
        self.ctx.pairs.clear(&origin);
        self.ctx.store.delete(&client_id_key(&origin)).await?;
        info!("Reset {}", origin);
        Ok(())
    }
}
