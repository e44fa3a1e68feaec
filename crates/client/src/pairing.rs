//! Relay discovery and pair negotiation
//!
//! 1. `HEAD <origin>/api/mte-relay` presenting any known client id. A relay
//!    answers with the wire header carrying the client id it assigns.
//! 2. `POST <origin>/api/mte-pair` with one entry per pair: a fresh pair id,
//!    encoder and decoder public keys, and a personalization string for
//!    each direction.
//! 3. The relay answers positionally with its own public keys ("secrets")
//!    and nonces. Our encoder talks to the relay's decoder and vice versa:
//!
//!    - encoder entropy = our encoder key × remote `decoderSecret`, nonce
//!      `decoderNonce`
//!    - decoder entropy = our decoder key × remote `encoderSecret`, nonce
//!      `encoderNonce`
//!
//! Pair ids are only enqueued after every pair's states are stored.

use mterelay_cache::client_id_key;
use mterelay_core::{
    ClientId, Origin, OriginStatus, PairId, RelayError, Result, Role, WireHeader, RELAY_HEADER,
};
use mterelay_crypto::{generate_personalization, KeyExchange};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::RelayContext;
use crate::transport::{HttpRequest, HttpResponse};

/// One entry of the pairing request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairRequest {
    pub pair_id: String,
    pub encoder_personalization_str: String,
    pub encoder_public_key: String,
    pub decoder_personalization_str: String,
    pub decoder_public_key: String,
}

/// One entry of the pairing response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairResponse {
    pub pair_id: String,
    pub encoder_secret: String,
    pub encoder_nonce: String,
    pub decoder_secret: String,
    pub decoder_nonce: String,
}

/// Key material for one pair until the relay answers
struct PendingPair {
    request: PairRequest,
    encoder_key: Box<dyn KeyExchange>,
    decoder_key: Box<dyn KeyExchange>,
}

impl PendingPair {
    fn generate(ctx: &RelayContext) -> Self {
        let factory = ctx.pool.factory();
        let encoder_key = factory.keypair();
        let decoder_key = factory.keypair();
        let request = PairRequest {
            pair_id: PairId::random().to_string(),
            encoder_personalization_str: generate_personalization(),
            encoder_public_key: encoder_key.public_key(),
            decoder_personalization_str: generate_personalization(),
            decoder_public_key: decoder_key.public_key(),
        };
        Self {
            request,
            encoder_key,
            decoder_key,
        }
    }
}

/// Agreed inputs for one pair's encoder and decoder
struct SessionMaterial {
    pair_id: PairId,
    encoder_entropy: [u8; 32],
    encoder_nonce: String,
    encoder_personalization: String,
    decoder_entropy: [u8; 32],
    decoder_nonce: String,
    decoder_personalization: String,
}

fn relay_client_id(response: &HttpResponse) -> Option<ClientId> {
    response
        .header(RELAY_HEADER)
        .and_then(|value| WireHeader::parse(value).ok())
        .and_then(|wire| wire.client_id)
}

/// Known client id for an origin, from memory or the store
async fn known_client_id(ctx: &RelayContext, origin: &Origin) -> Result<Option<ClientId>> {
    if let Some(client_id) = ctx.origins.client_id(origin) {
        return Ok(Some(client_id));
    }
    let stored = ctx.store.get(&client_id_key(origin)).await?;
    Ok(stored
        .and_then(|raw| String::from_utf8(raw).ok())
        .filter(|id| !id.is_empty())
        .map(ClientId::new))
}

/// Remember the client id a relay assigned
pub async fn store_client_id(ctx: &RelayContext, origin: &Origin, client_id: &ClientId) -> Result<()> {
    ctx.origins.set_client_id(origin, client_id.clone());
    ctx.store
        .set(&client_id_key(origin), client_id.as_str().as_bytes().to_vec())
        .await?;
    Ok(())
}

/// Check that an origin is a relay and obtain its client id
pub async fn probe(ctx: &RelayContext, origin: &Origin) -> Result<ClientId> {
    let client_id = known_client_id(ctx, origin).await?;

    let mut request = HttpRequest::new("HEAD", &ctx.relay_url(origin));
    request.headers.push((
        RELAY_HEADER.to_string(),
        WireHeader::probe(client_id).to_header_value(),
    ));

    let response = ctx.transport.send(request).await?;
    if !(200..300).contains(&response.status) {
        return Err(RelayError::OriginNotRelay(format!(
            "{} answered probe with status {}",
            origin, response.status
        )));
    }

    relay_client_id(&response).ok_or_else(|| {
        RelayError::OriginNotRelay(format!("{} did not return a relay client id", origin))
    })
}

/// Negotiate `count` new pairs and store their states.
///
/// Returns the new pair ids without enqueueing them.
pub async fn pair(
    ctx: &RelayContext,
    origin: &Origin,
    client_id: &ClientId,
    count: usize,
) -> Result<Vec<PairId>> {
    if count == 0 {
        return Ok(Vec::new());
    }

    let pending: Vec<PendingPair> = (0..count).map(|_| PendingPair::generate(ctx)).collect();
    let body = {
        let requests: Vec<&PairRequest> = pending.iter().map(|p| &p.request).collect();
        serde_json::to_vec(&requests).map_err(|e| RelayError::Serialization(e.to_string()))?
    };

    let wire = WireHeader::probe(Some(client_id.clone()));
    let mut request = HttpRequest::new("POST", &ctx.pair_url(origin));
    request.headers.push(("content-type".to_string(), "application/json".to_string()));
    request.headers.push((RELAY_HEADER.to_string(), wire.to_header_value()));
    request.body = Some(body);

    debug!("Requesting {} pairs from {}", count, origin);
    let response = ctx.transport.send(request).await?;
    if !(200..300).contains(&response.status) {
        return Err(RelayError::PairingFailed(format!(
            "{} answered pairing with status {}",
            origin, response.status
        )));
    }
    if let Some(client_id) = relay_client_id(&response) {
        store_client_id(ctx, origin, &client_id).await?;
    }

    let answers: Vec<PairResponse> = serde_json::from_slice(&response.body)
        .map_err(|e| RelayError::PairingFailed(format!("malformed pairing response: {}", e)))?;
    if answers.len() != pending.len() {
        return Err(RelayError::PairingFailed(format!(
            "requested {} pairs, relay answered {}",
            pending.len(),
            answers.len()
        )));
    }

    // Derive everything before the first await; key handles are not Sync
    let mut sessions = Vec::with_capacity(count);
    for (ours, theirs) in pending.into_iter().zip(answers) {
        if ours.request.pair_id != theirs.pair_id {
            return Err(RelayError::PairingFailed(format!(
                "expected pair {}, relay answered {}",
                ours.request.pair_id, theirs.pair_id
            )));
        }
        let encoder_entropy = ours.encoder_key.derive_shared(&theirs.decoder_secret)?;
        let decoder_entropy = ours.decoder_key.derive_shared(&theirs.encoder_secret)?;
        sessions.push(SessionMaterial {
            pair_id: PairId::new(theirs.pair_id),
            encoder_entropy,
            encoder_nonce: theirs.decoder_nonce,
            encoder_personalization: ours.request.encoder_personalization_str,
            decoder_entropy,
            decoder_nonce: theirs.encoder_nonce,
            decoder_personalization: ours.request.decoder_personalization_str,
        });
    }

    let runner = ctx.runner();
    let mode = ctx.settings.default_mode;
    let mut pair_ids = Vec::with_capacity(count);
    for session in sessions {
        runner
            .instantiate(
                Role::Encoder,
                mode,
                origin,
                &session.pair_id,
                &session.encoder_entropy,
                &session.encoder_nonce,
                &session.encoder_personalization,
            )
            .await?;
        runner
            .instantiate(
                Role::Decoder,
                mode,
                origin,
                &session.pair_id,
                &session.decoder_entropy,
                &session.decoder_nonce,
                &session.decoder_personalization,
            )
            .await?;
        pair_ids.push(session.pair_id);
    }

    Ok(pair_ids)
}

/// Full handshake for an origin the caller has the exclusive right to pair.
///
/// On success the origin is `paired` with `number_of_pairs` queued pairs;
/// any failure marks it `invalid`.
pub async fn validate_and_pair(ctx: &RelayContext, origin: &Origin) -> Result<()> {
    match handshake(ctx, origin).await {
        Ok(client_id) => {
            ctx.origins
                .set_status(origin, OriginStatus::Paired, Some(client_id));
            Ok(())
        }
        Err(e) => {
            warn!("Validation of {} failed: {}", origin, e);
            ctx.origins.set_status(origin, OriginStatus::Invalid, None);
            Err(e)
        }
    }
}

async fn handshake(ctx: &RelayContext, origin: &Origin) -> Result<ClientId> {
    let client_id = probe(ctx, origin).await?;
    store_client_id(ctx, origin, &client_id).await?;

    let pair_ids = pair(ctx, origin, &client_id, ctx.settings.number_of_pairs).await?;
    // A pairing response may have rotated the id
    let client_id = ctx.origins.client_id(origin).unwrap_or(client_id);

    ctx.pairs.clear(origin);
    for pair_id in pair_ids {
        ctx.pairs.enqueue(origin, pair_id);
    }
    info!(
        "Paired with {} ({} pairs, client {})",
        origin,
        ctx.pairs.len(origin),
        client_id
    );
    Ok(client_id)
}

/// Negotiate more pairs for an already paired origin.
///
/// Used to replace evicted pairs; does not change the origin status.
pub async fn pair_additional(ctx: &RelayContext, origin: &Origin, count: usize) -> Result<usize> {
    let client_id = ctx
        .origins
        .client_id(origin)
        .ok_or_else(|| RelayError::PairingFailed(format!("no client id for {}", origin)))?;

    let pair_ids = pair(ctx, origin, &client_id, count).await?;
    let added = pair_ids.len();
    for pair_id in pair_ids {
        debug!("Added pair {} for {}", pair_id.short(), origin);
        ctx.pairs.enqueue(origin, pair_id);
    }
    Ok(added)
}
