//! Request/response codec
//!
//! Outbound, a plaintext request becomes up to three engine items, always in
//! this order: route + query, header bag (JSON), body. They are encoded in a
//! single pass over the pair's encoder state and reassembled:
//!
//! - the path becomes one segment holding the encoded route (base64url)
//! - the header bag travels base64 encoded in `x-mte-relay-eh`
//! - the body is replaced by the encoded bytes, typed octet-stream
//! - `x-mte-relay` describes what was encoded
//!
//! Inbound reverses this with the decoder state of the pair named in the
//! response header.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};
use base64::Engine;
use mterelay_cache::{state_key, StateStore};
use mterelay_core::{
    ClientId, Mode, Origin, PairId, RelayError, Result, Role, WireHeader, ENCODED_HEADERS_HEADER,
    OCTET_STREAM, RELAY_HEADER,
};
use mterelay_crypto::EnginePool;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::request::PreparedRequest;
use crate::response::RelayResponse;
use crate::transport::{HttpRequest, HttpResponse};

const CONTENT_TYPE: &str = "content-type";

/// Async locks keyed by state key or pair.
///
/// A pair's encoder and decoder counters only move forward, so two requests
/// that land on the same pair must reach the relay and come back in the
/// order they were encoded. Callers hold a pair lease for the whole
/// exchange; every engine pass additionally locks its state key.
#[derive(Default)]
pub struct StateLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl StateLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            if !locks.contains_key(key) {
                // Drop locks nobody holds or waits on
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Exclusive use of a pair for one request and its response
    pub async fn lease(&self, origin: &Origin, pair_id: &PairId) -> OwnedMutexGuard<()> {
        self.lock(&format!("pair.{}.{}", origin, pair_id)).await
    }

    /// Keys currently tracked
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drives one engine pass over a stored session state.
///
/// The state key stays locked from checkout to write-back, so passes on the
/// same pair run one after another. A state missing from the store is
/// `StateNotFound`. After a failed transform the state is not written back.
pub struct SessionRunner<'a> {
    pool: &'a EnginePool,
    store: &'a dyn StateStore,
    locks: &'a StateLocks,
}

impl<'a> SessionRunner<'a> {
    pub fn new(pool: &'a EnginePool, store: &'a dyn StateStore, locks: &'a StateLocks) -> Self {
        Self { pool, store, locks }
    }

    /// Bind a fresh handle to new session material and store its state
    #[allow(clippy::too_many_arguments)]
    pub async fn instantiate(
        &self,
        role: Role,
        mode: Mode,
        origin: &Origin,
        pair_id: &PairId,
        entropy: &[u8],
        nonce: &str,
        personalization: &str,
    ) -> Result<()> {
        let state = {
            let mut engine = self.pool.acquire(role, mode);
            engine.instantiate(entropy, nonce, personalization)?;
            engine.save_state()?
        };
        self.store
            .set(&state_key(role, origin, pair_id), state)
            .await?;
        Ok(())
    }

    pub async fn encode(
        &self,
        origin: &Origin,
        pair_id: &PairId,
        mode: Mode,
        items: &[&[u8]],
    ) -> Result<Vec<Vec<u8>>> {
        self.run(Role::Encoder, origin, pair_id, mode, items).await
    }

    pub async fn decode(
        &self,
        origin: &Origin,
        pair_id: &PairId,
        mode: Mode,
        items: &[&[u8]],
    ) -> Result<Vec<Vec<u8>>> {
        self.run(Role::Decoder, origin, pair_id, mode, items).await
    }

    async fn run(
        &self,
        role: Role,
        origin: &Origin,
        pair_id: &PairId,
        mode: Mode,
        items: &[&[u8]],
    ) -> Result<Vec<Vec<u8>>> {
        let key = state_key(role, origin, pair_id);
        let _guard = self.locks.lock(&key).await;
        let state = self
            .store
            .take(&key)
            .await?
            .ok_or_else(|| RelayError::StateNotFound(key.clone()))?;

        let (outputs, state) = self.transform(role, mode, &state, items)?;
        self.store.set(&key, state).await?;
        Ok(outputs)
    }

    fn transform(
        &self,
        role: Role,
        mode: Mode,
        state: &[u8],
        items: &[&[u8]],
    ) -> Result<(Vec<Vec<u8>>, Vec<u8>)> {
        let mut engine = self.pool.acquire(role, mode);
        engine.restore_state(state)?;

        let mut outputs = Vec::with_capacity(items.len());
        for item in items {
            let output = match role {
                Role::Encoder => engine.encode(item)?,
                Role::Decoder => engine.decode(item)?,
            };
            outputs.push(output);
        }

        let state = engine.save_state()?;
        Ok((outputs, state))
    }
}

fn next_item(items: &mut impl Iterator<Item = Vec<u8>>, what: &str) -> Result<Vec<u8>> {
    items
        .next()
        .ok_or_else(|| RelayError::EncodeFailed(format!("engine returned no {}", what)))
}

/// Turn a plaintext request into its relay wire form
pub async fn encode_request(
    runner: &SessionRunner<'_>,
    request: &PreparedRequest,
    client_id: Option<&ClientId>,
    pair_id: &PairId,
    max_url_length: usize,
) -> Result<HttpRequest> {
    let options = &request.options;
    let body = request.body.as_deref().filter(|b| !b.is_empty());
    let encode_body = options.encode_body && body.is_some();

    let mut bag = BTreeMap::new();
    let mut clear = Vec::new();
    for (name, value) in &request.headers {
        if options.encode_headers.selects(name) {
            bag.insert(name.clone(), value.clone());
        } else {
            clear.push((name.clone(), value.clone()));
        }
    }
    // The relay restores the original content type from the bag
    if encode_body || !bag.is_empty() {
        if let Some(pos) = clear.iter().position(|(name, _)| name == CONTENT_TYPE) {
            let (name, value) = clear.remove(pos);
            bag.insert(name, value);
        }
    }

    let route = request.route();
    let bag_json = if bag.is_empty() {
        None
    } else {
        Some(serde_json::to_vec(&bag).map_err(|e| RelayError::Serialization(e.to_string()))?)
    };

    let mut items: Vec<&[u8]> = Vec::with_capacity(3);
    if options.encode_url {
        items.push(route.as_bytes());
    }
    if let Some(bag_json) = &bag_json {
        items.push(bag_json);
    }
    if let (true, Some(body)) = (encode_body, body) {
        items.push(body);
    }

    let encoded = if items.is_empty() {
        Vec::new()
    } else {
        runner
            .encode(&request.origin, pair_id, options.mode, &items)
            .await?
    };
    let mut encoded = encoded.into_iter();

    let mut url = request.url.clone();
    url.set_fragment(None);
    if options.encode_url {
        let segment = URL_SAFE_NO_PAD.encode(next_item(&mut encoded, "route")?);
        url.set_query(None);
        url.path_segments_mut()
            .map_err(|_| RelayError::InvalidInput(format!("URL has no path: {}", request.url)))?
            .clear()
            .push(&segment);
        let length = url.as_str().len();
        if length > max_url_length {
            return Err(RelayError::UrlTooLong {
                length,
                limit: max_url_length,
            });
        }
    }

    let mut wire = WireHeader::request(client_id.cloned(), pair_id.clone(), options.mode);
    wire.url_encoded = options.encode_url;

    let mut out = HttpRequest::new(&request.method, url.as_str());
    out.headers = clear;
    if bag_json.is_some() {
        wire.headers_encoded = true;
        let bag = BASE64.encode(next_item(&mut encoded, "header bag")?);
        out.headers.push((ENCODED_HEADERS_HEADER.to_string(), bag));
    }
    if encode_body {
        wire.body_encoded = true;
        out.headers.push((CONTENT_TYPE.to_string(), OCTET_STREAM.to_string()));
        out.body = Some(next_item(&mut encoded, "body")?);
    } else {
        out.body = body.map(<[u8]>::to_vec);
    }
    out.headers.push((RELAY_HEADER.to_string(), wire.to_header_value()));

    debug!(
        "Encoded {} {} with pair {} ({})",
        request.method,
        request.origin,
        pair_id.short(),
        wire
    );
    Ok(out)
}

/// Strip the relay layer from a response
pub async fn decode_response(
    runner: &SessionRunner<'_>,
    origin: &Origin,
    response: HttpResponse,
) -> Result<RelayResponse> {
    let HttpResponse {
        status,
        mut headers,
        mut body,
    } = response;

    let raw = headers
        .remove(RELAY_HEADER)
        .ok_or_else(|| RelayError::InvalidHeader("response carries no relay header".to_string()))?;
    let wire = WireHeader::parse(&raw)?;
    let encoded_bag = headers.remove(ENCODED_HEADERS_HEADER);

    let decode_body = wire.body_encoded && !body.is_empty();
    if wire.headers_encoded || decode_body {
        let pair_id = wire.pair_id.as_ref().ok_or_else(|| {
            RelayError::InvalidHeader("encoded response without a pair id".to_string())
        })?;

        let bag = match (wire.headers_encoded, encoded_bag) {
            (false, _) => None,
            (true, Some(bag)) => Some(BASE64.decode(bag.trim()).map_err(|_| {
                RelayError::InvalidHeader(format!("{} is not base64", ENCODED_HEADERS_HEADER))
            })?),
            (true, None) => {
                return Err(RelayError::InvalidHeader(format!(
                    "headers flagged as encoded but {} is missing",
                    ENCODED_HEADERS_HEADER
                )))
            }
        };

        let mut items: Vec<&[u8]> = Vec::with_capacity(2);
        if let Some(bag) = &bag {
            items.push(bag);
        }
        if decode_body {
            items.push(&body);
        }

        let mut decoded = runner
            .decode(origin, pair_id, wire.mode, &items)
            .await?
            .into_iter();

        if decode_body {
            // Drop the octet-stream type; the bag carries the real one
            headers.remove(CONTENT_TYPE);
        }
        if bag.is_some() {
            let plain = next_item(&mut decoded, "header bag")?;
            let restored: BTreeMap<String, String> = serde_json::from_slice(&plain)
                .map_err(|e| RelayError::DecodeFailed(format!("header bag: {}", e)))?;
            for (name, value) in restored {
                headers.insert(name.to_ascii_lowercase(), value);
            }
        }
        if decode_body {
            body = next_item(&mut decoded, "body")?;
        }
    }

    Ok(RelayResponse {
        status,
        headers,
        body,
        client_id: wire.client_id,
        pair_id: wire.pair_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RelayRequest;
    use mterelay_cache::MemoryStore;
    use mterelay_crypto::{SessionEngine, SoftwareEngine, SoftwareEngineFactory};
    use mterelay_settings::{HeaderSelection, RelaySettings};
    use serde_json::json;
    use std::time::Duration;

    const ORIGIN: &str = "https://relay.test";

    struct Fixture {
        pool: EnginePool,
        store: MemoryStore,
        locks: StateLocks,
        origin: Origin,
        pair: PairId,
        /// Relay side: decodes what the client encodes
        server_decoder: SoftwareEngine,
        /// Relay side: encodes what the client decodes
        server_encoder: SoftwareEngine,
    }

    impl Fixture {
        async fn new(mode: Mode) -> Self {
            let pool = EnginePool::new(Arc::new(SoftwareEngineFactory::new()), 2);
            let store = MemoryStore::new();
            let locks = StateLocks::new();
            let origin = Origin::new(ORIGIN).unwrap();
            let pair = PairId::new("P1");

            {
                let runner = SessionRunner::new(&pool, &store, &locks);
                runner
                    .instantiate(Role::Encoder, mode, &origin, &pair, &[1u8; 32], "11", "enc")
                    .await
                    .unwrap();
                runner
                    .instantiate(Role::Decoder, mode, &origin, &pair, &[2u8; 32], "22", "dec")
                    .await
                    .unwrap();
            }

            let mut server_decoder = SoftwareEngine::new(Role::Decoder, mode);
            server_decoder.instantiate(&[1u8; 32], "11", "enc").unwrap();
            let mut server_encoder = SoftwareEngine::new(Role::Encoder, mode);
            server_encoder.instantiate(&[2u8; 32], "22", "dec").unwrap();

            Self {
                pool,
                store,
                locks,
                origin,
                pair,
                server_decoder,
                server_encoder,
            }
        }

        fn runner(&self) -> SessionRunner<'_> {
            SessionRunner::new(&self.pool, &self.store, &self.locks)
        }

        async fn encode(&self, request: RelayRequest) -> Result<HttpRequest> {
            let prepared = request.prepare(&RelaySettings::default())?;
            encode_request(
                &self.runner(),
                &prepared,
                Some(&ClientId::new("C1")),
                &self.pair,
                2048,
            )
            .await
        }
    }

    fn wire_of(request: &HttpRequest) -> WireHeader {
        WireHeader::parse(request.header(RELAY_HEADER).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_encode_everything() {
        let mut fx = Fixture::new(Mode::Mke).await;
        let request = RelayRequest::post(&format!("{}/api/items?x=1", ORIGIN))
            .header("Authorization", "Bearer t")
            .json(json!({"a": 1}));
        let out = fx.encode(request).await.unwrap();

        let wire = wire_of(&out);
        assert_eq!(wire.to_string(), "C1,P1,1,1,1,1");
        assert_eq!(out.header("content-type"), Some(OCTET_STREAM));
        assert_eq!(out.header("authorization"), None);

        // Single path segment, no query
        let url = reqwest::Url::parse(&out.url).unwrap();
        assert_eq!(url.path_segments().unwrap().count(), 1);
        assert!(url.query().is_none());

        // Items decode in order on the relay side
        let segment = url.path().trim_start_matches('/');
        let route = fx
            .server_decoder
            .decode(&URL_SAFE_NO_PAD.decode(segment).unwrap())
            .unwrap();
        assert_eq!(route, b"/api/items?x=1");

        let bag = BASE64.decode(out.header(ENCODED_HEADERS_HEADER).unwrap()).unwrap();
        let bag: HashMap<String, String> =
            serde_json::from_slice(&fx.server_decoder.decode(&bag).unwrap()).unwrap();
        assert_eq!(bag["authorization"], "Bearer t");
        assert_eq!(bag["content-type"], "application/json");

        let body = fx.server_decoder.decode(out.body.as_ref().unwrap()).unwrap();
        assert_eq!(body, br#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_encode_url_only() {
        let mut fx = Fixture::new(Mode::Mte).await;
        let request = RelayRequest::get(&format!("{}/status", ORIGIN))
            .header("accept", "text/plain")
            .encode_headers(HeaderSelection::None);
        let out = fx.encode(request).await.unwrap();

        let wire = wire_of(&out);
        assert!(wire.url_encoded);
        assert!(!wire.headers_encoded);
        assert!(!wire.body_encoded);
        assert_eq!(wire.mode, Mode::Mte);
        assert_eq!(out.header("accept"), Some("text/plain"));
        assert!(out.header(ENCODED_HEADERS_HEADER).is_none());
        assert!(out.body.is_none());

        let url = reqwest::Url::parse(&out.url).unwrap();
        let segment = url.path().trim_start_matches('/');
        let route = fx
            .server_decoder
            .decode(&URL_SAFE_NO_PAD.decode(segment).unwrap())
            .unwrap();
        assert_eq!(route, b"/status");
    }

    #[tokio::test]
    async fn test_content_type_forced_into_bag() {
        let mut fx = Fixture::new(Mode::Mke).await;
        let request = RelayRequest::post(&format!("{}/upload", ORIGIN))
            .header("x-trace", "abc")
            .body("hello")
            .encode_url(false)
            .encode_headers(HeaderSelection::None);
        let out = fx.encode(request).await.unwrap();

        let wire = wire_of(&out);
        assert!(!wire.url_encoded);
        assert!(wire.headers_encoded);
        assert!(wire.body_encoded);
        assert_eq!(out.url, format!("{}/upload", ORIGIN));
        assert_eq!(out.header("x-trace"), Some("abc"));

        let bag = BASE64.decode(out.header(ENCODED_HEADERS_HEADER).unwrap()).unwrap();
        let bag: HashMap<String, String> =
            serde_json::from_slice(&fx.server_decoder.decode(&bag).unwrap()).unwrap();
        assert_eq!(bag.len(), 1);
        assert_eq!(bag["content-type"], "text/plain;charset=UTF-8");
    }

    #[tokio::test]
    async fn test_plain_request_skips_engine() {
        let fx = Fixture::new(Mode::Mke).await;
        let request = RelayRequest::get(&format!("{}/plain", ORIGIN))
            .encode_url(false)
            .encode_headers(HeaderSelection::None);
        let out = fx.encode(request).await.unwrap();

        assert!(wire_of(&out).is_plain());
        assert_eq!(out.url, format!("{}/plain", ORIGIN));
        // The encoder state was never checked out
        let key = state_key(Role::Encoder, &fx.origin, &fx.pair);
        assert!(fx.store.get(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_body_left_clear_when_disabled() {
        let fx = Fixture::new(Mode::Mke).await;
        let request = RelayRequest::post(&format!("{}/raw", ORIGIN))
            .body(vec![9u8, 8, 7])
            .encode_body(false)
            .encode_headers(HeaderSelection::None);
        let out = fx.encode(request).await.unwrap();
        assert!(!wire_of(&out).body_encoded);
        assert_eq!(out.body, Some(vec![9, 8, 7]));
    }

    fn relay_response(fx: &mut Fixture, headers: &[(&str, &str)], body: &[u8]) -> HttpResponse {
        let bag: BTreeMap<&str, &str> = headers.iter().copied().collect();
        let bag = fx
            .server_encoder
            .encode(&serde_json::to_vec(&bag).unwrap())
            .unwrap();
        let body = fx.server_encoder.encode(body).unwrap();

        let mut out = HashMap::new();
        out.insert(RELAY_HEADER.to_string(), "C1,P1,1,0,1,1".to_string());
        out.insert(ENCODED_HEADERS_HEADER.to_string(), BASE64.encode(bag));
        out.insert(CONTENT_TYPE.to_string(), OCTET_STREAM.to_string());
        HttpResponse::new(200, out, body)
    }

    #[tokio::test]
    async fn test_decode_response() {
        let mut fx = Fixture::new(Mode::Mke).await;
        let response = relay_response(
            &mut fx,
            &[("content-type", "application/json"), ("X-Custom", "1")],
            br#"{"ok":true}"#,
        );

        let decoded = decode_response(&fx.runner(), &fx.origin, response)
            .await
            .unwrap();
        assert_eq!(decoded.status(), 200);
        assert_eq!(decoded.header("content-type"), Some("application/json"));
        assert_eq!(decoded.header("x-custom"), Some("1"));
        assert!(decoded.header(RELAY_HEADER).is_none());
        assert!(decoded.header(ENCODED_HEADERS_HEADER).is_none());
        assert_eq!(decoded.body(), br#"{"ok":true}"#);
        assert_eq!(decoded.client_id().unwrap().as_str(), "C1");
        assert_eq!(decoded.pair_id().unwrap().as_str(), "P1");
    }

    #[tokio::test]
    async fn test_decode_empty_body_skips_engine() {
        let fx = Fixture::new(Mode::Mke).await;
        let mut headers = HashMap::new();
        headers.insert(RELAY_HEADER.to_string(), "C1,P1,1,0,0,1".to_string());
        let response = HttpResponse::new(204, headers, Vec::new());

        let decoded = decode_response(&fx.runner(), &fx.origin, response)
            .await
            .unwrap();
        assert_eq!(decoded.status(), 204);
        assert!(decoded.body().is_empty());
    }

    #[tokio::test]
    async fn test_state_persists_across_requests() {
        let mut fx = Fixture::new(Mode::Mke).await;
        for i in 0..3 {
            let request = RelayRequest::post(&format!("{}/n", ORIGIN))
                .body(format!("msg {}", i))
                .encode_url(false)
                .encode_headers(HeaderSelection::None);
            let out = fx.encode(request).await.unwrap();
            let bag = BASE64.decode(out.header(ENCODED_HEADERS_HEADER).unwrap()).unwrap();
            fx.server_decoder.decode(&bag).unwrap();
            let body = fx.server_decoder.decode(out.body.as_ref().unwrap()).unwrap();
            assert_eq!(body, format!("msg {}", i).as_bytes());
        }
    }

    #[tokio::test]
    async fn test_same_state_key_waits_for_holder() {
        let locks = StateLocks::new();
        let held = locks.lock("enc:a:P1").await;

        let waiting = tokio::time::timeout(Duration::from_millis(20), locks.lock("enc:a:P1"));
        assert!(waiting.await.is_err());
        // Other keys are independent
        let other = tokio::time::timeout(Duration::from_millis(20), locks.lock("dec:a:P1"));
        assert!(other.await.is_ok());

        drop(held);
        let again = tokio::time::timeout(Duration::from_millis(20), locks.lock("enc:a:P1"));
        assert!(again.await.is_ok());
    }

    #[tokio::test]
    async fn test_idle_locks_are_dropped() {
        let locks = StateLocks::new();
        for i in 0..10 {
            let _guard = locks.lock(&format!("enc:a:P{}", i)).await;
        }
        assert!(locks.len() <= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_passes_on_one_pair() {
        let fx = Arc::new(Fixture::new(Mode::Mke).await);
        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let fx = fx.clone();
                tokio::spawn(async move {
                    let item = format!("/item/{}", i);
                    fx.runner()
                        .encode(&fx.origin, &fx.pair, Mode::Mke, &[item.as_bytes()])
                        .await
                })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            assert_eq!(result.unwrap().unwrap().len(), 1);
        }
        let key = state_key(Role::Encoder, &fx.origin, &fx.pair);
        assert!(fx.store.get(&key).await.unwrap().is_some());
    }

    // ==================== NEGATIVE TESTS ====================

    #[tokio::test]
    async fn test_url_too_long() {
        let fx = Fixture::new(Mode::Mke).await;
        let long = "a".repeat(2000);
        let request = RelayRequest::get(&format!("{}/{}", ORIGIN, long));
        assert!(matches!(
            fx.encode(request).await,
            Err(RelayError::UrlTooLong { limit: 2048, .. })
        ));
    }

    #[tokio::test]
    async fn test_url_boundary() {
        let fx = Fixture::new(Mode::Mke).await;
        let prepared = RelayRequest::get(&format!("{}/short", ORIGIN))
            .prepare(&RelaySettings::default())
            .unwrap();
        let out = encode_request(&fx.runner(), &prepared, None, &fx.pair, 4096)
            .await
            .unwrap();
        let exact = out.url.len();

        let prepared = RelayRequest::get(&format!("{}/short", ORIGIN))
            .prepare(&RelaySettings::default())
            .unwrap();
        let result = encode_request(&fx.runner(), &prepared, None, &fx.pair, exact - 1).await;
        assert!(matches!(result, Err(RelayError::UrlTooLong { .. })));
    }

    #[tokio::test]
    async fn test_missing_state_is_state_not_found() {
        let fx = Fixture::new(Mode::Mke).await;
        let key = state_key(Role::Encoder, &fx.origin, &fx.pair);
        fx.store.delete(&key).await.unwrap();

        let request = RelayRequest::get(&format!("{}/x", ORIGIN));
        assert!(matches!(
            fx.encode(request).await,
            Err(RelayError::StateNotFound(k)) if k == key
        ));
    }

    #[tokio::test]
    async fn test_failed_decode_drops_state() {
        let fx = Fixture::new(Mode::Mke).await;
        let mut headers = HashMap::new();
        headers.insert(RELAY_HEADER.to_string(), "C1,P1,1,0,0,1".to_string());
        // Right mode flag and counter, forged ciphertext
        let mut forged = vec![0u8; 64];
        forged[0] = Mode::Mke.as_flag();
        let response = HttpResponse::new(200, headers, forged);

        assert!(matches!(
            decode_response(&fx.runner(), &fx.origin, response).await,
            Err(RelayError::DecodeFailed(_))
        ));
        let key = state_key(Role::Decoder, &fx.origin, &fx.pair);
        assert!(fx.store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_response_without_relay_header() {
        let fx = Fixture::new(Mode::Mke).await;
        let response = HttpResponse::new(200, HashMap::new(), b"plain".to_vec());
        assert!(matches!(
            decode_response(&fx.runner(), &fx.origin, response).await,
            Err(RelayError::InvalidHeader(_))
        ));
    }

    #[tokio::test]
    async fn test_flagged_headers_without_bag() {
        let fx = Fixture::new(Mode::Mke).await;
        let mut headers = HashMap::new();
        headers.insert(RELAY_HEADER.to_string(), "C1,P1,1,0,1,0".to_string());
        let response = HttpResponse::new(200, headers, Vec::new());
        assert!(matches!(
            decode_response(&fx.runner(), &fx.origin, response).await,
            Err(RelayError::InvalidHeader(_))
        ));
    }

    #[tokio::test]
    async fn test_encoded_response_without_pair() {
        let fx = Fixture::new(Mode::Mke).await;
        let mut headers = HashMap::new();
        headers.insert(RELAY_HEADER.to_string(), "C1,,1,0,0,1".to_string());
        let response = HttpResponse::new(200, headers, vec![1, 2, 3]);
        assert!(matches!(
            decode_response(&fx.runner(), &fx.origin, response).await,
            Err(RelayError::InvalidHeader(_))
        ));
    }
}
