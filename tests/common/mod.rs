#![allow(dead_code)] // Each test binary uses a different subset
//! In-process MTE relay for the integration tests
//!
//! Speaks the relay side of the protocol on a wiremock server: assigns
//! client ids on probe, negotiates pairs, decodes relayed requests and
//! answers with an encoded echo. Faults can be queued per relayed request.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};
use base64::Engine;
use mterelay_client::pairing::{PairRequest, PairResponse};
use mterelay_client::{RelayClient, RelaySettings, StateStore};
use mterelay_core::{
    ClientId, Mode, Role, WireHeader, ENCODED_HEADERS_HEADER, OCTET_STREAM, PAIR_ENDPOINT,
    RELAY_ENDPOINT, RELAY_HEADER,
};
use mterelay_crypto::{
    generate_nonce, EcdhKeypair, EngineError, KeyExchange, SessionEngine, SoftwareEngine,
};
use parking_lot::Mutex;
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

// =============================================================================
// RELAY STATE
// =============================================================================

/// Misbehavior applied to the next relayed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Answer with a relay protocol status
    Status(u16),
    /// Answer without the relay header
    StripHeader,
    /// Flip a bit in the encoded response body
    CorruptBody,
}

/// A relayed request after the relay decoded it
#[derive(Debug, Clone)]
pub struct Seen {
    pub method: String,
    pub route: String,
    pub wire: WireHeader,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

struct ServerPair {
    encoder: Vec<u8>,
    decoder: Vec<u8>,
}

#[derive(Default)]
struct RelayState {
    next_client: u32,
    client_ids: HashSet<String>,
    revoked: HashSet<String>,
    pairs: HashMap<String, ServerPair>,
    faults: VecDeque<Fault>,
    not_relay: bool,
    probes: Vec<Option<String>>,
    pair_requests: usize,
    seen: Vec<Seen>,
    faulted_pairs: Vec<String>,
}

fn header(request: &Request, name: &str) -> Option<String> {
    request
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn wire_header(request: &Request) -> Option<WireHeader> {
    header(request, RELAY_HEADER).and_then(|v| WireHeader::parse(&v).ok())
}

fn status(code: u16) -> ResponseTemplate {
    ResponseTemplate::new(code).set_body_raw(format!("relay status {}", code), "text/plain")
}

fn instantiate(role: Role, entropy: &[u8], nonce: &str, personalization: &str) -> Vec<u8> {
    let mut engine = SoftwareEngine::new(role, Mode::Mke);
    engine
        .instantiate(entropy, nonce, personalization)
        .expect("relay engine instantiates");
    engine.save_state().expect("relay engine saves")
}

/// Restore, transform every item in order, save
fn run(state: &mut Vec<u8>, role: Role, mode: Mode, items: &[Vec<u8>]) -> Result<Vec<Vec<u8>>, EngineError> {
    let mut engine = SoftwareEngine::new(role, mode);
    engine.restore_state(state)?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(match role {
            Role::Encoder => engine.encode(item)?,
            Role::Decoder => engine.decode(item)?,
        });
    }
    *state = engine.save_state()?;
    Ok(out)
}

impl RelayState {
    fn assign_client_id(&mut self) -> String {
        self.next_client += 1;
        let id = format!("C{}", self.next_client);
        self.client_ids.insert(id.clone());
        id
    }

    fn is_valid_client(&self, id: &str) -> bool {
        self.client_ids.contains(id) && !self.revoked.contains(id)
    }

    fn probe(&mut self, request: &Request) -> ResponseTemplate {
        let presented = wire_header(request)
            .and_then(|w| w.client_id)
            .map(|c| c.as_str().to_string());
        self.probes.push(presented.clone());
        if self.not_relay {
            return ResponseTemplate::new(404);
        }

        let client_id = match presented {
            Some(id) if self.is_valid_client(&id) => id,
            _ => self.assign_client_id(),
        };
        ResponseTemplate::new(200).insert_header(
            RELAY_HEADER,
            WireHeader::probe(Some(ClientId::new(client_id))).to_header_value(),
        )
    }

    fn pair(&mut self, request: &Request) -> ResponseTemplate {
        self.pair_requests += 1;
        let client_id = match wire_header(request).and_then(|w| w.client_id) {
            Some(id) if self.is_valid_client(id.as_str()) => id,
            _ => return status(558),
        };
        let asks: Vec<PairRequest> = match serde_json::from_slice(&request.body) {
            Ok(asks) => asks,
            Err(_) => return status(558),
        };

        let mut answers = Vec::with_capacity(asks.len());
        for ask in asks {
            let encoder_key = EcdhKeypair::generate();
            let decoder_key = EcdhKeypair::generate();
            let encoder_nonce = generate_nonce();
            let decoder_nonce = generate_nonce();

            // Our encoder feeds the client's decoder and vice versa
            let (Ok(encoder_entropy), Ok(decoder_entropy)) = (
                encoder_key.derive_shared(&ask.decoder_public_key),
                decoder_key.derive_shared(&ask.encoder_public_key),
            ) else {
                return status(558);
            };
            let pair = ServerPair {
                encoder: instantiate(
                    Role::Encoder,
                    &encoder_entropy,
                    &encoder_nonce,
                    &ask.decoder_personalization_str,
                ),
                decoder: instantiate(
                    Role::Decoder,
                    &decoder_entropy,
                    &decoder_nonce,
                    &ask.encoder_personalization_str,
                ),
            };
            self.pairs.insert(ask.pair_id.clone(), pair);

            answers.push(PairResponse {
                pair_id: ask.pair_id,
                encoder_secret: encoder_key.public_key(),
                encoder_nonce,
                decoder_secret: decoder_key.public_key(),
                decoder_nonce,
            });
        }

        let body = serde_json::to_vec(&answers).expect("pair answers serialize");
        ResponseTemplate::new(200)
            .insert_header(RELAY_HEADER, WireHeader::probe(Some(client_id)).to_header_value())
            .set_body_raw(body, "application/json")
    }

    fn relay(&mut self, request: &Request) -> ResponseTemplate {
        let Some(wire) = wire_header(request) else {
            return ResponseTemplate::new(400);
        };
        let client_id = wire
            .client_id
            .as_ref()
            .map(|c| c.as_str().to_string())
            .unwrap_or_default();
        if !self.is_valid_client(&client_id) {
            return status(565);
        }

        let fault = self.faults.pop_front();
        if let Some(Fault::Status(code)) = fault {
            if let Some(pair_id) = &wire.pair_id {
                self.faulted_pairs.push(pair_id.to_string());
            }
            return status(code);
        }

        let Some(pair_id) = wire.pair_id.clone() else {
            return ResponseTemplate::new(400);
        };
        let Some(pair) = self.pairs.get_mut(pair_id.as_str()) else {
            return status(560);
        };

        let mut items = Vec::new();
        if wire.url_encoded {
            match URL_SAFE_NO_PAD.decode(request.url.path().trim_start_matches('/')) {
                Ok(route) => items.push(route),
                Err(_) => return status(562),
            }
        }
        if wire.headers_encoded {
            match header(request, ENCODED_HEADERS_HEADER).map(|bag| BASE64.decode(bag)) {
                Some(Ok(bag)) => items.push(bag),
                _ => return status(562),
            }
        }
        let body_encoded = wire.body_encoded && !request.body.is_empty();
        if body_encoded {
            items.push(request.body.clone());
        }

        let Ok(decoded) = run(&mut pair.decoder, Role::Decoder, wire.mode, &items) else {
            return status(562);
        };
        let mut decoded = decoded.into_iter();

        let route = if wire.url_encoded {
            String::from_utf8(decoded.next().unwrap_or_default()).unwrap_or_default()
        } else {
            match request.url.query() {
                Some(query) => format!("{}?{}", request.url.path(), query),
                None => request.url.path().to_string(),
            }
        };
        let mut headers: BTreeMap<String, String> = request
            .headers
            .iter()
            .filter(|(name, _)| *name != RELAY_HEADER && *name != ENCODED_HEADERS_HEADER)
            .filter_map(|(name, value)| {
                Some((name.as_str().to_string(), value.to_str().ok()?.to_string()))
            })
            .collect();
        if wire.headers_encoded {
            let bag: BTreeMap<String, String> =
                serde_json::from_slice(&decoded.next().unwrap_or_default()).unwrap_or_default();
            headers.extend(bag);
        }
        let body = if body_encoded {
            decoded.next().unwrap_or_default()
        } else {
            request.body.clone()
        };

        let echo = serde_json::json!({
            "method": request.method.as_str(),
            "route": route,
            "body": String::from_utf8_lossy(&body),
        });
        self.seen.push(Seen {
            method: request.method.as_str().to_string(),
            route: route.clone(),
            wire: wire.clone(),
            headers,
            body,
        });

        let reply_bag = serde_json::to_vec(&BTreeMap::from([
            ("content-type", "application/json".to_string()),
            ("x-echo-route", route),
        ]))
        .expect("bag serializes");
        let reply_body = serde_json::to_vec(&echo).expect("echo serializes");
        let Ok(mut encoded) = run(
            &mut pair.encoder,
            Role::Encoder,
            wire.mode,
            &[reply_bag, reply_body],
        ) else {
            return status(561);
        };
        let mut body = encoded.pop().unwrap_or_default();
        let bag = encoded.pop().unwrap_or_default();
        if fault == Some(Fault::CorruptBody) {
            if let Some(last) = body.last_mut() {
                *last ^= 0x01;
            }
        }

        let mut response_wire = WireHeader::request(Some(ClientId::new(client_id)), pair_id, wire.mode);
        response_wire.headers_encoded = true;
        response_wire.body_encoded = true;

        let mut response = ResponseTemplate::new(200)
            .insert_header(ENCODED_HEADERS_HEADER, BASE64.encode(bag))
            .set_body_raw(body, OCTET_STREAM);
        if fault != Some(Fault::StripHeader) {
            response = response.insert_header(RELAY_HEADER, response_wire.to_header_value());
        }
        response
    }
}

struct Responder(Arc<Mutex<RelayState>>);

impl Respond for Responder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut state = self.0.lock();
        match (request.method.as_str(), request.url.path()) {
            ("HEAD", RELAY_ENDPOINT) => state.probe(request),
            ("POST", PAIR_ENDPOINT) => state.pair(request),
            _ => state.relay(request),
        }
    }
}

// =============================================================================
// HARNESS
// =============================================================================

pub struct TestRelay {
    server: MockServer,
    state: Arc<Mutex<RelayState>>,
}

impl TestRelay {
    pub async fn start() -> Self {
        let _ = mterelay_logging::try_init_logging("warn,mterelay=debug");
        let server = MockServer::start().await;
        let state = Arc::new(Mutex::new(RelayState::default()));
        Mock::given(any())
            .respond_with(Responder(state.clone()))
            .mount(&server)
            .await;
        Self { server, state }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.server.uri(), path)
    }

    pub fn inject(&self, fault: Fault) {
        self.state.lock().faults.push_back(fault);
    }

    /// Reject every client id issued so far
    pub fn revoke_client_ids(&self) {
        let mut state = self.state.lock();
        let issued: Vec<String> = state.client_ids.iter().cloned().collect();
        state.revoked.extend(issued);
    }

    pub fn refuse_probes(&self) {
        self.state.lock().not_relay = true;
    }

    /// Client ids presented on each probe, in order
    pub fn probes(&self) -> Vec<Option<String>> {
        self.state.lock().probes.clone()
    }

    pub fn pair_requests(&self) -> usize {
        self.state.lock().pair_requests
    }

    pub fn server_pairs(&self) -> usize {
        self.state.lock().pairs.len()
    }

    /// Pairs that were answered with an injected status
    pub fn faulted_pairs(&self) -> Vec<String> {
        self.state.lock().faulted_pairs.clone()
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.state.lock().seen.clone()
    }
}

// =============================================================================
// CLIENT HELPERS
// =============================================================================

pub fn fast_settings() -> RelaySettings {
    RelaySettings::default()
        .with_polling(10, 19)
        .with_request_timeout_secs(5)
}

pub fn client() -> RelayClient {
    RelayClient::builder()
        .settings(fast_settings())
        .build()
        .expect("client builds")
}

pub fn client_with_store(store: Arc<dyn StateStore>) -> RelayClient {
    RelayClient::builder()
        .settings(fast_settings())
        .store(store)
        .build()
        .expect("client builds")
}

/// Wait until background pair replacement brings the queue back to `want`
pub async fn wait_for_pairs(client: &RelayClient, origin: &str, want: usize) -> bool {
    for _ in 0..100 {
        if client.pair_count(origin).unwrap_or(0) == want {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
