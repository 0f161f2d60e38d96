//! # Vigil WASM
//!
//! WebAssembly bindings for the Vigil key-block light client.
//! This crate bridges `vigil-core`'s pure Rust verification logic to JavaScript
//! via `wasm-bindgen`.
//!
//! ## Architecture
//!
//! - All cryptographic verification happens in Rust/WASM (never in JS)
//! - Ed25519 validator signatures and top-100 weight quorums for key blocks
//! - Merkle proof walks from an attested block root down to a transaction
//! - Accepts raw lite-server JSON with hex BOCs; format conversion handled internally
//! - Core `log` records are forwarded to the browser console

mod lite_api;
mod state;

use lite_api::{ApiBlockRequest, ApiCheckTransaction, ApiEnvelope};
use log::{Level, LevelFilter, Log, Metadata, Record};
use state::SessionStats;
use vigil_core::{DeployConfig, DispatchError, Envelope, LocalHost, Message};
use wasm_bindgen::prelude::*;

static LOGGER: ConsoleLogger = ConsoleLogger;

/// Set up the panic hook and console logging on WASM initialization.
/// This ensures Rust panics are logged to the browser console with full stack traces.
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
}

/// Change how much of the core's logging reaches the console.
///
/// Accepts `off`, `error`, `warn`, `info`, `debug` or `trace`.
#[wasm_bindgen]
pub fn set_log_level(level: &str) -> Result<(), JsValue> {
    let filter: LevelFilter = level
        .parse()
        .map_err(|_| JsValue::from_str(&format!("Unknown log level: {}", level)))?;
    log::set_max_level(filter);
    Ok(())
}

/// The main Vigil client: a lite client and a transaction checker hosted
/// side by side, driven one message at a time from JavaScript.
///
/// The genesis key block in the deploy config is the only moment of trust.
/// Every later epoch change is checked against the validator set it names.
#[wasm_bindgen]
pub struct VigilClient {
    host: LocalHost,
    stats: SessionStats,
}

#[wasm_bindgen]
impl VigilClient {
    /// Deploy a client from a JSON `DeployConfig`.
    ///
    /// The genesis BOC must come from multiple independent sources: nothing
    /// about it is verified beyond its shape.
    #[wasm_bindgen(constructor)]
    pub fn new(deploy_json: &str) -> Result<VigilClient, JsValue> {
        let config = DeployConfig::from_json(deploy_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid deploy config: {}", e)))?;
        let host = LocalHost::deploy(&config)
            .map_err(|e| JsValue::from_str(&format!("Failed to deploy: {}", e)))?;

        let epoch = host.epoch_state();
        log::info!(
            "[Vigil] Trusting genesis {} with {} current validators",
            config.genesis_id,
            epoch.cur_set.len()
        );
        let stats = SessionStats::new(epoch.seqno);

        Ok(VigilClient { host, stats })
    }

    /// Queue a key block for the lite client. Deliver it with `run_until_idle`.
    pub fn new_key_block(&mut self, request_json: &str) -> Result<(), JsValue> {
        self.submit_block_request(request_json, |query_id, attestation| Message::NewKeyBlock {
            query_id,
            attestation,
        })
    }

    /// Queue a block check for the lite client. Deliver it with `run_until_idle`.
    pub fn check_block(&mut self, request_json: &str) -> Result<(), JsValue> {
        self.submit_block_request(request_json, |query_id, attestation| Message::CheckBlock {
            query_id,
            attestation,
        })
    }

    /// Queue a transaction check for the checker. Deliver it with `run_until_idle`.
    pub fn check_transaction(&mut self, request_json: &str) -> Result<(), JsValue> {
        let request: ApiCheckTransaction = serde_json::from_str(request_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid request JSON: {}", e)))?;
        let (sender, message) = request
            .to_message(self.host.arena_mut())
            .map_err(|e| JsValue::from_str(&format!("Invalid transaction request: {:#}", e)))?;
        let to = self.host.checker_address();
        self.host.submit(sender, to, message);
        Ok(())
    }

    /// Queue a raw message body (hex BOC) from `from` to `to`.
    pub fn submit_boc(&mut self, from: &str, to: &str, body_hex: &str) -> Result<(), JsValue> {
        let from = lite_api::parse_address(from)
            .map_err(|e| JsValue::from_str(&format!("Invalid sender: {:#}", e)))?;
        let to = lite_api::parse_address(to)
            .map_err(|e| JsValue::from_str(&format!("Invalid recipient: {:#}", e)))?;
        let body = lite_api::load_boc(self.host.arena_mut(), body_hex)
            .map_err(|e| JsValue::from_str(&format!("Invalid body: {:#}", e)))?;
        self.host
            .submit_cell(from, to, body)
            .map_err(|e| JsValue::from_str(&format!("Rejected message: {}", e)))
    }

    /// Deliver the oldest queued message.
    ///
    /// Returns the delivered envelope, or `null` when the queue is empty.
    /// A message that fails is dropped and its error returned.
    pub fn deliver_next(&mut self) -> Result<JsValue, JsValue> {
        let result = self.deliver_one();
        self.host.compact();
        match result {
            Ok(Some(envelope)) => to_js(&ApiEnvelope::from(&envelope)),
            Ok(None) => Ok(JsValue::NULL),
            Err(e) => Err(JsValue::from_str(&format!("Delivery failed: {}", e))),
        }
    }

    /// Deliver until the queue is empty. Failed messages are logged, counted
    /// and dropped; the rest of the queue still runs.
    ///
    /// Returns how many messages were delivered successfully.
    pub fn run_until_idle(&mut self) -> u32 {
        let mut delivered = 0;
        while self.host.queued() > 0 {
            match self.deliver_one() {
                Ok(_) => delivered += 1,
                Err(e) => log::warn!("[Vigil] Dropped message: {}", e),
            }
        }
        self.host.compact();
        delivered
    }

    /// Take the replies addressed to external callers, as a JSON-compatible array.
    pub fn take_outbox(&mut self) -> Result<JsValue, JsValue> {
        let replies: Vec<ApiEnvelope> = self
            .host
            .take_outbox()
            .iter()
            .map(ApiEnvelope::from)
            .collect();
        to_js(&replies)
    }

    /// The trusted epoch, as a JSON-compatible object.
    pub fn epoch_state(&self) -> Result<JsValue, JsValue> {
        to_js(self.host.epoch_state())
    }

    /// Whether a transaction check with this query id is still waiting.
    pub fn is_pending(&self, query_id: u64) -> bool {
        self.host.pending_request(query_id).is_some()
    }

    /// Number of queued, undelivered messages.
    pub fn queued(&self) -> u32 {
        self.host.queued() as u32
    }

    /// Session counters, as a JSON-compatible object.
    pub fn stats(&self) -> Result<JsValue, JsValue> {
        to_js(&self.stats)
    }

    /// Share of block verdicts so far that were rejections (0.0 - 1.0).
    pub fn rejection_rate(&self) -> f64 {
        self.stats.rejection_rate()
    }
}

impl VigilClient {
    /// Deliver one message and fold it into the session counters.
    fn deliver_one(&mut self) -> Result<Option<Envelope>, DispatchError> {
        match self.host.deliver_next() {
            Ok(delivered) => {
                if let Some(envelope) = &delivered {
                    self.stats.record(envelope);
                }
                self.stats.epoch_seqno = self.host.epoch_state().seqno;
                Ok(delivered)
            }
            Err(e) => {
                self.stats.record_failure();
                Err(e)
            }
        }
    }

    fn submit_block_request(
        &mut self,
        request_json: &str,
        build: impl FnOnce(u64, vigil_core::BlockAttestation) -> Message,
    ) -> Result<(), JsValue> {
        let request: ApiBlockRequest = serde_json::from_str(request_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid request JSON: {}", e)))?;
        let sender = request
            .sender()
            .map_err(|e| JsValue::from_str(&format!("Invalid sender: {:#}", e)))?;
        let attestation = request
            .attestation
            .to_core(self.host.arena_mut())
            .map_err(|e| JsValue::from_str(&format!("Invalid attestation: {:#}", e)))?;
        let to = self.host.lite_client_address();
        self.host.submit(sender, to, build(request.query_id, attestation));
        Ok(())
    }
}

fn to_js<T: serde::Serialize + ?Sized>(value: &T) -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(value)
        .map_err(|e| JsValue::from_str(&format!("Serialization failed: {}", e)))
}

/// Forwards `log` records to the browser console, one console method per level.
struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = JsValue::from_str(&format!("[{}] {}", record.target(), record.args()));
        match record.level() {
            Level::Error => web_sys::console::error_1(&line),
            Level::Warn => web_sys::console::warn_1(&line),
            Level::Info => web_sys::console::info_1(&line),
            Level::Debug | Level::Trace => web_sys::console::debug_1(&line),
        }
    }

    fn flush(&self) {}
}
