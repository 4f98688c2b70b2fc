//! Client-side request signing for the reader's `book/read` endpoint.
//!
//! The service validates two derived fields on every read:
//! `sg`, a SHA-256 over `ts ‖ rn ‖ secret`, and `s`, a 31-bit rolling hash over
//! the sorted, percent-encoded field set. Both must be reproduced bit-exactly.

use rand::Rng;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Field holding the rolling-hash signature. Never part of its own input.
pub const SIGNATURE_FIELD: &str = "s";

/// Fields recomputed on every attempt; stripped from the template.
const PER_ATTEMPT_FIELDS: [&str; 5] = ["ct", "ts", "rn", "sg", SIGNATURE_FIELD];

const HASH_SEED: u64 = 0x1505_1505;
const HASH_MASK: u64 = 0x7fff_ffff;

/// Sorted field set sent to the read endpoint.
pub type ReadFields = BTreeMap<String, Value>;

/// One fully signed read request. Built fresh per attempt, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedRead {
    fields: ReadFields,
}

impl SignedRead {
    pub fn fields(&self) -> &ReadFields {
        &self.fields
    }

    pub fn signature(&self) -> &str {
        self.fields
            .get(SIGNATURE_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Compact JSON body, as the web client posts it.
    pub fn to_body(&self) -> String {
        let map: Map<String, Value> = self.fields.clone().into_iter().collect();
        Value::Object(map).to_string()
    }
}

#[derive(Debug, Clone)]
pub struct RequestSigner {
    template: ReadFields,
    secret: String,
}

impl RequestSigner {
    pub fn new(template: ReadFields, secret: impl Into<String>) -> Self {
        let mut template = template;
        for key in PER_ATTEMPT_FIELDS {
            template.remove(key);
        }
        Self {
            template,
            secret: secret.into(),
        }
    }

    /// Sign a read for the given send time (epoch milliseconds) and nonce.
    pub fn sign(&self, ts_millis: i64, rn: u32) -> SignedRead {
        let mut fields = self.template.clone();
        fields.insert("ct".to_string(), Value::from(ts_millis / 1000));
        fields.insert("ts".to_string(), Value::from(ts_millis));
        fields.insert("rn".to_string(), Value::from(rn));
        fields.insert(
            "sg".to_string(),
            Value::from(session_digest(ts_millis, rn, &self.secret)),
        );
        let signature = digest(&encode(&fields));
        fields.insert(SIGNATURE_FIELD.to_string(), Value::from(signature));
        SignedRead { fields }
    }

    pub fn sign_now(&self) -> SignedRead {
        let ts_millis = chrono::Utc::now().timestamp_millis();
        let rn = rand::thread_rng().gen_range(0..=1000);
        self.sign(ts_millis, rn)
    }
}

/// `k1=v1&k2=v2...` with keys ascending and every value percent-encoded.
pub fn encode(fields: &ReadFields) -> String {
    fields
        .iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(&value_text(value))))
        .collect::<Vec<_>>()
        .join("&")
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The service's 31-bit rolling hash, rendered as bare lowercase hex.
pub fn digest(input: &str) -> String {
    let code_points: Vec<u64> = input.chars().map(|c| u64::from(u32::from(c))).collect();
    let len = code_points.len() as i64;
    let mut a = HASH_SEED;
    let mut b = HASH_SEED;

    let mut i = len - 1;
    while i > 0 {
        let hi = code_points[i as usize];
        let lo = code_points[(i - 1) as usize];
        a = (a ^ (hi << ((len - i) % 30))) & HASH_MASK;
        b = (b ^ (lo << (i % 30))) & HASH_MASK;
        i -= 2;
    }

    format!("{:x}", a + b)
}

/// `sg`: hex SHA-256 of the decimal `ts`, decimal `rn` and the shared secret.
pub fn session_digest(ts_millis: i64, rn: u32, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}{}{}", ts_millis, rn, secret).as_bytes());
    hex::encode(hasher.finalize())
}
