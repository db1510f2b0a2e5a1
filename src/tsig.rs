//! TSIG (RFC 8945) message signatures on top of hickory's [`TSigner`].
//!
//! The MAC covers the bytes exactly as received, so requests are verified
//! from the raw wire message and replies are signed after encoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hickory_proto::dnssec::rdata::tsig::{make_tsig_record, message_tbs, TSIG};
use hickory_proto::dnssec::rdata::DNSSECRData;
use hickory_proto::dnssec::tsig::TSigner;
use hickory_proto::op::{Header, Message, Query};
use hickory_proto::rr::{Name, RData, Record};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncodable, BinEncoder};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::error::TsigError;

pub use hickory_proto::dnssec::rdata::tsig::TsigAlgorithm;

/// Default allowed clock skew in seconds.
pub const DEFAULT_FUDGE: u16 = 300;

/// Seconds since the Unix epoch.
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn signer(
    key_name: &Name,
    algorithm: &TsigAlgorithm,
    secret: &str,
    fudge: u16,
) -> Result<TSigner, TsigError> {
    let key = STANDARD
        .decode(secret)
        .map_err(|_| TsigError::BadKey(key_name.clone()))?;
    TSigner::new(key, algorithm.clone(), key_name.clone(), fudge)
        .map_err(|_| TsigError::UnsupportedAlgorithm(algorithm.to_name().to_string()))
}

fn malformed(e: impl fmt::Display) -> TsigError {
    TsigError::Malformed(e.to_string())
}

fn failed(e: impl fmt::Display) -> TsigError {
    TsigError::Signing(e.to_string())
}

fn check_time(signed: u64, fudge: u16, now: u64) -> Result<(), TsigError> {
    if now.abs_diff(signed) > u64::from(fudge) {
        return Err(TsigError::BadTime { signed, now, fudge });
    }
    Ok(())
}

/// A received message that ends in a TSIG record.
#[derive(Debug, Clone)]
pub struct SignedMessage {
    bytes: Vec<u8>,
    key_name: Name,
    tsig: TSIG,
}

impl SignedMessage {
    /// Find the trailing TSIG record of `bytes`, if there is one.
    pub fn read(bytes: &[u8]) -> Result<Option<Self>, TsigError> {
        let mut decoder = BinDecoder::new(bytes);
        let header = Header::read(&mut decoder).map_err(malformed)?;
        if header.additional_count() == 0 {
            return Ok(None);
        }
        for _ in 0..header.query_count() {
            Query::read(&mut decoder).map_err(malformed)?;
        }
        let records = usize::from(header.answer_count())
            + usize::from(header.name_server_count())
            + usize::from(header.additional_count());
        for _ in 1..records {
            Record::read(&mut decoder).map_err(malformed)?;
        }
        let last = Record::read(&mut decoder).map_err(malformed)?;
        if !decoder.is_empty() {
            return Err(TsigError::Malformed("data after the last record".into()));
        }

        let tsig = match last.data() {
            RData::DNSSEC(DNSSECRData::TSIG(tsig)) => tsig.clone(),
            _ => return Ok(None),
        };
        Ok(Some(Self {
            bytes: bytes.to_vec(),
            key_name: last.name().clone(),
            tsig,
        }))
    }

    /// Owner of the TSIG record. This is the signer's identity.
    pub fn key_name(&self) -> &Name {
        &self.key_name
    }

    /// Algorithm the sender used.
    pub fn algorithm(&self) -> &TsigAlgorithm {
        self.tsig.algorithm()
    }

    /// Signing time, seconds since the epoch.
    pub fn time_signed(&self) -> u64 {
        self.tsig.time()
    }

    /// Clock skew the sender allows.
    pub fn fudge(&self) -> u16 {
        self.tsig.fudge()
    }

    /// The MAC carried by the record.
    pub fn mac(&self) -> &[u8] {
        self.tsig.mac()
    }

    /// Verify a request against `secret` (base64). The time window is the
    /// smaller of the sender's fudge and `max_fudge`.
    pub fn verify(
        &self,
        secret: &str,
        now: u64,
        max_fudge: u16,
    ) -> Result<ResponseSigner, TsigError> {
        let fudge = self.fudge().min(max_fudge);
        let signer = signer(&self.key_name, self.algorithm(), secret, fudge)?;
        let (mac, _, signed) = signer
            .verify_message_byte(None, &self.bytes, true)
            .map_err(|e| {
                debug!(key = %self.key_name, error = %e, "mac check failed");
                TsigError::BadSignature
            })?;
        check_time(signed, fudge, now)?;

        Ok(ResponseSigner {
            signer,
            request_mac: Some(mac),
        })
    }

    /// Verify a reply to a request that carried `request_mac`.
    pub fn verify_response(
        &self,
        secret: &str,
        request_mac: &[u8],
        now: u64,
    ) -> Result<(), TsigError> {
        let signer = signer(&self.key_name, self.algorithm(), secret, self.fudge())?;
        let (_, _, signed) = signer
            .verify_message_byte(Some(request_mac), &self.bytes, true)
            .map_err(|_| TsigError::BadSignature)?;
        check_time(signed, self.fudge(), now)
    }
}

/// Signs outgoing messages with one key. Built from a verified request, so
/// the reply MAC covers the request MAC, or directly for a fresh request.
#[derive(Clone)]
pub struct ResponseSigner {
    signer: TSigner,
    request_mac: Option<Vec<u8>>,
}

impl fmt::Debug for ResponseSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseSigner")
            .field("key_name", self.signer.signer_name())
            .field("algorithm", self.signer.algorithm())
            .field("reply", &self.request_mac.is_some())
            .finish()
    }
}

impl ResponseSigner {
    /// Signer for a fresh request (no prior MAC).
    pub fn for_request(
        key_name: &Name,
        algorithm: TsigAlgorithm,
        secret: &str,
        fudge: u16,
    ) -> Result<Self, TsigError> {
        Ok(Self {
            signer: signer(key_name, &algorithm, secret, fudge)?,
            request_mac: None,
        })
    }

    /// Key name used for signing.
    pub fn key_name(&self) -> &Name {
        self.signer.signer_name()
    }

    /// Encode `message` and append a TSIG record signed at `time_signed`.
    pub fn sign(&self, message: &Message, time_signed: u64) -> Result<Vec<u8>, TsigError> {
        let pre_tsig = TSIG::new(
            self.signer.algorithm().clone(),
            time_signed,
            self.signer.fudge(),
            Vec::new(),
            message.id(),
            0,
            Vec::new(),
        );
        let tbs = message_tbs(
            self.request_mac.as_deref(),
            message,
            &pre_tsig,
            self.signer.signer_name(),
        )
        .map_err(failed)?;
        let mac = self.signer.sign(&tbs).map_err(failed)?;
        let record = make_tsig_record(self.signer.signer_name().clone(), pre_tsig.set_mac(mac));

        let mut bytes = message.to_vec().map_err(failed)?;
        let mut tail = Vec::new();
        let mut encoder = BinEncoder::new(&mut tail);
        encoder.set_canonical_names(true);
        record.emit(&mut encoder).map_err(failed)?;
        bytes.extend_from_slice(&tail);

        let arcount = u16::from_be_bytes([bytes[10], bytes[11]]).wrapping_add(1);
        bytes[10..12].copy_from_slice(&arcount.to_be_bytes());
        Ok(bytes)
    }
}
