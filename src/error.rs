//! Error types for fksd.

use hickory_proto::rr::Name;
use thiserror::Error;

/// Errors that can occur in the DNS server.
#[derive(Debug, Error)]
pub enum DnsError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Errors produced by a [`ZoneLoader`](crate::loader::ZoneLoader).
#[derive(Debug, Error)]
pub enum LoadError {
    /// Zone source could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Master file did not parse
    #[error("parse error: {0}")]
    Parse(String),

    /// No SOA record at the zone apex
    #[error("zone {0} has no SOA record at its apex")]
    MissingSoa(Name),

    /// Record owner does not belong to the zone
    #[error("record {owner} is outside of zone {origin}")]
    OutOfZone {
        /// Zone origin being built.
        origin: Name,
        /// Offending owner name.
        owner: Name,
    },

    /// Transfer was refused or ended early
    #[error("zone transfer failed: {0}")]
    Transfer(String),

    /// Transfer did not finish in time
    #[error("zone transfer from {0} timed out")]
    Timeout(String),

    /// Wire codec error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),
}

/// Message signature (TSIG) failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TsigError {
    /// A control update arrived without a signature
    #[error("request is not signed")]
    Unsigned,

    /// The message or its signature record could not be decoded
    #[error("malformed signature record: {0}")]
    Malformed(String),

    /// No secret is known for the key name
    #[error("unknown key {0}")]
    UnknownKey(Name),

    /// The secret on file is not valid base64
    #[error("secret for key {0} is not valid base64")]
    BadKey(Name),

    /// The signature algorithm is not supported
    #[error("unsupported algorithm {0}")]
    UnsupportedAlgorithm(String),

    /// The MAC did not verify
    #[error("signature does not verify")]
    BadSignature,

    /// Signed time outside of the fudge window
    #[error("signature time {signed} outside of window (now {now}, fudge {fudge})")]
    BadTime {
        /// Time the message was signed.
        signed: u64,
        /// Server time.
        now: u64,
        /// Allowed skew in seconds.
        fudge: u16,
    },

    /// A reply could not be signed
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Failures on the control channel. Every variant is answered with FORMERR.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Signature missing, unknown or invalid
    #[error("signature rejected: {0}")]
    Signature(#[from] TsigError),

    /// Signed control request that is not an UPDATE message
    #[error("control request is not an update")]
    NotUpdate,

    /// Unauthenticated directory query for an unsupported name
    #[error("no directory listing for {0}")]
    NoDirectory(Name),

    /// A command record that is not TXT
    #[error("command record {0} is not TXT")]
    NotText(Name),

    /// A command record owned by an unknown subsystem
    #[error("unknown control subsystem {0}")]
    UnknownSubsystem(Name),

    /// User management attempted by someone other than the superuser
    #[error("{0} is not the superuser")]
    NotSuperuser(Name),

    /// Caller lacks a capability bit
    #[error("{identity} lacks the {required} capability")]
    Forbidden {
        /// Caller identity.
        identity: Name,
        /// Name of the missing capability.
        required: &'static str,
    },

    /// A name token that does not parse as a domain name
    #[error("invalid name {0}")]
    InvalidName(String),

    /// Zone load failed; the registry is unchanged
    #[error("zone load failed: {0}")]
    Load(#[from] LoadError),

    /// Dropping an origin that is not loaded
    #[error("zone {0} is not loaded")]
    NoSuchZone(Name),

    /// Attempt to remove, re-key or demote the superuser
    #[error("{0} is the superuser and cannot be changed")]
    ProtectedUser(Name),

    /// Identity not present in the user table
    #[error("unknown user {0}")]
    UnknownUser(Name),

    /// Secret is not valid base64
    #[error("secret for {0} is not valid base64")]
    InvalidSecret(Name),

    /// Unknown capability name in ADDPOWER/DROPPOWER
    #[error("unknown power {0}")]
    UnknownPower(String),
}
