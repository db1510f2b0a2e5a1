//! fksd - An authoritative DNS server with an authenticated control channel.
//!
//! Zones live in memory and are managed at runtime over DNS itself: signed
//! UPDATE messages in the CHAOS class carry text commands under the reserved
//! owner names `ZONE.` and `USER.`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                            fksd                              │
//! │                                                              │
//! │  UDP/TCP ──▶ Dispatcher ──┬── IN ──▶ Resolver ──┐            │
//! │   :1053     (TSIG split)  │                     ▼            │
//! │                           │                ZoneRegistry      │
//! │                           │                     ▲            │
//! │                           └── CH ──▶ ControlProtocol          │
//! │                                       │    │                 │
//! │                                       │    └──▶ AuthModel    │
//! │                                       ▼                      │
//! │                                  ZoneLoader (file, AXFR)     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Resolution
//!
//! ```text
//! www.example.
//!   → closest enclosing loaded zone (example.)
//!   → delegation above the name?  referral
//!   → exact node?                 answer / CNAME / NODATA
//!   → *.example.?                 wildcard answer, owner rewritten
//!   → NXDOMAIN
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use fksd::{DnsConfig, DnsServer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = DnsConfig {
//!         listen_addr: "[::]:1053".parse().unwrap(),
//!         ..DnsConfig::default()
//!     };
//!
//!     let server = DnsServer::new(config).unwrap();
//!     server.run().await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod auth;
pub mod config;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod loader;
pub mod metrics;
pub mod registry;
pub mod reply;
pub mod resolver;
pub mod server;
pub mod telemetry;
pub mod tsig;
pub mod zone;

// Re-export main types
pub use auth::{AuthModel, Capabilities};
pub use config::{Config, DnsConfig, TelemetryConfig};
pub use control::ControlProtocol;
pub use dispatch::{Dispatcher, Transport};
pub use error::{ControlError, DnsError, LoadError, TsigError};
pub use loader::{DefaultZoneLoader, ZoneLoader};
pub use registry::ZoneRegistry;
pub use resolver::Resolver;
pub use server::DnsServer;
pub use zone::{Zone, ZoneBuilder};
