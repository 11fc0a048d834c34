//! Authenticated clients for the game's regional deployments.
//!
//! The crate is layered bottom-up: [`crypto`] implements the wire envelope,
//! [`account`] the two login flows, [`helper`] the cookie/version plumbing,
//! [`client`] one authenticated session per account, and [`manager`] the
//! per-region pool the rest of the gateway talks to.

pub mod account;
pub mod client;
pub mod crypto;
pub mod helper;
pub mod manager;

pub use account::{Account, CpAccount, NuverseAccount};
pub use client::{LoginResponse, SekaiClient};
pub use crypto::SekaiCryptor;
pub use helper::{CookieHelper, VersionHelper, VersionInfo};
pub use manager::SekaiClientManager;
