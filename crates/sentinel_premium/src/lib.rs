//! # Sentinel Premium
//!
//! Keeps the Premium license in sync with the licensing server.
//!
//! UI pages activate Premium with a `premium.activate` message carrying the
//! user ID. From then on the license is re-checked once per check period
//! using the scheduler, so checks resume after the background worker was
//! suspended. Transient failures are retried a bounded number of times;
//! invalid licenses are deactivated right away.

pub mod controller;
pub mod error;
pub mod license;
pub mod prefs;
pub mod transport;

pub use controller::{
    LicenseController, LicenseEvent, LicenseSettings, LICENSE_CHECK_EVENT,
    LICENSE_CHECK_RETRY_EVENT, MAX_LICENSE_CHECK_RETRIES,
};
pub use error::{FailureKind, LicenseError, PrefsError};
pub use license::{License, LicenseCheckPayload, PremiumState};
pub use prefs::{JsonFilePrefsStore, MemoryPrefsStore, Prefs, PrefsStore};
pub use transport::{HttpLicenseTransport, LicenseResponse, LicenseTransport};
