//! Premium license lifecycle.
//!
//! ```text
//!   inactive ──check ok──► active ──check ok──► active (updated)
//!       ▲                    │
//!       └── invalid / 4xx ───┘ (deactivated)
//! ```
//!
//! Transient failures (offline, transport errors, 5xx) never touch the
//! license. The first one starts a retry interval; after three failed
//! attempts retrying stops and the license is kept until the next regular
//! check.

use crate::error::{FailureKind, LicenseError};
use crate::license::{License, LicenseCheckPayload, PremiumState};
use crate::prefs::{
    Prefs, PREMIUM_LICENSE, PREMIUM_LICENSE_NEXTCHECK, PREMIUM_USER_ID,
};
use crate::transport::LicenseTransport;
use sentinel_messaging::{
    EventEmitter, EventListener, EventRouter, ListenerId, MessageGateway, MessagingError, Port,
    Reply,
};
use sentinel_scheduler::{millis, ScheduleType, ScheduledEventEmitter};
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Schedule driving the regular license checks.
pub const LICENSE_CHECK_EVENT: &str = "premium.license.check";

/// Schedule driving retries after transient failures.
pub const LICENSE_CHECK_RETRY_EVENT: &str = "premium.license.check.retry";

/// Failed attempts after which retrying stops.
pub const MAX_LICENSE_CHECK_RETRIES: u64 = 3;

#[derive(Debug, Clone)]
pub struct LicenseSettings {
    /// Delay between regular license checks
    pub check_period: Duration,
    /// Delay between retries after a transient failure
    pub retry_delay: Duration,
}

impl Default for LicenseSettings {
    fn default() -> Self {
        Self {
            check_period: Duration::from_secs(24 * 60 * 60),
            retry_delay: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseEvent {
    /// A license became active
    Activated,
    /// An active license was renewed
    Updated,
    /// The license was dropped
    Deactivated,
}

impl LicenseEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Activated => "activated",
            Self::Updated => "updated",
            Self::Deactivated => "deactivated",
        }
    }
}

struct Inner {
    prefs: Prefs,
    transport: Arc<dyn LicenseTransport>,
    scheduler: ScheduledEventEmitter,
    events: EventEmitter<EventListener>,
    settings: LicenseSettings,
}

/// Checks, activates and deactivates the Premium license.
#[derive(Clone)]
pub struct LicenseController {
    inner: Arc<Inner>,
}

impl LicenseController {
    pub fn new(
        prefs: Prefs,
        transport: Arc<dyn LicenseTransport>,
        scheduler: ScheduledEventEmitter,
        settings: LicenseSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                prefs,
                transport,
                scheduler,
                events: EventEmitter::new(),
                settings,
            }),
        }
    }

    /// Registers the messaging endpoints and resumes license checks.
    pub async fn start(&self, port: &Port, router: &EventRouter, gateway: &MessageGateway) {
        self.register_messaging(port, router, gateway);
        self.initialize_license_checks().await;
        info!("💎 Premium license controller started (active: {})", self.has_active_license());
    }

    pub fn prefs(&self) -> &Prefs {
        &self.inner.prefs
    }

    pub fn scheduler(&self) -> &ScheduledEventEmitter {
        &self.inner.scheduler
    }

    /// Subscribes to license events.
    pub fn on_event<F>(&self, event: LicenseEvent, listener: F) -> ListenerId
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.inner.events.on(event.as_str(), Arc::new(listener))
    }

    pub fn off_event(&self, event: LicenseEvent, id: ListenerId) {
        self.inner.events.off(event.as_str(), id);
    }

    pub fn has_active_license(&self) -> bool {
        self.inner.prefs.license().is_active()
    }

    pub fn premium_state(&self) -> PremiumState {
        PremiumState {
            is_active: self.has_active_license(),
        }
    }

    /// Signed license data proving Premium to other services.
    pub fn get_auth_payload(&self) -> Option<String> {
        let license = self.inner.prefs.license();
        if !license.is_active() {
            return None;
        }
        Some(format!(
            "{}.{}",
            license.encoded_data.unwrap_or_default(),
            license.signature.unwrap_or_default()
        ))
    }

    /// Checks the license with the server.
    ///
    /// `retry_count` is the number of retries so far, `0` for a regular
    /// check. Every outcome is handled here; nothing is returned.
    pub async fn check_license(&self, retry_count: u64) {
        if retry_count >= MAX_LICENSE_CHECK_RETRIES {
            debug!("Giving up on license check retries, keeping current license");
            self.remove_schedule(LICENSE_CHECK_RETRY_EVENT).await;
            return;
        }

        let user_id = self.inner.prefs.user_id();
        if user_id.is_empty() {
            return;
        }

        let result = match self.fetch_license(&user_id).await {
            Ok(license) => self.activate_license(license).await,
            Err(e) => Err(e),
        };

        let Err(e) = result else {
            return;
        };

        match e.kind() {
            FailureKind::Permanent => {
                error!("Invalid Premium license: {}", e);
                self.deactivate_license().await;
            }
            FailureKind::Transient => {
                warn!("Premium license check failed (retries: {}): {}", retry_count, e);
                if retry_count > 0 {
                    return;
                }
                let retry_delay = millis(self.inner.settings.retry_delay);
                if let Err(e) = self
                    .inner
                    .scheduler
                    .set_schedule(LICENSE_CHECK_RETRY_EVENT, retry_delay, ScheduleType::Interval)
                    .await
                {
                    error!("Failed to schedule license check retry: {}", e);
                }
            }
            FailureKind::Ignored => error!("{}", e),
        }
    }

    async fn fetch_license(&self, user_id: &str) -> Result<License, LicenseError> {
        if !self.inner.transport.is_online() {
            return Err(LicenseError::Offline);
        }

        let response = self
            .inner
            .transport
            .post_license_check(&self.inner.prefs.check_url(), &LicenseCheckPayload::new(user_id))
            .await?;
        if !response.is_success() {
            return Err(LicenseError::from_status(response.status));
        }

        let license: License = serde_json::from_str(&response.body)
            .map_err(|e| LicenseError::InvalidLicense(format!("Malformed license: {e}")))?;
        license.validated(&self.inner.prefs.license())
    }

    async fn activate_license(&self, license: License) -> Result<(), LicenseError> {
        let old = self.inner.prefs.license();
        self.inner.prefs.set_license(&license)?;
        self.inner
            .scheduler
            .remove_schedule(LICENSE_CHECK_RETRY_EVENT)
            .await?;

        if old.is_active() {
            debug!("Premium license updated");
            self.emit(LicenseEvent::Updated);
        } else {
            self.schedule_next_license_check(None).await?;
            info!("💎 Premium license activated");
            self.emit(LicenseEvent::Activated);
        }
        Ok(())
    }

    async fn deactivate_license(&self) {
        for key in [PREMIUM_LICENSE, PREMIUM_LICENSE_NEXTCHECK, PREMIUM_USER_ID] {
            if let Err(e) = self.inner.prefs.reset(key) {
                error!("Failed to reset pref '{}': {}", key, e);
            }
        }

        self.remove_schedule(LICENSE_CHECK_RETRY_EVENT).await;
        self.remove_schedule(LICENSE_CHECK_EVENT).await;

        info!("Premium license deactivated");
        self.emit(LicenseEvent::Deactivated);
    }

    /// Plans regular checks, the first one at `next_check_ms` or one check
    /// period from now.
    async fn schedule_next_license_check(&self, next_check_ms: Option<u64>) -> Result<(), LicenseError> {
        let period = millis(self.inner.settings.check_period);
        let next_check_ms = match next_check_ms {
            Some(next) if next > 0 => next,
            _ => {
                let next = self.inner.scheduler.now_ms().saturating_add(period);
                self.inner.prefs.set(PREMIUM_LICENSE_NEXTCHECK, next)?;
                next
            }
        };

        self.inner
            .scheduler
            .set_schedule_from(LICENSE_CHECK_EVENT, next_check_ms, period)
            .await?;
        Ok(())
    }

    async fn initialize_license_checks(&self) {
        let controller = Arc::downgrade(&self.inner);
        self.inner
            .scheduler
            .set_listener(LICENSE_CHECK_RETRY_EVENT, move |info| {
                spawn_check(&controller, info.call_count);
            })
            .await;

        let controller = Arc::downgrade(&self.inner);
        self.inner
            .scheduler
            .set_listener(LICENSE_CHECK_EVENT, move |_| {
                let Some(inner) = controller.upgrade() else {
                    return;
                };
                let period = millis(inner.settings.check_period);
                let next = inner.scheduler.now_ms().saturating_add(period);
                if let Err(e) = inner.prefs.set(PREMIUM_LICENSE_NEXTCHECK, next) {
                    error!("Failed to store next license check: {}", e);
                }
                spawn_check(&controller, 0);
            })
            .await;

        let next_check_ms = self.inner.prefs.next_check();
        if next_check_ms == 0 || self.inner.scheduler.has_schedule(LICENSE_CHECK_EVENT) {
            return;
        }

        if let Err(e) = self.schedule_next_license_check(Some(next_check_ms)).await {
            error!("Failed to resume license checks: {}", e);
        }
    }

    fn register_messaging(&self, port: &Port, router: &EventRouter, gateway: &MessageGateway) {
        let controller = self.clone();
        port.on("premium.activate", move |message, _| {
            let Some(user_id) = message.get_str("userId").filter(|id| !id.is_empty()) else {
                return Ok(Some(Reply::value(false)));
            };

            // The license doesn't carry the user ID, so it's stored separately
            controller
                .inner
                .prefs
                .set(PREMIUM_USER_ID, user_id)
                .map_err(|e| MessagingError::listener(&message.message_type, e.to_string()))?;

            let controller = controller.clone();
            Ok(Some(Reply::pending(async move {
                controller.check_license(0).await;
                Value::Bool(true)
            })))
        });

        let controller = self.clone();
        port.on("premium.get", move |_, _| {
            Ok(Some(Reply::value(serde_json::to_value(controller.premium_state())?)))
        });

        let controller = Arc::downgrade(&self.inner);
        router.install_handler("premium", Some("changed"), move |emit, _, _| {
            let state_source = controller.clone();
            let on_changed: Arc<EventListener> = Arc::new(move |_: &[Value]| {
                if let Some(inner) = state_source.upgrade() {
                    let state = PremiumState {
                        is_active: inner.prefs.license().is_active(),
                    };
                    if let Ok(state) = serde_json::to_value(state) {
                        emit(vec![state]);
                    }
                }
            });

            let Some(inner) = controller.upgrade() else {
                return Box::new(|| {});
            };
            let activated = inner.events.on(LicenseEvent::Activated.as_str(), on_changed.clone());
            let deactivated = inner.events.on(LicenseEvent::Deactivated.as_str(), on_changed);

            let controller = controller.clone();
            Box::new(move || {
                if let Some(inner) = controller.upgrade() {
                    inner.events.off(LicenseEvent::Activated.as_str(), activated);
                    inner.events.off(LicenseEvent::Deactivated.as_str(), deactivated);
                }
            })
        });

        gateway.add_trusted_message_types(
            Some(&self.inner.prefs.activation_origin()),
            ["premium.activate"],
        );
    }

    fn emit(&self, event: LicenseEvent) {
        self.inner.events.emit(event.as_str(), &[]);
    }

    async fn remove_schedule(&self, name: &str) {
        if let Err(e) = self.inner.scheduler.remove_schedule(name).await {
            error!("Failed to remove schedule '{}': {}", name, e);
        }
    }
}

fn spawn_check(controller: &Weak<Inner>, retry_count: u64) {
    if let Some(inner) = controller.upgrade() {
        let controller = LicenseController { inner };
        tokio::spawn(async move {
            controller.check_license(retry_count).await;
        });
    }
}
