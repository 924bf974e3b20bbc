//! The background process: messaging core, scheduler and features wired
//! together.

use crate::config::AppConfig;
use sentinel_messaging::{EventRouter, MessageEmitter, MessageGateway, OriginTrustPolicy, Port, TrustPolicy};
use sentinel_premium::{LicenseController, LicenseTransport, Prefs, PrefsStore};
use sentinel_scheduler::{Clock, MemorySessionStorage, ScheduledEventEmitter, SessionArea, STORAGE_NAMESPACE};
use std::sync::Arc;
use tracing::info;

/// Everything the bridge talks to.
///
/// Cloning yields another handle to the same components.
#[derive(Clone)]
pub struct Background {
    pub gateway: Arc<MessageGateway>,
    pub port: Arc<Port>,
    pub router: EventRouter,
    pub scheduler: ScheduledEventEmitter,
    pub license: LicenseController,
}

impl Background {
    /// Builds and starts the background process.
    ///
    /// `session` outlives the background the same way browser session
    /// storage outlives a suspended worker.
    pub async fn start(
        config: &AppConfig,
        prefs_store: Arc<dyn PrefsStore>,
        transport: Arc<dyn LicenseTransport>,
        session: SessionArea,
        clock: Clock,
    ) -> Self {
        let policy: Arc<dyn TrustPolicy> = Arc::new(OriginTrustPolicy::new(&config.host.extension_origin));
        let emitter = Arc::new(MessageEmitter::new());
        let gateway = Arc::new(MessageGateway::new(emitter.clone(), policy.clone()));
        let port = Arc::new(Port::new(emitter));
        let router = EventRouter::new(policy);

        let storage = Arc::new(MemorySessionStorage::new(STORAGE_NAMESPACE, session));
        let scheduler = ScheduledEventEmitter::open_with_clock(storage, clock).await;

        let prefs = Prefs::new(
            prefs_store,
            &config.premium.license_check_url,
            &config.premium.activation_origin,
        );
        let license = LicenseController::new(prefs, transport, scheduler.clone(), config.license_settings());
        license.start(&port, &router, &gateway).await;

        info!("🧩 Background started for {}", config.host.extension_origin);

        Self {
            gateway,
            port,
            router,
            scheduler,
            license,
        }
    }

    /// Stops handling one-shot messages.
    pub fn stop(&self) {
        self.port.disconnect();
    }
}
