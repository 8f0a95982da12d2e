//! Composition root: builds every service once, in dependency order, and
//! hands out explicit references. Nothing here is process-global.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::info;

use crate::error::Result;
use crate::migrations::MigrationReport;
use crate::notify::filter::NotificationFilter;
use crate::notify::{LogNotifier, Notifier, Notifiers};
use crate::scheduler::{RetryPolicy, SyncScheduler};
use crate::service::DatabaseService;
use crate::settings::Settings;
use crate::sync::{ExpiryPolicy, SyncOrchestrator};
use crate::upstream::{GoCardlessClient, Upstream};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct App {
    pub settings: Settings,
    pub db: DatabaseService,
    pub upstream: Arc<dyn Upstream>,
    pub notifier: Arc<dyn Notifier>,
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl App {
    /// Open the store (running migrations to completion first), then wire
    /// the upstream client, notifiers and orchestrator on top of it.
    pub fn build(settings: Settings) -> Result<(Self, MigrationReport)> {
        let (db, report) = DatabaseService::open(&settings.db_path())?;

        let client = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        let upstream: Arc<dyn Upstream> = Arc::new(GoCardlessClient::new(client.clone(), &settings.upstream));
        let notifier: Arc<dyn Notifier> = Arc::new(build_notifiers(&settings, client));

        let filter = NotificationFilter::new(
            settings.notifications.rules.clone(),
            settings.notifications.min_amount,
        );
        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::clone(&upstream),
            db.clone(),
            Arc::clone(&notifier),
            filter,
            ExpiryPolicy::from(&settings.sync),
        ));

        Ok((
            Self {
                settings,
                db,
                upstream,
                notifier,
                orchestrator,
            },
            report,
        ))
    }

    pub fn scheduler(&self) -> Arc<SyncScheduler> {
        Arc::new(SyncScheduler::new(
            Arc::clone(&self.orchestrator),
            Arc::clone(&self.notifier),
            RetryPolicy::from(&self.settings.sync),
        ))
    }
}

#[cfg_attr(not(any(feature = "discord", feature = "telegram")), allow(unused_variables, unused_mut))]
fn build_notifiers(settings: &Settings, client: Client) -> Notifiers {
    let mut notifiers = Notifiers::new().with("log", Arc::new(LogNotifier));
    let targets = &settings.notifications;

    #[cfg(feature = "discord")]
    if let Some(url) = targets.discord_webhook.as_deref().filter(|u| !u.is_empty()) {
        notifiers = notifiers.with(
            "discord",
            Arc::new(crate::notify::discord::DiscordNotifier::new(client.clone(), url)),
        );
    }

    #[cfg(feature = "telegram")]
    if let (Some(token), Some(chat_id)) = (
        targets.telegram_bot_token.as_deref().filter(|t| !t.is_empty()),
        targets.telegram_chat_id.as_deref().filter(|c| !c.is_empty()),
    ) {
        notifiers = notifiers.with(
            "telegram",
            Arc::new(crate::notify::telegram::TelegramNotifier::new(client.clone(), token, chat_id)),
        );
    }

    info!(adapters = ?notifiers.names(), "notification adapters configured");
    notifiers
}
