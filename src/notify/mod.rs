use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

use crate::{
    config::NotifyConfig,
    report::format_percent,
    types::{Opportunity, Route},
};

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Clone)]
pub enum Notification {
    Opportunity(Opportunity),
    Route(Route),
}

impl Notification {
    pub fn message(&self) -> String {
        match self {
            Notification::Opportunity(opp) => format!(
                "{} buy@{} {} -> sell@{} {} | qty {} | net {} ({}%) via {}",
                opp.symbol,
                opp.buy_exchange(),
                opp.buy_price.round(8),
                opp.sell_exchange(),
                opp.sell_price.round(8),
                opp.quantity.round(8),
                opp.net_profit.round(4),
                format_percent(&opp.net_profit_fraction),
                opp.network
            ),
            Notification::Route(route) => format!(
                "route from {}@{} return {}%: {}",
                route.start_asset,
                route.start_exchange,
                format_percent(&(&route.cumulative_return - bigdecimal::BigDecimal::from(1))),
                route.describe()
            ),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, event: &Notification) -> Result<()>;
}

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, event: &Notification) -> Result<()> {
        info!("NOTIFY: {}", event.message());
        Ok(())
    }
}

pub struct TelegramNotifier {
    http: Client,
    base_url: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: String, chat_id: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| anyhow!("Failed to build Telegram client: {}", e))?;

        Ok(Self {
            http,
            base_url: TELEGRAM_API_URL.to_string(),
            token,
            chat_id,
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn notify(&self, event: &Notification) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);
        let payload = json!({
            "chat_id": self.chat_id,
            "text": event.message(),
            "disable_web_page_preview": true,
        });

        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow!("Telegram request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Telegram send failed ({}): {}", status, body));
        }
        Ok(())
    }
}

/// Fans events out to every notifier. Delivery failures are logged and
/// swallowed so a flaky channel never affects a scan.
pub struct NotificationSink {
    notifiers: Vec<Box<dyn Notifier>>,
    max_per_cycle: usize,
}

impl NotificationSink {
    pub fn new(max_per_cycle: usize) -> Self {
        Self {
            notifiers: Vec::new(),
            max_per_cycle,
        }
    }

    pub fn from_config(config: &NotifyConfig) -> Self {
        let mut sink = Self::new(config.max_per_cycle);
        sink.add_notifier(Box::new(LogNotifier));

        if let (Some(token), Some(chat_id)) = (&config.telegram_bot_token, &config.telegram_chat_id) {
            match TelegramNotifier::new(token.clone(), chat_id.clone()) {
                Ok(telegram) => sink.add_notifier(Box::new(telegram)),
                Err(e) => warn!("Telegram notifications disabled: {}", e),
            }
        }
        sink
    }

    pub fn add_notifier(&mut self, notifier: Box<dyn Notifier>) {
        self.notifiers.push(notifier);
    }

    pub fn notifier_count(&self) -> usize {
        self.notifiers.len()
    }

    pub async fn send(&self, event: &Notification) {
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(event).await {
                warn!("Failed to notify via {}: {}", notifier.name(), e);
            }
        }
    }

    /// Sends the best `max_per_cycle` opportunities. Returns how many went out.
    pub async fn publish_opportunities(&self, opportunities: &[Opportunity]) -> usize {
        let mut ranked: Vec<&Opportunity> = opportunities.iter().collect();
        ranked.sort_by(|a, b| b.net_profit_fraction.cmp(&a.net_profit_fraction));

        let mut sent = 0;
        for opp in ranked.into_iter().take(self.max_per_cycle) {
            self.send(&Notification::Opportunity(opp.clone())).await;
            sent += 1;
        }
        sent
    }

    pub async fn publish_routes(&self, routes: &[Route]) -> usize {
        let mut ranked: Vec<&Route> = routes.iter().collect();
        ranked.sort_by(|a, b| b.cumulative_return.cmp(&a.cumulative_return));

        let mut sent = 0;
        for route in ranked.into_iter().take(self.max_per_cycle) {
            self.send(&Notification::Route(route.clone())).await;
            sent += 1;
        }
        sent
    }
}
