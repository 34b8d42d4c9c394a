//! Session client for the customer self-care portal
//!
//! One `PortalSessionClient` is one browsing session: its transport owns the
//! cookie jar that login fills and every later request reuses. Operations
//! are not meant to run concurrently against the same session.

use crate::config::{Config, PortalSettings, SpeedSettings};
use crate::error::{PortalError, PortalResult};
use crate::http::{HttpClient, Transport};
use crate::models::{
    Credentials, DashboardSnapshot, LiveSpeedSample, LoginOutcome, PaymentRecord, UsageEntry,
};
use crate::parser;
use crate::portal::speed::{self, SpeedStream};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ORIGIN, REFERER};
use reqwest::Url;
use std::sync::Arc;

pub struct PortalSessionClient<T: Transport = HttpClient> {
    transport: Arc<T>,
    portal: PortalSettings,
    speed: SpeedSettings,
}

impl PortalSessionClient<HttpClient> {
    /// Client with a fresh HTTP session built from configuration
    pub fn from_config(cfg: &Config) -> PortalResult<Self> {
        let transport = HttpClient::new(&cfg.http, &cfg.portal.user_agent)?;
        Ok(Self::new(transport, cfg.portal.clone(), cfg.speed.clone()))
    }
}

impl<T: Transport> PortalSessionClient<T> {
    pub fn new(transport: T, portal: PortalSettings, speed: SpeedSettings) -> Self {
        Self {
            transport: Arc::new(transport),
            portal,
            speed,
        }
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Log in and scrape the dashboard
    pub async fn login(&self, credentials: &Credentials) -> LoginOutcome {
        match self.try_login(credentials).await {
            Ok(snapshot) => {
                tracing::info!("[portal] Logged in as {}", snapshot.name);
                LoginOutcome::Success(snapshot)
            }
            Err(PortalError::Rejected(reason)) => {
                tracing::warn!("[portal] Portal rejected login: {}", reason);
                LoginOutcome::Failure(reason)
            }
            Err(e) => {
                tracing::warn!("[portal] Login aborted: {}", e);
                LoginOutcome::Failure(format!("Login failed: {}", e))
            }
        }
    }

    async fn try_login(&self, credentials: &Credentials) -> PortalResult<DashboardSnapshot> {
        let landing = self.portal.url(&self.portal.landing_path);

        tracing::info!("[portal] Step 1: Opening landing page...");
        self.transport.get(&landing, HeaderMap::new()).await?;

        tracing::info!("[portal] Step 2: Submitting credentials...");
        let form = [
            (self.portal.username_field.as_str(), credentials.customer_id.as_str()),
            (self.portal.password_field.as_str(), credentials.password.as_str()),
        ];
        let mut headers = HeaderMap::new();
        headers.insert(REFERER, HeaderValue::from_str(&landing)?);
        headers.insert(ORIGIN, HeaderValue::from_str(&self.portal.origin())?);
        self.transport
            .post_form(&self.portal.url(&self.portal.login_path), &form, headers)
            .await?;

        tracing::info!("[portal] Step 3: Loading dashboard...");
        let dashboard = self
            .transport
            .get(&self.portal.url(&self.portal.dashboard_path), HeaderMap::new())
            .await?;

        if self.is_login_url(&dashboard.final_url)
            || parser::is_sign_in_page(&dashboard.body, &self.portal.sign_in_marker)
        {
            return Err(PortalError::Rejected("Login failed".to_string()));
        }

        let snapshot = parser::parse_dashboard(&dashboard.body);

        tracing::info!("[portal] Step 4: Priming live speed feed...");
        speed::prime(self.transport.as_ref(), &self.portal).await;

        Ok(snapshot)
    }

    /// The dashboard request bounced back to the sign-in form
    fn is_login_url(&self, url: &Url) -> bool {
        let path = url.path().trim_end_matches('/');
        let login = self.portal.login_path.trim_end_matches('/');
        (!login.is_empty() && path.ends_with(login)) || path.ends_with("/login")
    }

    /// One live speed sample from a short-lived connection; zero when
    /// nothing could be read
    pub async fn fetch_live_speed(&self) -> LiveSpeedSample {
        match speed::poll_once(self.transport.as_ref(), &self.portal, &self.speed).await {
            Ok(sample) => sample,
            Err(e) => {
                tracing::debug!("Live speed unavailable: {}", e);
                LiveSpeedSample::ZERO
            }
        }
    }

    /// Continuous live speed samples until the returned handle is cancelled
    /// or dropped. Must be called from within a tokio runtime.
    pub fn stream_live_speed(&self) -> SpeedStream {
        SpeedStream::spawn(self.transport.clone(), self.portal.clone(), self.speed.clone())
    }

    /// Daily usage; empty when the portal cannot be read
    pub async fn fetch_usage_history(&self) -> Vec<UsageEntry> {
        match self.try_usage_history().await {
            Ok(entries) => {
                tracing::debug!("Fetched {} usage entries", entries.len());
                entries
            }
            Err(e) => {
                log_degraded("Usage history", &e);
                Vec::new()
            }
        }
    }

    async fn try_usage_history(&self) -> PortalResult<Vec<UsageEntry>> {
        let response = self
            .transport
            .get(&self.portal.url(&self.portal.usage_path), ajax_headers())
            .await?
            .into_success()?;
        parser::parse_usage_history(&response.body)
    }

    /// Billing history; empty when the portal cannot be read
    pub async fn fetch_payment_history(&self) -> Vec<PaymentRecord> {
        match self.try_payment_history().await {
            Ok(records) => {
                tracing::debug!("Fetched {} payment records", records.len());
                records
            }
            Err(e) => {
                log_degraded("Payment history", &e);
                Vec::new()
            }
        }
    }

    async fn try_payment_history(&self) -> PortalResult<Vec<PaymentRecord>> {
        let response = self
            .transport
            .get(&self.portal.url(&self.portal.payments_path), HeaderMap::new())
            .await?
            .into_success()?;
        parser::parse_payment_history(&response.body)
    }
}

fn log_degraded(what: &str, e: &PortalError) {
    if e.is_transport() {
        tracing::warn!("{} unavailable, portal unreachable: {}", what, e);
    } else {
        tracing::warn!("{} unavailable, unexpected page: {}", what, e);
    }
}

fn ajax_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("x-requested-with"),
        HeaderValue::from_static("XMLHttpRequest"),
    );
    headers
}
