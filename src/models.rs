//! Data models for the self-care portal

/// Customer login, supplied by the caller and never stored by the client
#[derive(Debug, Clone)]
pub struct Credentials {
    pub customer_id: String,
    pub password: String,
}

/// Fields scraped from the dashboard page right after login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardSnapshot {
    pub name: String,
    pub package: String,
    pub account_status: String,
    /// `ONLINE`, `OFFLINE`, or the raw portal text
    pub connection_status: String,
    pub expiry_date: String,
    pub plan_rate: String,
}

/// One reporting day from the usage endpoint, in bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageEntry {
    pub date: String,
    pub download: u64,
    pub upload: u64,
}

/// Live bandwidth in kbps
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LiveSpeedSample {
    pub download: f64,
    pub upload: f64,
}

impl LiveSpeedSample {
    pub const ZERO: LiveSpeedSample = LiveSpeedSample {
        download: 0.0,
        upload: 0.0,
    };

    /// Build a sample from raw bits-per-second values as the portal sends them
    pub fn from_raw(download: f64, upload: f64) -> Self {
        Self {
            download: download / 1000.0,
            upload: upload / 1000.0,
        }
    }
}

/// One row of the billing history table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRecord {
    pub date: String,
    pub amount: String,
    pub method: String,
    pub status: String,
    /// Empty when the portal omits the column
    pub transaction_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    Success(DashboardSnapshot),
    Failure(String),
}
