use std::time::Duration;

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeDelta, Utc};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const WEEKS: i64 = 52;
const DAYS_PER_WEEK: i64 = 7;

#[derive(Error, Debug)]
pub enum ContributionsError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Status(StatusCode),

    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Upstream(String),

    #[error("response carries no contribution data")]
    MissingData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionDay {
    pub date: String,
    pub count: u32,
    pub github_count: u32,
    pub gitcode_count: u32,
    pub level: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionCalendar {
    pub weeks: Vec<Vec<ContributionDay>>,
    pub total: u64,
    pub github_total: u64,
    pub gitcode_total: u64,
    pub updated_at: String,
}

/// `{ success, message?, data? }` wrapper used by the upstream API and by
/// our own `/api/contributions` route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributionsEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<ContributionCalendar>,
}

impl ContributionsEnvelope {
    pub fn ok(calendar: ContributionCalendar) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(calendar),
        }
    }

    pub fn fallback(message: String, calendar: ContributionCalendar) -> Self {
        Self {
            success: false,
            message: Some(message),
            data: Some(calendar),
        }
    }
}

/// Heatmap intensity bucket for a day's count.
pub fn contribution_level(count: u32) -> u8 {
    match count {
        0 => 0,
        1..=3 => 1,
        4..=6 => 2,
        7..=9 => 3,
        _ => 4,
    }
}

/// 52 weeks of zero-count days ending at `now`, served when the upstream
/// API is unavailable.
pub fn empty_calendar(now: DateTime<Utc>) -> ContributionCalendar {
    let today: NaiveDate = now.date_naive();

    let weeks = (0..WEEKS)
        .map(|w| {
            (0..DAYS_PER_WEEK)
                .map(|d| {
                    let date = today - TimeDelta::days((WEEKS - w) * DAYS_PER_WEEK - d);
                    ContributionDay {
                        date: date.format("%Y-%m-%d").to_string(),
                        count: 0,
                        github_count: 0,
                        gitcode_count: 0,
                        level: contribution_level(0),
                    }
                })
                .collect()
        })
        .collect();

    ContributionCalendar {
        weeks,
        total: 0,
        github_total: 0,
        gitcode_total: 0,
        updated_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
    }
}

fn build_user_agent() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        )),
    );
    headers
}

/// Unwrap an upstream envelope into its calendar.
pub fn parse_envelope(body: &str) -> Result<ContributionCalendar, ContributionsError> {
    let envelope: ContributionsEnvelope = serde_json::from_str(body)?;

    if !envelope.success {
        return Err(ContributionsError::Upstream(
            envelope
                .message
                .unwrap_or_else(|| "Failed to fetch contributions".to_string()),
        ));
    }

    envelope.data.ok_or(ContributionsError::MissingData)
}

/// HTTP client for the upstream API. A stalled upstream surfaces as a
/// `Request` error once `timeout` elapses.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, ContributionsError> {
    let client = reqwest::Client::builder()
        .default_headers(build_user_agent())
        .timeout(timeout)
        .build()?;
    Ok(client)
}

pub async fn fetch_contributions(
    client: &reqwest::Client,
    api_base: &str,
) -> Result<ContributionCalendar, ContributionsError> {
    let url = format!("{}/api/contributions", api_base.trim_end_matches('/'));

    let response = client.get(&url).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(ContributionsError::Status(status));
    }

    let body = response.text().await?;
    parse_envelope(&body)
}
