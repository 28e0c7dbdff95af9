//! Wall-clock synchronization against the `UTCTiming` sources of a dynamic
//! manifest. Segment availability math is only as good as the clock it runs
//! on, so the offset between the local clock and the server clock is
//! estimated before the first live segment index is generated.

use chrono::{DateTime, TimeDelta, Utc};
use dash_mpd::UTCTiming;
use tracing::{debug, warn};

use crate::{util::http::HttpClient, HibikiError, HibikiResult};

fn parse_iso8601(text: &str) -> HibikiResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Allow a bare Z suffix for UTC, which is not strictly RFC 3339
            // but used by xsdate servers
            DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%SZ").map(|dt| dt.with_timezone(&Utc))
        })
        .map_err(|e| HibikiError::DateTimeParsing(e.to_string()))
}

/// The request round trip brackets the server's timestamp; assume the server
/// read its clock at the midpoint.
fn offset_from(
    remote_now: DateTime<Utc>,
    before_request: DateTime<Utc>,
    after_request: DateTime<Utc>,
) -> TimeDelta {
    let midpoint = before_request + (after_request - before_request) / 2;
    remote_now - midpoint
}

async fn sync_http_date(client: &HttpClient, url: &str) -> HibikiResult<TimeDelta> {
    let before_request = Utc::now();
    let response = client.get(url).send().await?;
    let after_request = Utc::now();

    if !response.status().is_success() {
        return Err(HibikiError::HttpError(response.status()));
    }
    let text = response.text().await?;
    let remote_now = parse_iso8601(text.trim())?;
    Ok(offset_from(remote_now, before_request, after_request))
}

async fn sync_http_head(client: &HttpClient, url: &str) -> HibikiResult<TimeDelta> {
    let before_request = Utc::now();
    let response = client.head(url).send().await?;
    let after_request = Utc::now();

    if !response.status().is_success() {
        return Err(HibikiError::HttpError(response.status()));
    }
    let date = response
        .headers()
        .get(reqwest::header::DATE)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| HibikiError::DateTimeParsing("Missing Date header".to_string()))?;
    let remote_now = DateTime::parse_from_rfc2822(date)
        .map_err(|e| HibikiError::DateTimeParsing(e.to_string()))?
        .with_timezone(&Utc);
    Ok(offset_from(remote_now, before_request, after_request))
}

fn sync_direct(value: &str) -> HibikiResult<TimeDelta> {
    let remote_now = parse_iso8601(value)?;
    let local_now = Utc::now();
    Ok(remote_now - local_now)
}

/// Try each `UTCTiming` source in document order and return the first offset
/// that resolves. With no sources at all the local clock is trusted.
pub(crate) async fn sync_clock(
    timings: &[UTCTiming],
    client: &HttpClient,
) -> HibikiResult<TimeDelta> {
    if timings.is_empty() {
        warn!("No UTCTiming elements in the MPD, using the local clock");
        return Ok(TimeDelta::zero());
    }

    let mut last_error = None;
    for timing in timings {
        debug!(scheme = %timing.schemeIdUri, "Attempting clock sync");
        let Some(value) = timing.value.as_deref() else {
            last_error = Some(HibikiError::InvalidTimingSchema(format!(
                "Missing value for {}",
                timing.schemeIdUri
            )));
            continue;
        };

        let result = match timing.schemeIdUri.as_str() {
            "urn:mpeg:dash:utc:http-xsdate:2014" | "urn:mpeg:dash:utc:http-iso:2014" => {
                sync_http_date(client, value).await
            }
            "urn:mpeg:dash:utc:http-head:2014" => sync_http_head(client, value).await,
            "urn:mpeg:dash:utc:direct:2014" => sync_direct(value),
            scheme => Err(HibikiError::InvalidTimingSchema(scheme.to_string())),
        };

        match result {
            Ok(offset) => {
                debug!(offset_milliseconds = offset.num_milliseconds(), "Clock synced");
                return Ok(offset);
            }
            Err(e) => {
                warn!(scheme = %timing.schemeIdUri, error = %e, "Clock sync source failed");
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| HibikiError::InvalidTimingSchema("All sources failed".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_iso8601_variants() {
        assert!(parse_iso8601("2024-05-01T00:00:00Z").is_ok());
        assert!(parse_iso8601("2024-05-01T00:00:00+09:00").is_ok());
        assert!(parse_iso8601("not a date").is_err());
    }

    #[test]
    fn test_offset_midpoint() {
        let before = Utc::now();
        let after = before + TimeDelta::seconds(2);
        let remote = before + TimeDelta::seconds(31);
        // server clock read at the midpoint (t+1s), so the offset is 30s
        assert_eq!(offset_from(remote, before, after), TimeDelta::seconds(30));
    }

    #[tokio::test]
    async fn test_direct_scheme() {
        let mpd = dash_mpd::parse(
            r#"<?xml version="1.0" encoding="utf-8"?>
            <MPD type="dynamic" availabilityStartTime="2024-01-01T00:00:00Z">
              <UTCTiming schemeIdUri="urn:mpeg:dash:utc:direct:2014" value="2124-01-01T00:00:00Z"/>
              <Period id="1"/>
            </MPD>"#,
        )
        .unwrap();

        let offset = sync_clock(&mpd.UTCTiming, &HttpClient::default())
            .await
            .unwrap();
        // most of a century ahead of any sane local clock
        assert!(offset > TimeDelta::days(50 * 365));
    }

    #[tokio::test]
    async fn test_empty_timings_fall_back_to_local_clock() {
        let offset = sync_clock(&[], &HttpClient::default()).await.unwrap();
        assert_eq!(offset, TimeDelta::zero());
    }

    #[tokio::test]
    async fn test_unsupported_scheme_is_an_error() {
        let mpd = dash_mpd::parse(
            r#"<?xml version="1.0" encoding="utf-8"?>
            <MPD type="dynamic">
              <UTCTiming schemeIdUri="urn:mpeg:dash:utc:ntp:2014" value="ntp.example.com"/>
              <Period id="1"/>
            </MPD>"#,
        )
        .unwrap();

        assert!(sync_clock(&mpd.UTCTiming, &HttpClient::default()).await.is_err());
    }
}
