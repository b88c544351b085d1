//! Marketplace response decoding
//!
//! Body shapes differ slightly between resources and API revisions. List
//! resources arrive either as a bare array or wrapped in an object keyed by
//! the resource name (`{"sales": [...]}`); object resources may likewise be
//! wrapped. Rate-limit metadata comes from response headers.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::{SubPayload, SubResource};
use crate::ports::{FetchError, RateLimitSnapshot};

pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Reset values at or above this are unix timestamps, below it relative seconds
const EPOCH_THRESHOLD: u64 = 1_000_000_000;

/// Wrapper keys tried, in order, when a body is not the bare shape
const GENERIC_WRAPPERS: [&str; 3] = ["data", "items", "results"];

/// Decode a JSON body into the payload for `resource`
pub fn decode_payload(resource: SubResource, body: Value) -> Result<SubPayload, FetchError> {
    let payload = match resource {
        SubResource::Collection => SubPayload::Collection(decode_object(body, resource)?),
        SubResource::Stats => SubPayload::Stats(decode_object(body, resource)?),
        SubResource::Sales => SubPayload::Sales(decode_list(body, resource)?),
        SubResource::Offers => SubPayload::Offers(decode_list(body, resource)?),
        SubResource::Owners => SubPayload::Owners(decode_list(body, resource)?),
        SubResource::Events => SubPayload::Events(decode_list(body, resource)?),
        SubResource::Traits => SubPayload::Traits(decode_object(body, resource)?),
    };
    Ok(payload)
}

fn unwrap_field(mut body: Value, resource: SubResource) -> Value {
    if let Value::Object(map) = &mut body {
        if let Some(inner) = map.remove(resource.as_str()) {
            return inner;
        }
        for key in GENERIC_WRAPPERS {
            if let Some(inner) = map.remove(key) {
                return inner;
            }
        }
    }
    body
}

fn decode_list<T: DeserializeOwned>(body: Value, resource: SubResource) -> Result<Vec<T>, FetchError> {
    let inner = match body {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => Value::Array(items),
        other => unwrap_field(other, resource),
    };

    if !inner.is_array() {
        return Err(FetchError::Decode(format!(
            "expected a list of {}, got {}",
            resource,
            json_kind(&inner)
        )));
    }
    Ok(serde_json::from_value(inner)?)
}

fn decode_object<T: DeserializeOwned>(body: Value, resource: SubResource) -> Result<T, FetchError> {
    let inner = match body {
        Value::Object(mut map) => {
            let wrapper = std::iter::once(resource.as_str())
                .chain(GENERIC_WRAPPERS)
                .find(|key| map.get(*key).map_or(false, Value::is_object));
            match wrapper.and_then(|key| map.remove(key)) {
                Some(inner) => inner,
                None => Value::Object(map),
            }
        }
        other => other,
    };

    if !inner.is_object() {
        return Err(FetchError::Decode(format!(
            "expected a {} object, got {}",
            resource,
            json_kind(&inner)
        )));
    }
    Ok(serde_json::from_value(inner)?)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Read rate-limit headers relative to the current unix time
pub fn parse_rate_limit(headers: &HeaderMap, now_epoch_secs: u64) -> RateLimitSnapshot {
    let remaining = header_str(headers, RATE_LIMIT_REMAINING).and_then(|v| v.parse::<u32>().ok());
    let reset_after = header_str(headers, RATE_LIMIT_RESET)
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| reset_duration(v, now_epoch_secs));

    RateLimitSnapshot {
        remaining,
        reset_after,
    }
}

fn reset_duration(value: f64, now_epoch_secs: u64) -> Duration {
    if value >= EPOCH_THRESHOLD as f64 {
        Duration::from_secs((value as u64).saturating_sub(now_epoch_secs))
    } else {
        Duration::from_secs_f64(value)
    }
}

/// `Retry-After` in seconds; HTTP-date values are not used by the marketplace
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_str(headers, RETRY_AFTER.as_str())
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(Duration::from_secs_f64)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Pull a readable message out of an error body
pub fn error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        ["message", "error", "detail"]
            .iter()
            .find_map(|key| v.get(*key).and_then(Value::as_str).map(str::to_string))
    });

    from_json.unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            "no response body".to_string()
        } else {
            trimmed.chars().take(200).collect()
        }
    })
}
