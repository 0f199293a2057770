use std::time::Duration;

use crate::agent::StepError;
use serde_json::Value;
use ureq::{self, Agent};

/// Timeout applied when the caller does not pick one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn agent(timeout: Duration) -> Agent {
    let config = Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build();

    config.into()
}

/// POST a JSON body with extra headers and decode the JSON response.
///
/// Non-2xx responses become [`StepError::Transient`] for 408/429/5xx and
/// [`StepError::Invalid`] otherwise, with the response body in the message.
pub fn post_json(
    url: &str,
    headers: &[(&str, &str)],
    body: &Value,
    timeout: Duration,
) -> Result<Value, StepError> {
    let mut request = agent(timeout).post(url);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }

    let mut response = request.send_json(body)?;
    let status = response.status().as_u16();
    let text = response.body_mut().read_to_string()?;

    if !(200..300).contains(&status) {
        let msg = format!("{url} returned {status}: {text}");
        return Err(if status == 408 || status == 429 || status >= 500 {
            StepError::transient(msg)
        } else {
            StepError::invalid(msg)
        });
    }

    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_post_json_bad_url_returns_error() {
        let body = json!({"key": "value"});
        let result = post_json(
            "http://localhost:1/nope",
            &[("x-api-key", "k")],
            &body,
            Duration::from_secs(2),
        );
        assert!(matches!(result, Err(StepError::Transient(_))));
    }
}
