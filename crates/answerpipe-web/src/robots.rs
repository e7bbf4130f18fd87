use std::time::Duration;
use url::Url;

/// Best-effort robots.txt gate, fail-open by design: the only outcome that
/// denies a fetch is a 200 response whose body carries an explicit
/// `Disallow:` rule covering the target path. Transport errors, timeouts,
/// and non-200 statuses all allow.
pub async fn path_allowed(client: &reqwest::Client, target: &Url, timeout: Duration) -> bool {
    let Some(host) = target.host_str() else {
        return true;
    };
    let authority = match target.port() {
        Some(p) => format!("{host}:{p}"),
        None => host.to_string(),
    };
    let robots_url = format!("{}://{}/robots.txt", target.scheme(), authority);

    let resp = match client.get(&robots_url).timeout(timeout).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(url = %robots_url, error = %e, "robots fetch failed, allowing");
            return true;
        }
    };
    if resp.status() != reqwest::StatusCode::OK {
        return true;
    }
    let body = match resp.text().await {
        Ok(b) => b,
        Err(_) => return true,
    };
    let denied = disallows(&body, target.path());
    if denied {
        tracing::debug!(url = %robots_url, path = target.path(), "robots disallow match");
    }
    !denied
}

/// Simplified matching: any `Disallow:` rule whose value is a prefix of the
/// path counts, regardless of user-agent groups. Empty rules allow.
fn disallows(body: &str, path: &str) -> bool {
    for line in body.lines() {
        let line = line.trim();
        let Some(rest) = line
            .strip_prefix("Disallow:")
            .or_else(|| line.strip_prefix("disallow:"))
        else {
            continue;
        };
        let rule = rest.split('#').next().unwrap_or("").trim();
        if rule.is_empty() {
            continue;
        }
        if path.starts_with(rule) {
            return true;
        }
    }
    false
}
