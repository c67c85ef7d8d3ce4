use anyhow::{Context, Result};
use reqwest::{cookie::Jar, header, Client};
use std::sync::Arc;

/// Creates an HTTP client that presents like a real browser, to avoid
/// trivially tripping bot detection on listing sites. An optional shared
/// cookie jar lets cookies persist across requests and be pre-seeded from a
/// browser export.
pub fn create_client_with_cookies(user_agent: &str, cookie_jar: Option<Arc<Jar>>) -> Result<Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        header::HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8",
        ),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        header::HeaderValue::from_static("en-US,en;q=0.9"),
    );
    headers.insert(
        header::ACCEPT_ENCODING,
        header::HeaderValue::from_static("gzip, deflate, br"),
    );
    headers.insert(header::DNT, header::HeaderValue::from_static("1"));
    headers.insert(header::CONNECTION, header::HeaderValue::from_static("keep-alive"));
    headers.insert(
        "Upgrade-Insecure-Requests",
        header::HeaderValue::from_static("1"),
    );
    headers.insert("Sec-Fetch-Dest", header::HeaderValue::from_static("document"));
    headers.insert("Sec-Fetch-Mode", header::HeaderValue::from_static("navigate"));
    headers.insert("Sec-Fetch-Site", header::HeaderValue::from_static("none"));
    headers.insert("Sec-Fetch-User", header::HeaderValue::from_static("?1"));
    headers.insert("Cache-Control", header::HeaderValue::from_static("max-age=0"));

    let mut builder = Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .timeout(std::time::Duration::from_secs(30));

    if let Some(jar) = cookie_jar {
        builder = builder.cookie_provider(jar);
    } else {
        builder = builder.cookie_store(true);
    }

    Ok(builder.build()?)
}

/// Load cookies exported from a browser (JSON array of objects with "name"
/// and "value" fields, as produced by extensions like Cookie Editor) into a
/// jar, scoped to the given site. Returns the number of cookies loaded.
pub fn load_cookies_into_jar(jar: &Jar, path: &str, site_url: &str) -> Result<usize> {
    let cookie_data =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path))?;
    let cookies: Vec<serde_json::Value> =
        serde_json::from_str(&cookie_data).with_context(|| format!("invalid cookie JSON in {}", path))?;

    let parsed = site_url
        .parse::<reqwest::Url>()
        .with_context(|| format!("invalid site URL for cookies: {}", site_url))?;
    let base = format!(
        "{}://{}",
        parsed.scheme(),
        parsed.host_str().context("site URL has no host")?
    );
    let cookie_url = base
        .parse::<reqwest::Url>()
        .context("failed to build cookie base URL")?;

    let mut loaded = 0;
    for cookie in &cookies {
        if let (Some(name), Some(value)) = (cookie.get("name"), cookie.get("value")) {
            let name = name.as_str().unwrap_or("");
            let value = value.as_str().unwrap_or("");
            jar.add_cookie_str(&format!("{}={}", name, value), &cookie_url);
            tracing::debug!("Loaded cookie: {}", name);
            loaded += 1;
        }
    }

    tracing::info!("Loaded {} cookies from {}", loaded, path);
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_client_succeeds() {
        assert!(create_client_with_cookies("Mozilla/5.0 (Test Agent)", None).is_ok());
    }

    #[test]
    fn test_create_client_with_various_user_agents() {
        let user_agents = [
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64)",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)",
        ];
        for ua in user_agents {
            assert!(
                create_client_with_cookies(ua, None).is_ok(),
                "failed for user agent: {}",
                ua
            );
        }
    }

    #[test]
    fn test_create_client_with_shared_jar() {
        let jar = Arc::new(Jar::default());
        assert!(create_client_with_cookies("Mozilla/5.0 (Test Agent)", Some(jar)).is_ok());
    }

    #[test]
    fn test_load_cookies_rejects_missing_file() {
        let jar = Jar::default();
        assert!(load_cookies_into_jar(&jar, "/nonexistent/cookies.json", "https://example.com").is_err());
    }

    #[test]
    fn test_load_cookies_from_json() {
        let dir = std::env::temp_dir().join("rentgrid_cookie_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cookies.json");
        std::fs::write(
            &path,
            r#"[{"name": "session", "value": "abc"}, {"name": "datadome", "value": "xyz"}, {"other": true}]"#,
        )
        .unwrap();

        let jar = Jar::default();
        let loaded =
            load_cookies_into_jar(&jar, path.to_str().unwrap(), "https://www.example.com/search")
                .unwrap();
        assert_eq!(loaded, 2);
    }
}
