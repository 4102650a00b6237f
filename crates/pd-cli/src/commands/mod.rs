pub mod report;
pub mod schedule;
pub mod status;

pub fn api_client() -> reqwest::Client {
    reqwest::Client::new()
}

/// Map common reqwest errors to user-friendly messages.
pub fn friendly_error(err: reqwest::Error) -> anyhow::Error {
    if err.is_connect() {
        anyhow::anyhow!(
            "Could not connect to the pingdom daemon. Is it running?\n  \
             (hint: start it with `pd-daemon` or check --api-url)"
        )
    } else if err.is_timeout() {
        anyhow::anyhow!("Request timed out. The daemon may still be collecting.")
    } else {
        anyhow::anyhow!("API request failed: {err}")
    }
}

/// Turn a non-2xx response into an error carrying the API's `message`, or
/// the raw body when it is not JSON.
pub async fn check(resp: reqwest::Response) -> anyhow::Result<serde_json::Value> {
    let status = resp.status();
    if status.is_success() {
        return resp.json().await.map_err(friendly_error);
    }
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|body| body["message"].as_str().map(str::to_owned))
        .unwrap_or_else(|| match text.trim() {
            "" => "no details".to_owned(),
            raw => raw.to_owned(),
        });
    anyhow::bail!("{message} (HTTP {status})")
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::{routing::get, Json, Router};
    use serde_json::json;

    use super::*;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn check_get(base: &str) -> anyhow::Result<serde_json::Value> {
        let resp = api_client().get(format!("{base}/x")).send().await.unwrap();
        check(resp).await
    }

    #[tokio::test]
    async fn plain_text_error_keeps_status_and_body() {
        let base = serve(Router::new().route(
            "/x",
            get(|| async { (StatusCode::BAD_GATEWAY, "upstream proxy error") }),
        ))
        .await;

        let msg = check_get(&base).await.unwrap_err().to_string();
        assert!(msg.contains("upstream proxy error"), "{msg}");
        assert!(msg.contains("502"), "{msg}");
    }

    #[tokio::test]
    async fn json_error_uses_api_message() {
        let base = serve(Router::new().route(
            "/x",
            get(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"status": "error", "message": "start must precede end"})),
                )
            }),
        ))
        .await;

        let msg = check_get(&base).await.unwrap_err().to_string();
        assert_eq!(msg, "start must precede end (HTTP 400 Bad Request)");
    }

    #[tokio::test]
    async fn empty_error_body_reports_no_details() {
        let base = serve(Router::new().route("/x", get(|| async { StatusCode::SERVICE_UNAVAILABLE })))
            .await;

        let msg = check_get(&base).await.unwrap_err().to_string();
        assert!(msg.starts_with("no details (HTTP 503"), "{msg}");
    }

    #[tokio::test]
    async fn success_returns_decoded_body() {
        let base = serve(Router::new().route("/x", get(|| async { Json(json!({"ok": true})) }))).await;
        assert_eq!(check_get(&base).await.unwrap(), json!({"ok": true}));
    }
}
