use crate::*;

use reqwest::StatusCode;
use visitrack_core::SessionId;

/// Capacity of one: a second visitor is refused until the first leaves.
#[tokio::test]
async fn test_capacity_scenario() -> Result<()> {
    let server = spawn_server(ServerOptions::new("A", 1)).await?;
    let store = server.tracker.store().clone();

    let s1 = server.admit("10.0.0.1").await?;
    assert_eq!(store.count_total()?, 1);

    let refused = server.load_page("10.0.0.2").await?;
    assert_eq!(refused.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(refused.headers().get("retry-after").is_none());
    assert!(session_id_from_page(&refused.text().await?).is_none());
    assert_eq!(store.count_total()?, 1);

    assert!(store.remove(&SessionId::from(s1))?);

    let s3 = server.admit("10.0.0.2").await?;
    assert_eq!(store.count_total()?, 1);
    assert_eq!(store.list_active()?[0].ip, "10.0.0.2");
    assert_eq!(store.list_active()?[0].session_id.as_str(), s3);
    Ok(())
}

/// "Slow down" and "no room" are distinguishable.
#[tokio::test]
async fn test_rate_limit_is_per_address() -> Result<()> {
    let server = spawn_server(ServerOptions::new("A", 100).rate_limit(3)).await?;

    for _ in 0..3 {
        assert_eq!(server.load_page("10.0.0.1").await?.status(), StatusCode::OK);
    }

    let limited = server.load_page("10.0.0.1").await?;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        limited
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok()),
        Some("60")
    );
    assert_eq!(server.tracker.store().count_total()?, 3);

    // another address has its own window
    assert_eq!(server.load_page("10.0.0.2").await?.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_page_routes() -> Result<()> {
    let server = spawn_server(ServerOptions::new("A", 100)).await?;

    for (i, path) in ["/", "/app-test", "/app-test/"].iter().enumerate() {
        let resp = server.get_as(path, &format!("10.0.1.{i}")).await?;
        assert_eq!(resp.status(), StatusCode::OK, "{path}");
        let html = resp.text().await?;
        assert!(session_id_from_page(&html).is_some(), "{path}");
        assert!(html.contains("/app-test/ws"), "{path}");
    }

    let missing = server.get_as("/not-the-secret", "10.0.1.9").await?;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    Ok(())
}

/// Metadata is classified and sanitized before it is stored. The address
/// is the one the load balancer appended, not what the client claimed.
#[tokio::test]
async fn test_page_load_records_visitor_metadata() -> Result<()> {
    let server = spawn_server(ServerOptions::new("A", 100)).await?;

    let resp = server
        .client
        .get(server.url("/app-test"))
        .header("x-forwarded-for", "198.18.0.9, 203.0.113.5")
        .header(
            "user-agent",
            "Mozilla/5.0 (Windows NT 10.0) Chrome/126.0 Safari/537.36",
        )
        .header("referer", "https://example.test/?q=<b>")
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let id = session_id_from_page(&resp.text().await?).context("no session id")?;

    let session = server
        .tracker
        .store()
        .get(&SessionId::from(id))?
        .context("session missing")?;
    assert_eq!(session.ip, "203.0.113.5");
    assert_eq!(session.instance_id, "A");
    assert_eq!(session.metadata["browser"], "Chrome");
    assert_eq!(session.metadata["os"], "Windows");
    assert_eq!(session.metadata["referer"], "https://example.test/?q=&lt;b&gt;");
    Ok(())
}
