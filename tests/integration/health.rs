use crate::*;

#[tokio::test]
async fn test_health_reports_local_and_total() -> Result<()> {
    let store = shared_store();
    let a = spawn_server(ServerOptions::new("A", 10).store(store.clone())).await?;
    let b = spawn_server(ServerOptions::new("B", 10).store(store)).await?;

    a.admit("10.0.0.1").await?;
    b.admit("10.0.0.2").await?;
    b.admit("10.0.0.3").await?;

    let health: serde_json::Value = reqwest::get(a.url("/health")).await?.json().await?;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["instance_id"], "A");
    assert_eq!(health["connections"], 1);
    assert_eq!(health["total_connections"], 3);

    let health: serde_json::Value = reqwest::get(b.url("/health")).await?.json().await?;
    assert_eq!(health["connections"], 2);
    assert_eq!(health["total_connections"], 3);
    Ok(())
}
