use crate::*;

use reqwest::StatusCode;

#[tokio::test]
async fn test_admin_status_and_sessions() -> Result<()> {
    let server = spawn_server(ServerOptions::new("A", 5)).await?;
    let id = server.admit("10.0.0.1").await?;

    let status: serde_json::Value = reqwest::get(server.admin_url("/status")).await?.json().await?;
    assert_eq!(status["instance_id"], "A");
    assert_eq!(status["sessions"], 1);
    assert_eq!(status["total_sessions"], 1);
    assert_eq!(status["limits"]["max_users_per_instance"], 5);

    let list: serde_json::Value = reqwest::get(server.admin_url("/sessions")).await?.json().await?;
    assert_eq!(list["sessions"][0]["session_id"], id.as_str());
    assert_eq!(list["sessions"][0]["ip"], "10.0.0.1");

    let one: serde_json::Value = reqwest::get(server.admin_url(&format!("/sessions/{id}")))
        .await?
        .json()
        .await?;
    assert_eq!(one["instance_id"], "A");
    assert_eq!(one["metadata"]["os"], "Linux");
    Ok(())
}

#[tokio::test]
async fn test_admin_drop_notifies_viewers() -> Result<()> {
    let server = spawn_server(ServerOptions::new("A", 5)).await?;
    let keep = server.admit("10.0.0.1").await?;
    let gone = server.admit("10.0.0.2").await?;
    let (mut viewer, _) = server.connect().await?;

    let client = reqwest::Client::new();
    let url = server.admin_url(&format!("/sessions/{gone}"));
    let resp: serde_json::Value = client.delete(&url).send().await?.json().await?;
    assert_eq!(resp["dropped"], true);
    wait_for_sessions(&mut viewer, &[keep.as_str()]).await?;

    let again: serde_json::Value = client.delete(&url).send().await?.json().await?;
    assert_eq!(again["dropped"], false);

    assert_eq!(reqwest::get(&url).await?.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        reqwest::get(server.admin_url("/sessions/bad%20id")).await?.status(),
        StatusCode::BAD_REQUEST
    );
    Ok(())
}
