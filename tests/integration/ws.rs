use crate::*;

use serde_json::json;
use visitrack_core::SessionId;

#[tokio::test]
async fn test_snapshot_register_and_heartbeat() -> Result<()> {
    let server = spawn_server(ServerOptions::new("A", 10)).await?;
    let id = server.admit("10.0.0.1").await?;

    let (mut ws, snapshot) = server.connect().await?;
    let sessions = snapshot.as_array().context("snapshot is not a list")?;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["id"], id.as_str());
    assert_eq!(sessions[0]["ip"], "10.0.0.1");
    assert_eq!(sessions[0]["instance_id"], "A");
    assert_eq!(sessions[0]["metadata"]["browser"], "Firefox");

    send(&mut ws, json!({"type": "register_session", "session_id": id})).await?;
    wait_for_sessions(&mut ws, &[id.as_str()]).await?;

    send(&mut ws, json!({"type": "heartbeat", "session_id": id})).await?;
    let ack = next_of_type(&mut ws, "heartbeat_ack").await?;
    assert_eq!(ack["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn test_disconnect_removes_registered_session() -> Result<()> {
    let server = spawn_server(ServerOptions::new("A", 10)).await?;
    let s1 = server.admit("10.0.0.1").await?;
    let s2 = server.admit("10.0.0.2").await?;

    let (mut ws1, _) = server.connect().await?;
    let (mut ws2, _) = server.connect().await?;
    send(&mut ws1, json!({"type": "register_session", "session_id": s1})).await?;
    send(&mut ws2, json!({"type": "register_session", "session_id": s2})).await?;
    wait_for_sessions(&mut ws2, &[s1.as_str(), s2.as_str()]).await?;

    ws1.close(None).await?;

    wait_for_sessions(&mut ws2, &[s2.as_str()]).await?;
    assert!(server.tracker.store().get(&SessionId::from(s1))?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_unregistered_disconnect_removes_nothing() -> Result<()> {
    let server = spawn_server(ServerOptions::new("A", 10)).await?;
    server.admit("10.0.0.1").await?;

    let (mut ws, _) = server.connect().await?;
    assert_eq!(server.tracker.connections().open_count(), 1);
    ws.close(None).await?;

    let tracker = server.tracker.clone();
    eventually(move || tracker.connections().open_count() == 0).await?;
    assert_eq!(server.tracker.store().count_total()?, 1);
    Ok(())
}

/// A reloaded page discards the session it had before.
#[tokio::test]
async fn test_cleanup_old_session() -> Result<()> {
    let server = spawn_server(ServerOptions::new("A", 10)).await?;
    let old = server.admit("10.0.0.1").await?;
    let new = server.admit("10.0.0.1").await?;

    let (mut ws, _) = server.connect().await?;
    send(&mut ws, json!({"type": "cleanup_old_session", "old_session_id": old})).await?;
    send(&mut ws, json!({"type": "register_session", "session_id": new})).await?;

    wait_for_sessions(&mut ws, &[new.as_str()]).await?;
    assert!(server.tracker.store().get(&SessionId::from(old))?.is_none());
    Ok(())
}

/// Re-registering a session on a second connection moves the link there.
#[tokio::test]
async fn test_last_registration_wins() -> Result<()> {
    let server = spawn_server(ServerOptions::new("A", 10)).await?;
    let id = server.admit("10.0.0.1").await?;

    let (mut first, _) = server.connect().await?;
    let (mut second, _) = server.connect().await?;
    send(&mut first, json!({"type": "register_session", "session_id": id})).await?;
    wait_for_sessions(&mut first, &[id.as_str()]).await?;
    send(&mut second, json!({"type": "register_session", "session_id": id})).await?;
    wait_for_sessions(&mut second, &[id.as_str()]).await?;

    // the displaced connection closing no longer removes the session
    first.close(None).await?;
    let tracker = server.tracker.clone();
    eventually(move || tracker.connections().open_count() == 1).await?;
    assert_eq!(server.tracker.store().count_total()?, 1);

    second.close(None).await?;
    let tracker = server.tracker.clone();
    eventually(move || tracker.store().count_total().ok() == Some(0)).await?;
    Ok(())
}

#[tokio::test]
async fn test_bad_frames() -> Result<()> {
    let server = spawn_server(ServerOptions::new("A", 10)).await?;
    let (mut ws, _) = server.connect().await?;

    send(&mut ws, json!({"type": "self_destruct"})).await?;
    let err = next_json(&mut ws).await?;
    assert_eq!(err["type"], "error");

    // heartbeat for an unknown or malformed id gets no ack
    send(&mut ws, json!({"type": "heartbeat", "session_id": "../../etc"})).await?;
    send(&mut ws, json!({"type": "heartbeat", "session_id": "deadbeef"})).await?;
    send(&mut ws, json!({"type": "nonsense"})).await?;
    let next = next_json(&mut ws).await?;
    assert_eq!(next["type"], "error");
    Ok(())
}
