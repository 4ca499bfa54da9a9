use crate::*;

use reqwest::StatusCode;
use serde_json::json;
use visitrack_services::Sweeper;

/// Capacity is per instance even though the store is shared.
#[tokio::test]
async fn test_capacity_is_per_instance() -> Result<()> {
    let store = shared_store();
    let a = spawn_server(ServerOptions::new("A", 1).store(store.clone())).await?;
    let b = spawn_server(ServerOptions::new("B", 1).store(store.clone())).await?;

    a.admit("10.0.0.1").await?;
    assert_eq!(
        a.load_page("10.0.0.2").await?.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
    b.admit("10.0.0.2").await?;
    assert_eq!(store.count_total()?, 2);
    Ok(())
}

/// Viewers on one instance see sessions from the other.
#[tokio::test]
async fn test_viewers_see_every_instance() -> Result<()> {
    let store = shared_store();
    let a = spawn_server(ServerOptions::new("A", 10).store(store.clone())).await?;
    let b = spawn_server(ServerOptions::new("B", 10).store(store)).await?;

    let on_a = a.admit("10.0.0.1").await?;
    let (mut viewer_a, _) = a.connect().await?;
    send(&mut viewer_a, json!({"type": "register_session", "session_id": on_a})).await?;
    wait_for_sessions(&mut viewer_a, &[on_a.as_str()]).await?;

    // B's page load and registration only broadcast on B
    let on_b = b.admit("10.0.0.2").await?;
    let (mut viewer_b, snapshot) = b.connect().await?;
    assert_eq!(snapshot.as_array().map(Vec::len), Some(2));
    send(&mut viewer_b, json!({"type": "register_session", "session_id": on_b})).await?;
    wait_for_sessions(&mut viewer_b, &[on_a.as_str(), on_b.as_str()]).await?;

    // A's sweeper notices the membership change and refreshes its viewers
    let report = Sweeper::new(a.tracker.clone(), Duration::from_secs(30)).tick()?;
    assert_eq!(report.expired, 0);
    assert!(report.broadcast);
    wait_for_sessions(&mut viewer_a, &[on_a.as_str(), on_b.as_str()]).await?;

    // B's viewer leaving shows up on A the same way
    viewer_b.close(None).await?;
    let tracker = b.tracker.clone();
    eventually(move || tracker.store().count_total().ok() == Some(1)).await?;
    assert!(Sweeper::new(a.tracker.clone(), Duration::from_secs(30)).tick()?.broadcast);
    wait_for_sessions(&mut viewer_a, &[on_a.as_str()]).await?;
    Ok(())
}

/// A client the load balancer spreads across instances is rate limited
/// once, against the bucket both instances share.
#[tokio::test]
async fn test_rate_limit_is_shared_across_instances() -> Result<()> {
    let db = SharedDb::open("shared-rate-limit")?;
    let a = spawn_server(db.options("A", 100)?.rate_limit(3)).await?;
    let b = spawn_server(db.options("B", 100)?.rate_limit(3)).await?;

    assert_eq!(a.load_page("10.0.0.1").await?.status(), StatusCode::OK);
    assert_eq!(b.load_page("10.0.0.1").await?.status(), StatusCode::OK);
    assert_eq!(a.load_page("10.0.0.1").await?.status(), StatusCode::OK);

    let limited = b.load_page("10.0.0.1").await?;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        a.load_page("10.0.0.1").await?.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(db.store.count_total()?, 3);

    assert_eq!(b.load_page("10.0.0.2").await?.status(), StatusCode::OK);
    Ok(())
}

/// A page load waiting on another process's database write lock leaves
/// the runtime free: other tasks keep running until the lock is released
/// and the load completes.
#[tokio::test]
async fn test_locked_database_does_not_stall_the_runtime() -> Result<()> {
    let db = SharedDb::open("locked")?;
    let server = spawn_server(db.options("A", 100)?).await?;
    let path = db.path.clone();

    let (locked_tx, locked_rx) = tokio::sync::oneshot::channel();
    let holder = std::thread::spawn(move || -> Result<()> {
        let conn = rusqlite::Connection::open(&path)?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        let _ = locked_tx.send(());
        std::thread::sleep(Duration::from_millis(500));
        conn.execute_batch("COMMIT")?;
        Ok(())
    });
    locked_rx.await?;

    let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let ticker = {
        let ticks = ticks.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(10));
            loop {
                interval.tick().await;
                ticks.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        })
    };

    let page = server.load_page("10.0.0.1").await?;
    ticker.abort();
    holder
        .join()
        .map_err(|_| anyhow::anyhow!("lock holder panicked"))??;

    assert_eq!(page.status(), StatusCode::OK);
    let ticks = ticks.load(std::sync::atomic::Ordering::SeqCst);
    assert!(ticks >= 10, "runtime stalled behind the locked database ({ticks} ticks)");
    assert_eq!(db.store.count_total()?, 1);
    Ok(())
}
