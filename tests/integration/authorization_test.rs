//! Integration tests for the 401 → renew → replay path
use anyhow::Result;
use mockito::Matcher;
use serde_json::json;

use crate::test_harness::{bearer, TestEnvironment};
use dailog_session::{ClientError, HttpMethod, HttpRequest};

#[tokio::test]
async fn test_valid_token_is_sent_once() -> Result<()> {
    let mut env = TestEnvironment::new().await;
    env.logged_in_with("good").await;

    let posts = env
        .server
        .mock("GET", "/api/posts")
        .match_header("authorization", bearer("good").as_str())
        .with_status(200)
        .with_body(r#"[{"id":1}]"#)
        .expect(1)
        .create_async()
        .await;
    let reissue = env.server.mock("POST", "/api/auth/reissue").expect(0).create_async().await;

    let response = env.ctx.transport.get(&env.url("/api/posts")).await?;
    assert_eq!(response.status(), 200);

    posts.assert_async().await;
    reissue.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn test_expired_token_is_renewed_and_replayed() -> Result<()> {
    let mut env = TestEnvironment::new().await;
    env.logged_in_with("stale").await;

    let rejected = env
        .server
        .mock("POST", "/api/posts")
        .match_header("authorization", bearer("stale").as_str())
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let reissue = env
        .server
        .mock("POST", "/api/auth/reissue")
        .with_status(200)
        .with_header("access", "fresh")
        .expect(1)
        .create_async()
        .await;
    let replayed = env
        .server
        .mock("POST", "/api/posts")
        .match_header("authorization", bearer("fresh").as_str())
        .match_body(Matcher::Json(json!({"title": "hello"})))
        .with_status(201)
        .expect(1)
        .create_async()
        .await;

    let response = env
        .ctx
        .transport
        .post_json(&env.url("/api/posts"), &json!({"title": "hello"}))
        .await?;
    assert_eq!(response.status(), 201);
    assert_eq!(env.ctx.store.get().await.as_deref(), Some("fresh"));
    assert!(env.ctx.session.is_logged_in());

    rejected.assert_async().await;
    reissue.assert_async().await;
    replayed.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn test_failed_renewal_surfaces_original_401() -> Result<()> {
    let mut env = TestEnvironment::new().await;
    env.logged_in_with("stale").await;

    let posts = env
        .server
        .mock("GET", "/api/posts")
        .with_status(401)
        .with_body("expired")
        .expect(1)
        .create_async()
        .await;
    let reissue = env
        .server
        .mock("POST", "/api/auth/reissue")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;

    let err = env.ctx.transport.get(&env.url("/api/posts")).await.unwrap_err();
    match &err {
        ClientError::Unauthorized { response, renewed, .. } => {
            assert_eq!(response.body(), "expired");
            assert!(!renewed);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.requires_login());
    assert!(env.ctx.store.get().await.is_none());
    assert_eq!(env.count_events("authorization_exhausted").await, 1);

    posts.assert_async().await;
    reissue.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn test_rejected_replay_is_not_retried_again() -> Result<()> {
    let mut env = TestEnvironment::new().await;
    env.logged_in_with("stale").await;

    let first = env
        .server
        .mock("GET", "/api/posts")
        .match_header("authorization", bearer("stale").as_str())
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let reissue = env
        .server
        .mock("POST", "/api/auth/reissue")
        .with_status(200)
        .with_header("access", "fresh-but-revoked")
        .expect(1)
        .create_async()
        .await;
    let replay = env
        .server
        .mock("GET", "/api/posts")
        .match_header("authorization", bearer("fresh-but-revoked").as_str())
        .with_status(401)
        .expect(1)
        .create_async()
        .await;

    let err = env.ctx.transport.get(&env.url("/api/posts")).await.unwrap_err();
    assert!(matches!(err, ClientError::Unauthorized { renewed: true, .. }));

    first.assert_async().await;
    reissue.assert_async().await;
    replay.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn test_other_errors_pass_through_untouched() -> Result<()> {
    let mut env = TestEnvironment::new().await;
    env.logged_in_with("good").await;

    let forbidden = env
        .server
        .mock("DELETE", "/api/posts/1")
        .with_status(403)
        .expect(1)
        .create_async()
        .await;
    let reissue = env.server.mock("POST", "/api/auth/reissue").expect(0).create_async().await;

    let request = HttpRequest::new(HttpMethod::DELETE, env.url("/api/posts/1"));
    let response = env.ctx.transport.send(request).await?;
    assert_eq!(response.status(), 403);
    assert_eq!(env.ctx.store.get().await.as_deref(), Some("good"));

    forbidden.assert_async().await;
    reissue.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn test_failed_renewal_expires_refresh_cookie() -> Result<()> {
    let mut env = TestEnvironment::new().await;
    env.http.set_cookie("refresh=r1; Path=/");

    let with_cookie = env
        .server
        .mock("POST", "/api/auth/reissue")
        .match_header("cookie", "refresh=r1")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let without_cookie = env
        .server
        .mock("POST", "/api/auth/reissue")
        .match_header("cookie", Matcher::Missing)
        .with_status(401)
        .expect(1)
        .create_async()
        .await;

    assert!(env.ctx.renewal.renew().await.is_err());
    assert!(env.ctx.renewal.renew().await.is_err());

    with_cookie.assert_async().await;
    without_cookie.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn test_renewal_picks_up_rotated_refresh_cookie() -> Result<()> {
    let mut env = TestEnvironment::new().await;
    env.http.set_cookie("refresh=r1; Path=/");

    let first = env
        .server
        .mock("POST", "/api/auth/reissue")
        .match_header("cookie", "refresh=r1")
        .with_status(200)
        .with_header("access", "t2")
        .with_header("set-cookie", "refresh=r2; Path=/; HttpOnly")
        .expect(1)
        .create_async()
        .await;
    let second = env
        .server
        .mock("POST", "/api/auth/reissue")
        .match_header("cookie", "refresh=r2")
        .with_status(200)
        .with_header("access", "t3")
        .expect(1)
        .create_async()
        .await;

    assert_eq!(env.ctx.renewal.renew().await?, "t2");
    assert_eq!(env.ctx.renewal.renew().await?, "t3");
    assert_eq!(env.ctx.store.get().await.as_deref(), Some("t3"));

    first.assert_async().await;
    second.assert_async().await;
    Ok(())
}
