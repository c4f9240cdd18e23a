#![cfg(feature = "reqwest")]

// crates.io
use httpmock::prelude::*;
use serde_json::json;
// self
use session_broker::{
	_preludet::*,
	auth::TokenSecret,
	normalize::{FailureKind, PayloadShape},
	pipeline::{CONNECTIVITY_MESSAGE, RequestContext},
	redirect::RedirectMode,
};

fn live_token(subject: &str) -> String {
	unsigned_token(subject, OffsetDateTime::now_utc() + Duration::hours(1))
}

#[tokio::test]
async fn credentials_are_attached_and_bare_tokens_are_healed() {
	let server = MockServer::start_async().await;
	let token = live_token("u-42");
	let mock = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/api/v1/subscriptions")
				.header("authorization", format!("Bearer {token}"))
				.header("x-user-id", "u-42");
			then.status(200)
				.header("content-type", "application/json")
				.json_body(json!({ "data": { "subscriptions": [{ "id": "s-1", "topic": "billing" }] } }));
		})
		.await;
	let (session, _) = build_reqwest_test_session(test_config(&server.base_url()));

	session
		.credentials()
		.set(session_broker::store::CredentialKey::AccessToken, &token)
		.expect("Seeding a bare token should succeed.");

	let response = session
		.send(
			RequestContext::get("/subscriptions"),
			&PayloadShape::list("subscriptions").with_fields(["id", "topic"]),
		)
		.await;

	mock.assert_async().await;

	assert!(response.ok());
	assert_eq!(response.data(), Some(&json!([{ "id": "s-1", "topic": "billing" }])));
	assert_eq!(
		session.credentials().access_token().expect("Store read should succeed."),
		Some(TokenSecret::new(format!("Bearer {token}")))
	);
}

#[tokio::test]
async fn expired_token_is_refreshed_and_the_call_retried_once() {
	let server = MockServer::start_async().await;
	let old = live_token("u-1");
	let new = format!("{}2", live_token("u-1"));
	let rejected = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/v1/notifications").header("authorization", format!("Bearer {old}"));
			then.status(401).json_body(json!({ "error": "Token expired" }));
		})
		.await;
	let accepted = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/v1/notifications").header("authorization", format!("Bearer {new}"));
			then.status(200).json_body(json!([{ "id": "n-1", "title": "Hello" }]));
		})
		.await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/api/auth/refresh")
				.json_body(json!({ "refreshToken": "r-1" }));
			then.status(200).json_body(json!({ "accessToken": new }));
		})
		.await;
	let (session, _) = build_reqwest_test_session(test_config(&server.base_url()));

	session.credentials().set_access_token(&TokenSecret::new(&old)).expect("Seeding should succeed.");
	session.credentials().set_refresh_token(&TokenSecret::new("r-1")).expect("Seeding should succeed.");

	let response = session.send(RequestContext::get("notifications"), &PayloadShape::list(None)).await;

	rejected.assert_calls_async(1).await;
	refresh.assert_calls_async(1).await;
	accepted.assert_calls_async(1).await;

	assert!(response.ok());
	assert_eq!(response.data(), Some(&json!([{ "id": "n-1", "title": "Hello" }])));
	assert_eq!(
		session
			.credentials()
			.refresh_token()
			.expect("Store read should succeed.")
			.map(|token| token.expose().to_owned()),
		Some("r-1".into()),
		"A refresh without a rotated token keeps the previous refresh token."
	);
}

#[tokio::test]
async fn concurrent_401s_share_one_refresh_call() {
	let server = MockServer::start_async().await;
	let old = live_token("u-1");
	let new = format!("{}x", live_token("u-1"));
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/api/auth/refresh");
			then.status(200)
				.delay(std::time::Duration::from_millis(150))
				.json_body(json!({ "accessToken": new, "refreshToken": "r-2" }));
		})
		.await;
	let rejected = server
		.mock_async(|when, then| {
			when.path_includes("/api/v1/topics/").header("authorization", format!("Bearer {old}"));
			then.status(401);
		})
		.await;
	let accepted = server
		.mock_async(|when, then| {
			when.path_includes("/api/v1/topics/").header("authorization", format!("Bearer {new}"));
			then.status(200).json_body(json!({ "status": "success", "data": { "id": "t" } }));
		})
		.await;
	let (session, _) = build_reqwest_test_session(test_config(&server.base_url()));

	session.credentials().set_access_token(&TokenSecret::new(&old)).expect("Seeding should succeed.");
	session.credentials().set_refresh_token(&TokenSecret::new("r-1")).expect("Seeding should succeed.");

	let shape = PayloadShape::record(None);
	let (a, b, c, d, e) = tokio::join!(
		session.send(RequestContext::get("/topics/1"), &shape),
		session.send(RequestContext::get("/topics/2"), &shape),
		session.send(RequestContext::get("/topics/3"), &shape),
		session.send(RequestContext::get("/topics/4"), &shape),
		session.send(RequestContext::get("/topics/5"), &shape),
	);

	for response in [a, b, c, d, e] {
		assert!(response.ok(), "Every request should succeed after the shared refresh.");
	}

	refresh.assert_calls_async(1).await;
	rejected.assert_calls_async(5).await;
	accepted.assert_calls_async(5).await;

	assert_eq!(session.coordinator().metrics().network_calls(), 1);
	assert_eq!(
		session
			.credentials()
			.refresh_token()
			.expect("Store read should succeed.")
			.map(|token| token.expose().to_owned()),
		Some("r-2".into())
	);
}

#[tokio::test]
async fn unrecoverable_401_clears_credentials_and_redirects() {
	let server = MockServer::start_async().await;
	let api = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/v1/me");
			then.status(401).json_body(json!({ "message": "Session revoked" }));
		})
		.await;
	let refresh = server
		.mock_async(|when, then| {
			when.path("/api/auth/refresh");
			then.status(401).json_body(json!({ "error": "Refresh token revoked" }));
		})
		.await;
	let (session, _) = build_reqwest_test_session(test_config(&server.base_url()));
	let navigator = std::sync::Arc::new(RecordingNavigator::default());
	let session = session.with_navigator(navigator.clone());

	session.credentials().set_access_token(&TokenSecret::new(live_token("u-1"))).expect("Seeding should succeed.");
	session.credentials().set_refresh_token(&TokenSecret::new("r-1")).expect("Seeding should succeed.");
	session.credentials().set_authenticated(true).expect("Seeding should succeed.");

	let response = session.send(RequestContext::get("/me"), &PayloadShape::any()).await;

	api.assert_calls_async(1).await;
	refresh.assert_calls_async(1).await;

	assert_eq!(response.status(), 401);
	assert_eq!(response.failure_kind(), Some(FailureKind::AuthInvalid));
	assert_eq!(response.error(), Some("Session revoked"));
	assert_eq!(navigator.modes(), [RedirectMode::ClientSide]);
	assert!(!session.is_authenticated().expect("Store read should succeed."));
	assert_eq!(session.credentials().refresh_token().expect("Store read should succeed."), None);
}

#[tokio::test]
async fn repeated_redirects_escalate_to_a_full_reload() {
	let server = MockServer::start_async().await;

	server
		.mock_async(|when, then| {
			when.path("/api/v1/me");
			then.status(401);
		})
		.await;

	let (session, _) = build_reqwest_test_session(test_config(&server.base_url()));
	let navigator = std::sync::Arc::new(RecordingNavigator::default());
	let session = session.with_navigator(navigator.clone());

	for _ in 0..3 {
		session.send(RequestContext::get("/me"), &PayloadShape::any()).await;
	}

	assert_eq!(
		navigator.modes(),
		[RedirectMode::ClientSide, RedirectMode::ClientSide, RedirectMode::FullReload]
	);
	assert_eq!(session.redirect_guard().state().expect("State read should succeed.").redirect_count, 0);
}

#[tokio::test]
async fn auth_endpoint_401_is_returned_without_refresh_or_redirect() {
	let server = MockServer::start_async().await;
	let login = server
		.mock_async(|when, then| {
			when.method(POST).path("/api/auth/login");
			then.status(401).json_body(json!({ "error": "Invalid email or password" }));
		})
		.await;
	let refresh = server
		.mock_async(|when, then| {
			when.path("/api/auth/refresh");
			then.status(200).json_body(json!({ "accessToken": "never" }));
		})
		.await;
	let (session, _) = build_reqwest_test_session(test_config(&server.base_url()));
	let navigator = std::sync::Arc::new(RecordingNavigator::default());
	let session = session.with_navigator(navigator.clone());

	session.credentials().set_refresh_token(&TokenSecret::new("r-1")).expect("Seeding should succeed.");

	let err = session.login("someone@example.com", "wrong").await.expect_err("Login should fail.");

	login.assert_calls_async(1).await;
	refresh.assert_calls_async(0).await;

	assert!(matches!(err, Error::AuthInvalid { ref reason } if reason == "Invalid email or password"));
	assert!(navigator.modes().is_empty());
}

#[tokio::test]
async fn unreachable_server_yields_status_zero() {
	let (session, _) = build_reqwest_test_session(test_config("http://127.0.0.1:9"));
	let response = session.send(RequestContext::get("/topics"), &PayloadShape::any()).await;

	assert_eq!(response.status(), 0);
	assert_eq!(response.failure_kind(), Some(FailureKind::Transport));
	assert_eq!(response.error(), Some(CONNECTIVITY_MESSAGE));
}
