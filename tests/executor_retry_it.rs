// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde_json::Value;
use tokio::time::Instant;
// self
use governance_transport::{
	_preludet::*,
	dpop,
	error::{ErrorKind, TransportError},
	executor::ApiRequest,
};

const ORG_URL: &str = "https://acme.okta.com";
const CAMPAIGNS: &str = "/governance/api/v1/campaigns";

#[derive(Debug, Deserialize)]
struct Campaign {
	id: String,
	name: String,
}

fn campaigns_body() -> String {
	"[{\"id\":\"icijm1\",\"name\":\"Quarterly review\"},{\"id\":\"icijm2\",\"name\":\"Contractor audit\"}]"
		.into()
}

fn executor_with(
	steps: impl IntoIterator<Item = ScriptedStep>,
) -> (ScriptedExecutor, ScriptedHttpClient) {
	let client = ScriptedHttpClient::new(
		[ScriptedStep::json(200, token_body("tok-1", 3600))].into_iter().chain(steps),
	);
	let executor = build_scripted_executor(test_config(ORG_URL), client.clone());

	(executor, client)
}

fn proof_claims(request: &RecordedRequest) -> Value {
	let proof = request.header("dpop").expect("Resource request should carry a DPoP proof.");
	let payload = proof.split('.').nth(1).expect("Proof should carry a payload segment.");
	let bytes = URL_SAFE_NO_PAD.decode(payload).expect("Proof payload should be base64url.");

	serde_json::from_slice(&bytes).expect("Proof payload should be JSON.")
}

#[tokio::test]
async fn resource_calls_present_bound_token_and_proof() {
	let (executor, client) = executor_with([ScriptedStep::json(200, campaigns_body())]);
	let campaigns = executor
		.execute::<Vec<Campaign>>(&ApiRequest::get(CAMPAIGNS).query("limit", "2"))
		.await
		.expect("Resource call should succeed.");

	assert_eq!(campaigns.len(), 2);
	assert_eq!(campaigns[0].id, "icijm1");
	assert_eq!(campaigns[1].name, "Contractor audit");

	let calls = client.requests_to(CAMPAIGNS);

	assert_eq!(calls.len(), 1);

	let call = &calls[0];

	assert_eq!(call.uri, "https://acme.okta.com/governance/api/v1/campaigns?limit=2");
	assert_eq!(call.header("authorization"), Some("DPoP tok-1"));
	assert_eq!(call.header("accept"), Some("application/json"));

	let proof = proof_claims(call);

	assert_eq!(proof["htm"], "GET");
	assert_eq!(proof["htu"], "https://acme.okta.com/governance/api/v1/campaigns");
	assert_eq!(proof["ath"], dpop::access_token_hash("tok-1"));
}

#[tokio::test]
async fn json_bodies_are_sent_with_content_type() {
	let (executor, client) =
		executor_with([ScriptedStep::json(200, "{\"id\":\"icijm3\",\"name\":\"New campaign\"}")]);
	let created = executor
		.execute::<Campaign>(
			&ApiRequest::post(CAMPAIGNS).json(serde_json::json!({ "name": "New campaign" })),
		)
		.await
		.expect("Create call should succeed.");

	assert_eq!(created.id, "icijm3");

	let call = &client.requests_to(CAMPAIGNS)[0];

	assert_eq!(call.method, "POST");
	assert_eq!(call.header("content-type"), Some("application/json"));
	assert_eq!(
		serde_json::from_str::<Value>(&call.body).expect("Request body should be JSON."),
		serde_json::json!({ "name": "New campaign" })
	);
	assert_eq!(proof_claims(call)["htm"], "POST");
}

#[tokio::test(start_paused = true)]
async fn throttling_exhausts_retries_with_backoff() {
	let (executor, client) = executor_with([
		ScriptedStep::json(429, "{\"errorCode\":\"E0000047\",\"errorSummary\":\"API call exceeded rate limit due to too many requests.\"}"),
		ScriptedStep::json(429, "{\"errorCode\":\"E0000047\"}"),
		ScriptedStep::json(429, "{\"errorCode\":\"E0000047\"}"),
	]);
	let started = Instant::now();
	let err = executor
		.execute::<Vec<Campaign>>(&ApiRequest::get(CAMPAIGNS))
		.await
		.expect_err("Throttling should exhaust the retry budget.");
	let elapsed = started.elapsed();

	assert_eq!(err.kind(), ErrorKind::RateLimit);
	assert_eq!(err.status(), Some(429));
	assert_eq!(err.report().code.as_deref(), Some("E0000047"));
	assert_eq!(client.requests_to(CAMPAIGNS).len(), 3);
	assert!(elapsed >= StdDuration::from_secs(3), "Backoff should sleep 1s then 2s: {elapsed:?}.");
	assert!(elapsed < StdDuration::from_secs(4), "No extra sleeps expected: {elapsed:?}.");
}

#[tokio::test(start_paused = true)]
async fn retry_after_header_is_honored() {
	let (executor, client) = executor_with([
		ScriptedStep::json(429, "{}").header("retry-after", "7"),
		ScriptedStep::json(200, campaigns_body()),
	]);
	let started = Instant::now();
	let campaigns = executor
		.execute::<Vec<Campaign>>(&ApiRequest::get(CAMPAIGNS))
		.await
		.expect("Second attempt should succeed.");
	let elapsed = started.elapsed();

	assert_eq!(campaigns.len(), 2);
	assert_eq!(client.requests_to(CAMPAIGNS).len(), 2);
	assert!(elapsed >= StdDuration::from_secs(7), "Retry-After should be honored: {elapsed:?}.");
	assert!(elapsed < StdDuration::from_secs(8), "Backoff should not be added: {elapsed:?}.");
}

#[tokio::test(start_paused = true)]
async fn server_errors_are_retried() {
	let (executor, client) = executor_with([
		ScriptedStep::json(503, "{\"errorCode\":\"E0000009\",\"errorSummary\":\"Internal Server Error\"}"),
		ScriptedStep::json(200, campaigns_body()),
	]);
	let started = Instant::now();

	executor
		.execute::<Vec<Campaign>>(&ApiRequest::get(CAMPAIGNS))
		.await
		.expect("Retry after a server error should succeed.");

	assert_eq!(client.requests_to(CAMPAIGNS).len(), 2);
	assert!(started.elapsed() >= StdDuration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn refused_connections_are_retried() {
	let (executor, client) =
		executor_with([ScriptedStep::Refuse, ScriptedStep::json(200, campaigns_body())]);

	executor
		.execute::<Vec<Campaign>>(&ApiRequest::get(CAMPAIGNS))
		.await
		.expect("Retry after a refused connection should succeed.");

	assert_eq!(client.requests_to(CAMPAIGNS).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn attempts_time_out_and_exhaust_retries() {
	let slow = || ScriptedStep::json(200, campaigns_body()).delayed(StdDuration::from_secs(60));
	let (executor, client) = executor_with([slow(), slow(), slow()]);
	let err = executor
		.execute::<Vec<Campaign>>(&ApiRequest::get(CAMPAIGNS))
		.await
		.expect_err("Every attempt should time out.");

	assert!(matches!(err, Error::Transport(TransportError::Timeout { .. })));
	assert_eq!(err.kind(), ErrorKind::Network);
	assert_eq!(client.requests_to(CAMPAIGNS).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn validation_errors_fail_without_retry() {
	let (executor, client) = executor_with([ScriptedStep::json(
		422,
		"{\"errorCode\":\"E0000001\",\"errorSummary\":\"Api validation failed: name\",\"errorId\":\"oaeX1\",\"errorCauses\":[{\"errorSummary\":\"name: must not be blank\"}]}",
	)]);
	let started = Instant::now();
	let err = executor
		.execute::<Campaign>(&ApiRequest::post(CAMPAIGNS).json(serde_json::json!({ "name": "" })))
		.await
		.expect_err("Validation failures are terminal.");
	let report = err.report();

	assert_eq!(err.kind(), ErrorKind::Validation);
	assert_eq!(report.status, Some(422));
	assert_eq!(report.code.as_deref(), Some("E0000001"));
	assert_eq!(report.id.as_deref(), Some("oaeX1"));
	assert_eq!(report.causes, vec!["name: must not be blank".to_owned()]);
	assert!(report.message.contains("Api validation failed"));
	assert_eq!(client.requests_to(CAMPAIGNS).len(), 1);
	assert_eq!(started.elapsed(), StdDuration::ZERO);
}

#[tokio::test]
async fn missing_resources_fail_without_retry() {
	let (executor, client) = executor_with([ScriptedStep::json(
		404,
		"{\"errorCode\":\"E0000007\",\"errorSummary\":\"Not found: Resource not found: icijm9 (Campaign)\"}",
	)]);
	let err = executor
		.execute::<Campaign>(&ApiRequest::get(format!("{CAMPAIGNS}/icijm9")))
		.await
		.expect_err("Missing resources are terminal.");

	assert_eq!(err.kind(), ErrorKind::NotFound);
	assert_eq!(client.requests_to(CAMPAIGNS).len(), 1);
}

#[tokio::test]
async fn undecodable_bodies_fail_without_retry() {
	let (executor, client) = executor_with([ScriptedStep::json(200, "{\"id\":42}")]);
	let err = executor
		.execute::<Campaign>(&ApiRequest::get(format!("{CAMPAIGNS}/icijm1")))
		.await
		.expect_err("Shape mismatches are terminal.");

	assert!(matches!(err, Error::Decode { status: Some(200), .. }));
	assert_eq!(client.requests_to(CAMPAIGNS).len(), 1);
}

#[tokio::test]
async fn token_failures_surface_without_resource_calls() {
	let client = ScriptedHttpClient::new([ScriptedStep::json(
		401,
		"{\"error\":\"invalid_client\",\"error_description\":\"Client authentication failed.\"}",
	)]);
	let executor = build_scripted_executor(test_config(ORG_URL), client.clone());
	let err = executor
		.execute::<Vec<Campaign>>(&ApiRequest::get(CAMPAIGNS))
		.await
		.expect_err("Token failures must surface.");

	assert_eq!(err.kind(), ErrorKind::Auth);
	assert!(client.requests_to(CAMPAIGNS).is_empty());
}

#[tokio::test]
async fn resource_responses_rotate_the_nonce() {
	let (executor, client) = executor_with([
		ScriptedStep::json(200, campaigns_body()).header("dpop-nonce", "rs-nonce-1"),
		ScriptedStep::json(200, campaigns_body()),
	]);

	for _ in 0..2 {
		executor
			.execute::<Vec<Campaign>>(&ApiRequest::get(CAMPAIGNS))
			.await
			.expect("Resource call should succeed.");
	}

	let calls = client.requests_to(CAMPAIGNS);

	assert!(proof_claims(&calls[0]).get("nonce").is_none());
	assert_eq!(proof_claims(&calls[1])["nonce"], "rs-nonce-1");
	assert_eq!(executor.session().nonce().as_deref(), Some("rs-nonce-1"));
	assert_eq!(client.requests_to("/oauth2/").len(), 1, "The token is reused across calls.");
}

#[tokio::test(start_paused = true)]
async fn low_quota_paces_the_next_request() {
	let reset = (OffsetDateTime::now_utc() + Duration::seconds(10)).unix_timestamp();
	let (executor, _client) = executor_with([
		ScriptedStep::json(200, campaigns_body())
			.header("x-rate-limit-limit", "100")
			.header("x-rate-limit-remaining", "5")
			.header("x-rate-limit-reset", reset.to_string()),
		ScriptedStep::json(200, campaigns_body()),
	]);

	executor
		.execute::<Vec<Campaign>>(&ApiRequest::get(CAMPAIGNS))
		.await
		.expect("First call should succeed.");

	let snapshot =
		executor.session().rate_limits().snapshot().expect("Quota headers should be recorded.");

	assert_eq!(snapshot.limit, 100);
	assert_eq!(snapshot.remaining, 5);

	let started = Instant::now();

	executor
		.execute::<Vec<Campaign>>(&ApiRequest::get(CAMPAIGNS))
		.await
		.expect("Paced call should succeed.");

	let elapsed = started.elapsed();

	assert!(elapsed >= StdDuration::from_millis(1_500), "Pacing should apply: {elapsed:?}.");
	assert!(elapsed <= StdDuration::from_secs(2), "Pacing is capped at two seconds: {elapsed:?}.");
}

#[tokio::test]
async fn pagination_prefers_link_headers() {
	let (executor, _client) = executor_with([ScriptedStep::json(200, campaigns_body()).header(
		"link",
		"<https://acme.okta.com/governance/api/v1/campaigns?limit=2>; rel=\"self\", <https://acme.okta.com/governance/api/v1/campaigns?after=abc123&limit=2>; rel=\"next\"",
	)]);
	let page = executor
		.execute_paginated::<Campaign>(&ApiRequest::get(CAMPAIGNS).query("limit", "2"))
		.await
		.expect("Paginated call should succeed.");

	assert_eq!(page.items.len(), 2);
	assert_eq!(page.next_cursor.as_deref(), Some("abc123"));
	assert!(!page.is_exhausted());
}

#[tokio::test]
async fn pagination_falls_back_to_embedded_links() {
	let (executor, client) = executor_with([
		ScriptedStep::json(
			200,
			"{\"data\":[{\"id\":\"icijm1\",\"name\":\"Quarterly review\"}],\"_links\":{\"next\":{\"href\":\"/governance/api/v1/campaigns?after=def456\"}}}",
		),
		ScriptedStep::json(200, "{\"data\":[{\"id\":\"icijm2\",\"name\":\"Contractor audit\"}]}"),
	]);
	let first = executor
		.execute_paginated::<Campaign>(&ApiRequest::get(CAMPAIGNS))
		.await
		.expect("First page should succeed.");

	assert_eq!(first.items[0].id, "icijm1");
	assert_eq!(first.next_cursor.as_deref(), Some("def456"));

	let cursor = first.next_cursor.expect("Cursor should be present.");
	let last = executor
		.execute_paginated::<Campaign>(&ApiRequest::get(CAMPAIGNS).after(cursor))
		.await
		.expect("Last page should succeed.");

	assert_eq!(last.items[0].id, "icijm2");
	assert!(last.is_exhausted());
	assert_eq!(
		client.requests_to(CAMPAIGNS)[1].uri,
		"https://acme.okta.com/governance/api/v1/campaigns?after=def456"
	);
}
