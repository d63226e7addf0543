//! Walks every page of a governance collection against a local mock org: token acquisition with
//! a signed client assertion, DPoP-bound resource calls, and cursor pagination over the default
//! reqwest transport.

// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use serde_json::Value;
// self
use governance_transport::{
	auth::{ClientId, KeyId},
	config::ClientConfig,
	executor::{ApiRequest, RequestExecutor},
	url::Url,
};

const CAMPAIGNS: &str = "/governance/api/v1/campaigns";

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth2/v1/token").header_exists("dpop");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"demo-access\",\"token_type\":\"DPoP\",\"expires_in\":3600}",
			);
		})
		.await;
	let next = server.url("/governance/api/v1/campaigns?after=page-2");
	let first_page = server
		.mock_async(|when, then| {
			when.method(GET).path(CAMPAIGNS).query_param("limit", "2");
			then.status(200)
				.header("content-type", "application/json")
				.header("link", format!("<{next}>; rel=\"next\""))
				.body("[{\"id\":\"icijm1\",\"name\":\"Quarterly review\"},{\"id\":\"icijm2\",\"name\":\"Contractor audit\"}]");
		})
		.await;
	let last_page = server
		.mock_async(|when, then| {
			when.method(GET).path(CAMPAIGNS).query_param("after", "page-2");
			then.status(200)
				.header("content-type", "application/json")
				.body("[{\"id\":\"icijm3\",\"name\":\"Admin roles\"}]");
		})
		.await;
	let config = ClientConfig::builder(
		Url::parse(&server.base_url())?,
		ClientId::new("0oa-demo-client")?,
		include_str!("../tests/fixtures/assertion_ec.pem"),
	)
	.key_id(KeyId::new("demo-key")?)
	.scopes(["okta.governance.accessCertifications.read"])
	.build()?;
	let executor = RequestExecutor::new(config)?;
	let mut request = ApiRequest::get(CAMPAIGNS).query("limit", "2");
	let mut campaigns = Vec::new();

	loop {
		let page = executor.execute_paginated::<Value>(&request).await?;

		campaigns.extend(page.items);

		let Some(cursor) = page.next_cursor else { break };

		request = ApiRequest::get(CAMPAIGNS).after(cursor);
	}

	for campaign in &campaigns {
		println!("{}: {}", campaign["id"], campaign["name"]);
	}

	token_mock.assert_async().await;
	first_page.assert_async().await;
	last_page.assert_async().await;

	Ok(())
}
