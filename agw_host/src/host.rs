//! Gateway HTTP server. Route handlers are thin: each one composes the
//! body reader, a collaborator call and a breaker update into a JSON
//! response. The logic with real invariants lives in `agw_core` and in the
//! attestation libraries behind [`AttestationVerifier`].

use std::{
	net::{Ipv4Addr, SocketAddr},
	sync::Arc,
};

use axum::{
	body::Bytes,
	extract::{DefaultBodyLimit, Query, State},
	http::{header::CONTENT_TYPE, HeaderMap},
	response::{Html, IntoResponse},
	routing::{get, post},
	Json, Router,
};
use serde_json::Value;

use agw_core::{
	body::{self, MAX_QUOTE_BODY_BYTES},
	breaker::{ExitProcess, HealthBreaker},
	cache::{collateral_cache_key, TtlCache},
	hex, probe,
	verifier::{AttestationVerifier, Collateral, VerifierError},
};

use crate::{
	config::Config, Error, HOST_HEALTH, QUOTE_COLLATERAL, QUOTE_PARSE,
	QUOTE_PCK, QUOTE_VERIFY, RATLS_CERT, RATLS_VERIFY,
};

/// Resources shared across request tasks. One instance is created at
/// process start; tests construct their own to inject mock backends and
/// capturing fatal handlers.
pub struct GatewayState {
	verifier: Option<Arc<dyn AttestationVerifier>>,
	collateral_cache: TtlCache<Collateral>,
	breaker: HealthBreaker,
	pccs_url: String,
}

impl GatewayState {
	#[must_use]
	pub fn new(
		verifier: Option<Arc<dyn AttestationVerifier>>,
		breaker: HealthBreaker,
		pccs_url: String,
	) -> Arc<Self> {
		Arc::new(Self {
			verifier,
			collateral_cache: TtlCache::new(),
			breaker,
			pccs_url,
		})
	}

	/// The shared collateral cache.
	#[must_use]
	pub fn collateral_cache(&self) -> &TtlCache<Collateral> {
		&self.collateral_cache
	}

	/// The shared health breaker.
	#[must_use]
	pub fn breaker(&self) -> &HealthBreaker {
		&self.breaker
	}

	fn backend(&self) -> Result<Arc<dyn AttestationVerifier>, Error> {
		self.verifier.clone().ok_or(Error::BackendUnavailable)
	}
}

/// Query parameters for the RA-TLS endpoints.
#[derive(serde::Deserialize)]
struct RatlsQuery {
	endpoint: Option<String>,
	pccs_url: Option<String>,
}

impl RatlsQuery {
	fn endpoint(&self) -> Result<&str, Error> {
		self.endpoint
			.as_deref()
			.filter(|e| !e.is_empty())
			.ok_or_else(|| {
				Error::BadRequest(
					"missing 'endpoint' query parameter".to_string(),
				)
			})
	}
}

/// HTTP server for the attestation gateway.
#[allow(clippy::module_name_repetitions)]
pub struct GatewayServer {
	addr: SocketAddr,
	config: Config,
	verifier: Option<Arc<dyn AttestationVerifier>>,
}

impl GatewayServer {
	/// Create a new `GatewayServer`. See `Self::serve` for starting it.
	/// `verifier` is the attestation backend; `None` answers the quote and
	/// RA-TLS verification routes with 501.
	#[must_use]
	pub fn new(
		config: Config,
		verifier: Option<Arc<dyn AttestationVerifier>>,
	) -> Self {
		let addr =
			SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), config.port);
		Self { addr, config, verifier }
	}

	/// Router with freshly constructed shared state and the production
	/// (process-exiting) fatal handler wired into the breaker.
	#[must_use]
	pub fn router(&self) -> Router {
		let state = GatewayState::new(
			self.verifier.clone(),
			HealthBreaker::new(
				self.config.failure_threshold,
				Box::new(ExitProcess),
			),
			self.config.pccs_url.clone(),
		);
		Self::router_with_state(state)
	}

	/// Router over explicit state.
	#[must_use]
	pub fn router_with_state(state: Arc<GatewayState>) -> Router {
		Router::new()
			.route(HOST_HEALTH, get(Self::host_health))
			.route(QUOTE_PARSE, post(Self::quote_parse))
			.route(QUOTE_VERIFY, post(Self::quote_verify))
			.route(QUOTE_COLLATERAL, post(Self::quote_collateral))
			.route(QUOTE_PCK, post(Self::quote_pck))
			.route(RATLS_VERIFY, get(Self::ratls_verify))
			.route(RATLS_CERT, get(Self::ratls_cert))
			// bound the body stream before the reader ever buffers it
			.layer(DefaultBodyLimit::max(MAX_QUOTE_BODY_BYTES))
			.with_state(state)
	}

	/// Start the server, running indefinitely.
	///
	/// # Panics
	///
	/// Panics if there is an issue starting the server.
	pub async fn serve(self) {
		let app = self.router();

		println!("GatewayServer listening on {}", self.addr);

		axum::Server::bind(&self.addr)
			.serve(app.into_make_service())
			.await
			.expect("gateway server crashed");
	}

	/// Health route handler; answers without touching any dependency.
	#[allow(clippy::unused_async)]
	async fn host_health(_: State<Arc<GatewayState>>) -> impl IntoResponse {
		Html("Ok!")
	}

	/// POST /quote-ops/parse - parse a raw quote into its structured form.
	async fn quote_parse(
		State(state): State<Arc<GatewayState>>,
		headers: HeaderMap,
		body_bytes: Bytes,
	) -> Result<Json<Value>, Error> {
		let verifier = state.backend()?;
		let raw_quote = read_quote_bytes(&headers, body_bytes).await?;

		let quote =
			run_backend(move || verifier.parse(&raw_quote)).await?;
		Ok(Json(quote.body))
	}

	/// POST /quote-ops/verify - parse, fetch collateral and verify.
	async fn quote_verify(
		State(state): State<Arc<GatewayState>>,
		headers: HeaderMap,
		body_bytes: Bytes,
	) -> Result<Json<Value>, Error> {
		let verifier = state.backend()?;
		let raw_quote = read_quote_bytes(&headers, body_bytes).await?;
		let pccs_url = state.pccs_url.clone();

		match run_backend(move || verifier.verify(&raw_quote, &pccs_url))
			.await
		{
			Ok(report) => {
				state.breaker.record_success();
				Ok(Json(report))
			}
			Err(err) => {
				record_if_upstream(&state.breaker, "quote verify", &err);
				Err(err)
			}
		}
	}

	/// POST /quote-ops/collateral - fetch collateral for a quote, served
	/// from the cache when a fresh enough entry exists.
	async fn quote_collateral(
		State(state): State<Arc<GatewayState>>,
		headers: HeaderMap,
		body_bytes: Bytes,
	) -> Result<Json<Value>, Error> {
		let verifier = state.backend()?;
		let raw_quote = read_quote_bytes(&headers, body_bytes).await?;

		let quote = {
			let verifier = verifier.clone();
			run_backend(move || verifier.parse(&raw_quote)).await?
		};

		let key = collateral_cache_key(&quote.fmspc, &quote.quote_type);
		if let Some(collateral) = state.collateral_cache.get(&key) {
			println!("collateral cache hit for {key}");
			return Ok(Json(collateral.as_ref().clone()));
		}

		let pccs_url = state.pccs_url.clone();
		let fetched = run_backend(move || {
			verifier.fetch_collateral(&pccs_url, &quote)
		})
		.await;

		match fetched {
			Ok(collateral) => {
				state.breaker.record_success();
				let shared = state.collateral_cache.put(key, collateral);
				Ok(Json(shared.as_ref().clone()))
			}
			Err(err) => {
				record_if_upstream(&state.breaker, "collateral fetch", &err);
				Err(err)
			}
		}
	}

	/// POST /quote-ops/pck - decode the PCK certificate extension from the
	/// quote's embedded chain.
	async fn quote_pck(
		State(state): State<Arc<GatewayState>>,
		headers: HeaderMap,
		body_bytes: Bytes,
	) -> Result<Json<Value>, Error> {
		let verifier = state.backend()?;
		let raw_quote = read_quote_bytes(&headers, body_bytes).await?;

		let quote = {
			let verifier = verifier.clone();
			run_backend(move || verifier.parse(&raw_quote)).await?
		};
		let chain = quote
			.cert_chain_pem
			.ok_or_else(|| Error::from(VerifierError::MissingCertChain))?;

		let extension =
			run_backend(move || verifier.pck_extension(&chain)).await?;
		Ok(Json(extension))
	}

	/// GET /ratls/verify?endpoint=host[:port][&pccs_url=...] - fetch the
	/// peer certificate and run RA-TLS verification against it.
	async fn ratls_verify(
		State(state): State<Arc<GatewayState>>,
		Query(query): Query<RatlsQuery>,
	) -> Result<Json<Value>, Error> {
		let endpoint = probe::normalize_endpoint(query.endpoint()?);
		let pccs_url =
			query.pccs_url.unwrap_or_else(|| state.pccs_url.clone());

		let cert = match probe::fetch_peer_certificate(&endpoint).await {
			Ok(cert) => cert,
			Err(err) => {
				let err = Error::from(err);
				record_if_upstream(&state.breaker, "ratls probe", &err);
				return Err(err);
			}
		};

		let verifier = state.backend()?;
		let cert_der = cert.as_ref().to_vec();
		let verified = run_backend(move || {
			verifier.verify_ratls_cert(&cert_der, &pccs_url)
		})
		.await;

		match verified {
			Ok(report) => {
				state.breaker.record_success();

				let mut response = serde_json::json!({
					"verified": true,
					"endpoint": endpoint,
					"status": report.status,
					"advisory_ids": report.advisory_ids,
					"quote_type": report.quote_type,
					"report_type": report.report_type,
				});
				if let Some(rtmrs) = report.rtmrs {
					let fields = response
						.as_object_mut()
						.expect("literal is an object. qed.");
					for (i, rtmr) in rtmrs.iter().enumerate() {
						fields.insert(
							format!("rtmr{i}"),
							Value::String(hex::encode(rtmr)),
						);
					}
				}
				Ok(Json(response))
			}
			Err(err) => {
				record_if_upstream(&state.breaker, "ratls verify", &err);
				Err(err)
			}
		}
	}

	/// GET /ratls/cert?endpoint=host[:port] - fetch the peer certificate
	/// and describe it without RA-TLS verification. Useful for debugging.
	async fn ratls_cert(
		State(state): State<Arc<GatewayState>>,
		Query(query): Query<RatlsQuery>,
	) -> Result<Json<Value>, Error> {
		let endpoint = probe::normalize_endpoint(query.endpoint()?);

		let cert = match probe::fetch_peer_certificate(&endpoint).await {
			Ok(cert) => cert,
			Err(err) => {
				let err = Error::from(err);
				record_if_upstream(&state.breaker, "ratls probe", &err);
				return Err(err);
			}
		};
		state.breaker.record_success();

		let summary = probe::summarize_certificate(cert.as_ref())
			.map_err(Error::from)?;
		let mut response = serde_json::to_value(&summary)
			.expect("summary is plain strings and bools. qed.");
		response
			.as_object_mut()
			.expect("summary serializes to an object. qed.")
			.insert("endpoint".to_string(), Value::String(endpoint));
		Ok(Json(response))
	}
}

/// Read the request's content type and hand the fully buffered body to the
/// quote body reader.
async fn read_quote_bytes(
	headers: &HeaderMap,
	body_bytes: Bytes,
) -> Result<Vec<u8>, Error> {
	let content_type =
		headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
	Ok(body::read_quote(content_type, body_bytes).await?)
}

/// Drive a blocking attestation-backend call off the async runtime.
async fn run_backend<T, F>(task: F) -> Result<T, Error>
where
	F: FnOnce() -> Result<T, VerifierError> + Send + 'static,
	T: Send + 'static,
{
	tokio::task::spawn_blocking(task)
		.await
		.map_err(|e| {
			Error::BadGateway(format!("attestation backend task failed: {e}"))
		})?
		.map_err(Error::from)
}

/// Feed the breaker for upstream-class failures only; input and parse
/// errors are the client's problem and never count against the process.
fn record_if_upstream(breaker: &HealthBreaker, context: &str, err: &Error) {
	if let Error::BadGateway(msg) = err {
		breaker.record_failure(context, msg);
	}
}
