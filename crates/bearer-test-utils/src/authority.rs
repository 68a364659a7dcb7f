//! A mock token authority serving a JWKS endpoint.

use crate::keypair::TestKeypair;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// JWKS discovery path relative to the authority base URL.
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// A wiremock-backed authority exposing signing keys over HTTP.
pub struct MockAuthority {
    server: MockServer,
}

impl MockAuthority {
    /// Start the mock authority on an ephemeral port.
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// The authority base URL, also used as the token issuer in tests.
    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    /// Serve the public halves of the given keypairs at the JWKS path.
    ///
    /// Replaces any previously mounted JWKS mock.
    pub async fn serve_keys(&self, keypairs: &[&TestKeypair]) {
        self.server.reset().await;
        self.mount_jwks_response(self.jwks_body(keypairs)).await;
    }

    /// Serve the given keys for at most `n` requests; later requests get
    /// no matching mock (a 404). Useful for forcing refresh behavior.
    pub async fn serve_keys_up_to(&self, keypairs: &[&TestKeypair], n: u64) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(self.jwks_body(keypairs)))
            .up_to_n_times(n)
            .mount(&self.server)
            .await;
    }

    /// Serve raw JWK entries, for documents a [`TestKeypair`] cannot
    /// express (unsupported key types, windowed keys, malformed entries).
    pub async fn serve_raw_jwks(&self, keys: serde_json::Value) {
        self.server.reset().await;
        self.mount_jwks_response(serde_json::json!({ "keys": keys }))
            .await;
    }

    /// Answer every JWKS request with the given status and empty body.
    pub async fn serve_error(&self, status: u16) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Direct access to the underlying mock server for custom mounts
    /// (delays, expectations, request counting).
    pub fn server(&self) -> &MockServer {
        &self.server
    }

    fn jwks_body(&self, keypairs: &[&TestKeypair]) -> serde_json::Value {
        let keys: Vec<serde_json::Value> = keypairs.iter().map(|k| k.jwk_json()).collect();
        serde_json::json!({ "keys": keys })
    }

    async fn mount_jwks_response(&self, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }
}
