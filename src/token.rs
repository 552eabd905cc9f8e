use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// The JWT service could not be reached.
    #[error("Failed to request LiveKit token: {0}")]
    Http(String),

    /// The JWT service answered with a non-success status.
    #[error("Failed to get LiveKit token: {status} {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    #[error("Failed to sign access token: {0}")]
    Signing(String),

    #[error("Invalid access token: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// TokenProvider
// ---------------------------------------------------------------------------

/// Parameters for obtaining a room access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub room_name: String,
    pub identity: String,
    pub name: Option<String>,
    /// Matrix access token forwarded to the JWT service as a bearer token.
    pub matrix_access_token: Option<String>,
}

impl TokenRequest {
    fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.identity)
    }
}

/// Source of room access tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    async fn request_token(&self, request: &TokenRequest) -> Result<String, TokenError>;
}

/// Pick a token source from configuration.
///
/// A configured API key/secret pair signs tokens locally; otherwise tokens
/// come from the JWT service, which validates the Matrix access token.
pub fn provider_from_config(cfg: &Config) -> Result<Arc<dyn TokenProvider>, TokenError> {
    match (&cfg.livekit_api_key, &cfg.livekit_api_secret) {
        (Some(key), Some(secret)) => {
            info!("Signing LiveKit tokens locally");
            Ok(Arc::new(LocalTokenSigner::new(
                key.clone(),
                secret.clone(),
                Duration::from_secs(cfg.token_ttl_secs),
            )))
        }
        _ => {
            info!(service = %cfg.jwt_service_url, "Requesting LiveKit tokens from JWT service");
            let provider = HttpTokenProvider::new(
                cfg.jwt_service_url.clone(),
                Duration::from_secs(cfg.http_timeout_secs),
            )?;
            Ok(Arc::new(provider))
        }
    }
}

// ---------------------------------------------------------------------------
// JWT service client
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SfuTokenRequest<'a> {
    room: &'a str,
    identity: &'a str,
    name: &'a str,
}

#[derive(Deserialize)]
struct SfuTokenResponse {
    #[serde(default)]
    jwt: Option<String>,
}

/// Fetches tokens from the server-side JWT service (`POST {base}/sfu/get`).
#[derive(Debug, Clone)]
pub struct HttpTokenProvider {
    client: reqwest::Client,
    service_url: String,
}

impl HttpTokenProvider {
    pub fn new(service_url: impl Into<String>, timeout: Duration) -> Result<Self, TokenError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TokenError::Http(e.to_string()))?;
        Ok(Self {
            client,
            service_url: service_url.into(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/sfu/get", self.service_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn request_token(&self, request: &TokenRequest) -> Result<String, TokenError> {
        let body = SfuTokenRequest {
            room: &request.room_name,
            identity: &request.identity,
            name: request.display_name(),
        };

        let mut http = self.client.post(self.endpoint()).json(&body);
        if let Some(matrix_token) = &request.matrix_access_token {
            http = http.bearer_auth(matrix_token);
        }

        let response = http.send().await.map_err(|e| {
            warn!("JWT service unreachable: {e}");
            TokenError::Http(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "JWT service rejected token request");
            return Err(TokenError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SfuTokenResponse = response
            .json()
            .await
            .map_err(|e| TokenError::InvalidResponse(e.to_string()))?;

        match parsed.jwt {
            Some(jwt) if !jwt.is_empty() => {
                debug!(room = %request.room_name, identity = %request.identity, "token acquired");
                Ok(jwt)
            }
            _ => Err(TokenError::InvalidResponse("No JWT token in response".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// Local signer (LiveKit access tokens)
// ---------------------------------------------------------------------------

/// Room permissions carried in the `video` claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrant {
    pub room: String,
    pub room_join: bool,
    pub can_publish: bool,
    pub can_subscribe: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// API key that signed the token.
    pub iss: String,
    /// Participant identity.
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub nbf: usize,
    pub exp: usize,
    pub video: VideoGrant,
}

/// Mints HS256 LiveKit access tokens from an API key/secret pair.
#[derive(Clone)]
pub struct LocalTokenSigner {
    api_key: String,
    api_secret: String,
    ttl: Duration,
}

impl std::fmt::Debug for LocalTokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTokenSigner")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl LocalTokenSigner {
    pub fn new(api_key: String, api_secret: String, ttl: Duration) -> Self {
        Self {
            api_key,
            api_secret,
            ttl,
        }
    }

    /// Create a signed token letting `identity` join, publish to and
    /// subscribe in `room`.
    pub fn sign(&self, room: &str, identity: &str, name: Option<&str>) -> Result<String, TokenError> {
        let now = chrono::Utc::now().timestamp().max(0) as usize;
        let claims = AccessTokenClaims {
            iss: self.api_key.clone(),
            sub: identity.to_string(),
            name: name.map(str::to_string),
            nbf: now,
            exp: now.saturating_add(usize::try_from(self.ttl.as_secs()).unwrap_or(usize::MAX)),
            video: VideoGrant {
                room: room.to_string(),
                room_join: true,
                can_publish: true,
                can_subscribe: true,
            },
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.api_secret.as_bytes()),
        )
        .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verify signature, issuer and validity window, returning the claims.
    pub fn verify(&self, token: &str) -> Result<AccessTokenClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_nbf = true;
        validation.set_issuer(&[self.api_key.as_str()]);

        let data = decode::<AccessTokenClaims>(
            token,
            &DecodingKey::from_secret(self.api_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| TokenError::Invalid(e.to_string()))?;
        Ok(data.claims)
    }
}

#[async_trait]
impl TokenProvider for LocalTokenSigner {
    async fn request_token(&self, request: &TokenRequest) -> Result<String, TokenError> {
        self.sign(&request.room_name, &request.identity, Some(request.display_name()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(matrix_token: Option<&str>) -> TokenRequest {
        TokenRequest {
            room_name: "!room:example.org".into(),
            identity: "@alice:example.org".into(),
            name: None,
            matrix_access_token: matrix_token.map(str::to_string),
        }
    }

    fn signer() -> LocalTokenSigner {
        LocalTokenSigner::new("devkey".into(), "secret".into(), Duration::from_secs(3600))
    }

    #[test]
    fn roundtrip_local_token() {
        let signer = signer();
        let token = signer.sign("room-1", "@bob", Some("Bob")).unwrap();
        let claims = signer.verify(&token).unwrap();

        assert_eq!(claims.iss, "devkey");
        assert_eq!(claims.sub, "@bob");
        assert_eq!(claims.name.as_deref(), Some("Bob"));
        assert_eq!(claims.video.room, "room-1");
        assert!(claims.video.room_join && claims.video.can_publish && claims.video.can_subscribe);
        assert!(claims.exp > claims.nbf);
    }

    #[test]
    fn huge_ttl_saturates() {
        let signer = LocalTokenSigner::new("devkey".into(), "secret".into(), Duration::from_secs(u64::MAX));
        let token = signer.sign("room-1", "@bob", None).unwrap();
        assert_eq!(signer.verify(&token).unwrap().exp, usize::MAX);
    }

    #[test]
    fn wrong_secret_rejects() {
        let token = signer().sign("room-1", "@bob", None).unwrap();
        let other = LocalTokenSigner::new("devkey".into(), "other".into(), Duration::from_secs(60));
        assert!(matches!(other.verify(&token), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn wrong_issuer_rejects() {
        let token = signer().sign("room-1", "@bob", None).unwrap();
        let other = LocalTokenSigner::new("prodkey".into(), "secret".into(), Duration::from_secs(60));
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn grant_uses_livekit_field_names() {
        let grant = VideoGrant {
            room: "r".into(),
            room_join: true,
            can_publish: false,
            can_subscribe: true,
        };
        let json = serde_json::to_value(&grant).unwrap();
        assert_eq!(json["roomJoin"], true);
        assert_eq!(json["canPublish"], false);
    }

    #[test]
    fn debug_redacts_secret() {
        let rendered = format!("{:?}", signer());
        assert!(!rendered.contains("\"secret\""));
        assert!(rendered.contains("<redacted>"));
    }

    #[tokio::test]
    async fn signer_as_provider_uses_identity_as_name() {
        let signer = signer();
        let token = signer.request_token(&request(None)).await.unwrap();
        let claims = signer.verify(&token).unwrap();
        assert_eq!(claims.name.as_deref(), Some("@alice:example.org"));
    }

    #[tokio::test]
    async fn http_provider_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/_livekit/sfu/get"))
            .and(header("authorization", "Bearer syt_matrix"))
            .and(body_json(serde_json::json!({
                "room": "!room:example.org",
                "identity": "@alice:example.org",
                "name": "@alice:example.org"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "url": "wss://livekit.example.org",
                "jwt": "lk-token"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = HttpTokenProvider::new(
            format!("{}/_livekit/", mock_server.uri()),
            Duration::from_secs(5),
        )
        .unwrap();
        let token = provider.request_token(&request(Some("syt_matrix"))).await.unwrap();
        assert_eq!(token, "lk-token");
    }

    #[tokio::test]
    async fn http_provider_rejected() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/sfu/get"))
            .respond_with(ResponseTemplate::new(401).set_body_string("M_UNKNOWN_TOKEN"))
            .mount(&mock_server)
            .await;

        let provider = HttpTokenProvider::new(mock_server.uri(), Duration::from_secs(5)).unwrap();
        let err = provider.request_token(&request(None)).await.unwrap_err();
        assert_eq!(
            err,
            TokenError::Rejected {
                status: 401,
                body: "M_UNKNOWN_TOKEN".into()
            }
        );
        assert_eq!(err.to_string(), "Failed to get LiveKit token: 401 M_UNKNOWN_TOKEN");
    }

    #[tokio::test]
    async fn http_provider_missing_jwt() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/sfu/get"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "url": "wss://livekit.example.org" })),
            )
            .mount(&mock_server)
            .await;

        let provider = HttpTokenProvider::new(mock_server.uri(), Duration::from_secs(5)).unwrap();
        let err = provider.request_token(&request(None)).await.unwrap_err();
        assert_eq!(err, TokenError::InvalidResponse("No JWT token in response".into()));
    }

    #[tokio::test]
    async fn key_pair_selects_local_signer() {
        let cfg = Config {
            livekit_api_key: Some("devkey".into()),
            livekit_api_secret: Some("secret".into()),
            jwt_service_url: "http://127.0.0.1:9/unreachable".into(),
            ..Config::default()
        };
        let provider = provider_from_config(&cfg).unwrap();
        let token = provider.request_token(&request(Some("syt_matrix"))).await.unwrap();

        let claims = signer().verify(&token).unwrap();
        assert_eq!(claims.sub, "@alice:example.org");
        assert_eq!(claims.video.room, "!room:example.org");
    }

    #[tokio::test]
    async fn half_key_pair_uses_jwt_service() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/_livekit/sfu/get"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "jwt": "from-service" })),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let cfg = Config {
            livekit_api_key: Some("devkey".into()),
            livekit_api_secret: None,
            jwt_service_url: format!("{}/_livekit", mock_server.uri()),
            ..Config::default()
        };
        let provider = provider_from_config(&cfg).unwrap();
        let token = provider.request_token(&request(None)).await.unwrap();
        assert_eq!(token, "from-service");
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let provider = HttpTokenProvider::new("https://example.org/_livekit/", Duration::from_secs(1)).unwrap();
        assert_eq!(provider.endpoint(), "https://example.org/_livekit/sfu/get");
    }
}
