//! HTTP implementation of [`PageFetcher`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use taxdesk_shared::{FetchConfig, PageFetcher, Result, TaxDeskError};

use crate::policy::{DomainPolicy, is_ssrf_target};

/// User-Agent string for portal requests.
const USER_AGENT: &str = concat!("TaxDesk/", env!("CARGO_PKG_VERSION"));

const MAX_REDIRECTS: usize = 5;

/// `reqwest`-backed page fetcher guarded by a [`DomainPolicy`] and SSRF checks.
///
/// Every redirect hop passes the same checks as the first request.
pub struct HttpFetcher {
    client: Client,
    policy: DomainPolicy,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    allow_localhost: bool,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        Self::build(
            DomainPolicy::new(config.allowed_domains.clone()),
            false,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn build(policy: DomainPolicy, allow_localhost: bool, timeout: Duration) -> Result<Self> {
        let hop_policy = policy.clone();
        let redirect = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error("too many redirects");
            }
            match check_target(&hop_policy, allow_localhost, attempt.url()) {
                Ok(()) => attempt.follow(),
                Err(e) => attempt.error(e),
            }
        });

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(redirect)
            .timeout(timeout)
            .build()
            .map_err(|e| TaxDeskError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            policy,
            allow_localhost,
            timeout,
        })
    }

    /// Replace the domain policy.
    pub fn with_policy(self, policy: DomainPolicy) -> Result<Self> {
        Self::build(policy, self.allow_localhost, self.timeout)
    }

    /// Allow fetching localhost/private IPs (for integration tests).
    #[cfg(test)]
    pub fn allow_localhost(self) -> Self {
        Self::build(self.policy, true, self.timeout).expect("rebuild client")
    }
}

/// SSRF guard, then the domain policy.
fn check_target(policy: &DomainPolicy, allow_localhost: bool, url: &Url) -> Result<()> {
    if !allow_localhost && is_ssrf_target(url) {
        warn!(%url, "SSRF protection: blocked");
        return Err(TaxDeskError::validation(format!(
            "{url} targets a private or non-HTTP resource"
        )));
    }
    policy.check(url)
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<String> {
        check_target(&self.policy, self.allow_localhost, url)?;
        debug!(%url, "fetching page");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| TaxDeskError::Network(format!("{url}: {}", error_chain(&e))))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TaxDeskError::Network(format!("{url}: HTTP {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| TaxDeskError::Network(format!("{url}: body read failed: {e}")))
    }
}

/// `e` followed by its sources, so a refused redirect says why.
fn error_chain(e: &dyn std::error::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use taxdesk_shared::AllowedDomain;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn open_config() -> FetchConfig {
        FetchConfig {
            timeout_secs: 5,
            allowed_domains: vec![],
        }
    }

    #[tokio::test]
    async fn fetches_body_from_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Nfe/Documentos"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&open_config()).unwrap().allow_localhost();
        let url = Url::parse(&format!("{}/Nfe/Documentos", server.uri())).unwrap();
        let body = fetcher.fetch(&url).await.expect("fetch");
        assert_eq!(body, "<html>ok</html>");
    }

    #[tokio::test]
    async fn non_success_status_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&open_config()).unwrap().allow_localhost();
        let url = Url::parse(&server.uri()).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, TaxDeskError::Network(_)));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn localhost_blocked_without_override() {
        let fetcher = HttpFetcher::new(&open_config()).unwrap();
        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, TaxDeskError::Validation { .. }));
    }

    #[tokio::test]
    async fn domain_policy_rejects_before_request() {
        let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();
        let url = Url::parse("https://example.com/listing").unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(err.to_string().contains("outside the allowed domains"));
    }

    #[tokio::test]
    async fn redirect_outside_policy_is_not_followed() {
        let target = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("secret"))
            .expect(0)
            .mount(&target)
            .await;

        let origin = MockServer::start().await;
        let elsewhere = format!("http://localhost:{}/internal", target.address().port());
        Mock::given(method("GET"))
            .and(path("/Documentos"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", elsewhere.as_str()))
            .mount(&origin)
            .await;

        let policy = DomainPolicy::new(vec![AllowedDomain {
            pattern: "127.0.0.1".into(),
            path_allowlist: vec![],
        }]);
        let fetcher = HttpFetcher::new(&open_config())
            .unwrap()
            .allow_localhost()
            .with_policy(policy)
            .unwrap();
        let url = Url::parse(&format!("{}/Documentos", origin.uri())).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, TaxDeskError::Network(_)));
        assert!(err.to_string().contains("outside the allowed domains"));
    }

    #[tokio::test]
    async fn redirect_within_policy_is_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&open_config()).unwrap().allow_localhost();
        let url = Url::parse(&format!("{}/old", server.uri())).unwrap();
        assert_eq!(fetcher.fetch(&url).await.unwrap(), "moved");
    }

    #[test]
    fn redirect_hop_to_metadata_address_is_refused() {
        let hop = Url::parse("http://169.254.169.254/latest/meta-data").unwrap();
        let err = check_target(&DomainPolicy::allow_all(), false, &hop).unwrap_err();
        assert!(matches!(err, TaxDeskError::Validation { .. }));
        assert!(check_target(&DomainPolicy::allow_all(), true, &hop).is_ok());
    }
}
