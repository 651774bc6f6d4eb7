//! HTTP probe implementation.

use async_trait::async_trait;
use reqwest::redirect::Policy;
use std::time::Duration;

use super::{Checker, ProbeError, SourceIdentity};

/// HTTP GET checker bound to one source identity.
///
/// Any completed response counts as up, whatever its status. Keep-alive is
/// off, so each check opens and closes its own connection.
pub struct HttpChecker {
    client: reqwest::Client,
    source: String,
}

impl HttpChecker {
    pub fn new(
        source: &SourceIdentity,
        timeout: Duration,
        follow_redirects: bool,
    ) -> Result<Self, ProbeError> {
        let redirect = if follow_redirects {
            Policy::default()
        } else {
            Policy::none()
        };

        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout / 2)
            .redirect(redirect)
            .pool_max_idle_per_host(0);

        match source {
            SourceIdentity::Local(ip) => builder = builder.local_address(*ip),
            SourceIdentity::Proxy(url) => {
                let proxy = reqwest::Proxy::all(url.as_str()).map_err(|e| ProbeError::Proxy {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
                builder = builder.proxy(proxy);
            }
            SourceIdentity::Detected(_) => {}
        }

        Ok(Self {
            client: builder.build()?,
            source: source.to_string(),
        })
    }
}

#[async_trait]
impl Checker for HttpChecker {
    fn source(&self) -> &str {
        &self.source
    }

    async fn check(&self, endpoint: &str) -> bool {
        let response = match self.client.get(endpoint).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("{} from {}: down ({})", endpoint, self.source, e);
                return false;
            }
        };

        // Drain the body so the connection closes cleanly; its content is irrelevant.
        if let Err(e) = response.bytes().await {
            tracing::debug!("{} from {}: body read failed ({})", endpoint, self.source, e);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn loopback() -> SourceIdentity {
        SourceIdentity::Local(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    #[tokio::test]
    async fn test_error_status_counts_as_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let checker = HttpChecker::new(&loopback(), Duration::from_secs(2), false).unwrap();
        assert!(checker.check(&server.uri()).await);
        assert_eq!(checker.source(), "127.0.0.1");
    }

    #[tokio::test]
    async fn test_refused_connection_is_down() {
        let checker = HttpChecker::new(&loopback(), Duration::from_secs(2), false).unwrap();
        assert!(!checker.check("http://127.0.0.1:1/").await);
    }

    #[tokio::test]
    async fn test_slow_response_times_out_as_down() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let checker = HttpChecker::new(&loopback(), Duration::from_millis(200), false).unwrap();
        assert!(!checker.check(&server.uri()).await);
    }

    #[tokio::test]
    async fn test_redirect_policy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("Location", "http://127.0.0.1:1/"),
            )
            .mount(&server)
            .await;

        let terminal = HttpChecker::new(&loopback(), Duration::from_secs(2), false).unwrap();
        assert!(terminal.check(&server.uri()).await);

        let following = HttpChecker::new(&loopback(), Duration::from_secs(2), true).unwrap();
        assert!(!following.check(&server.uri()).await);
    }
}
