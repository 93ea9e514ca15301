use feed_core::error::FetchError;
use feed_core::fetch::{FetchOutcome, Fetcher, HttpFetcher};
use feed_core::parse::{FeedParser, SyndicationParser};
use reqwest::Client;
use wiremock::matchers::{method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

/// Compares the whole header value; HTTP dates contain commas, which the
/// stock `header` matcher treats as list separators.
struct ExactHeader(&'static str, &'static str);

impl Match for ExactHeader {
    fn matches(&self, request: &Request) -> bool {
        request
            .headers
            .get(self.0)
            .and_then(|value| value.to_str().ok())
            == Some(self.1)
    }
}

fn sample_rss() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test Feed</title>
    <link>http://example.com/</link>
    <description>Test description</description>
    <item>
      <title>Item 1</title>
      <link>http://example.com/1</link>
      <guid>1</guid>
      <pubDate>Mon, 21 Oct 2024 07:28:00 GMT</pubDate>
    </item>
    <item>
      <title>Item 2</title>
      <link>http://example.com/2</link>
      <guid>2</guid>
    </item>
  </channel>
</rss>"#
        .to_string()
}

#[tokio::test]
async fn fetch_returns_body_and_validators() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sample_rss(), "application/rss+xml; charset=UTF-8")
                .insert_header("last-modified", "Mon, 21 Oct 2024 08:00:00 GMT")
                .insert_header("etag", "\"v1\""),
        )
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(Client::new());
    let url = format!("{}/feed", server.uri());
    let outcome = fetcher.fetch(&url, None).await.unwrap();
    let FetchOutcome::Fetched(feed) = outcome else {
        panic!("expected a fetched body");
    };
    let validators = feed.validators.expect("both validators present");
    assert_eq!(
        validators.last_modified.as_deref(),
        Some("Mon, 21 Oct 2024 08:00:00 GMT")
    );
    assert_eq!(validators.etag.as_deref(), Some("\"v1\""));
    assert_eq!(feed.charset.as_deref(), Some("utf-8"));

    let articles = SyndicationParser
        .parse(&feed.body, &url, feed.charset.as_deref())
        .await
        .unwrap();
    let ids: Vec<&str> = articles.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2"]);
}

#[tokio::test]
async fn conditional_request_yields_not_modified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .and(ExactHeader("if-modified-since", "Mon, 21 Oct 2024 08:00:00 GMT"))
        .and(ExactHeader("if-none-match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(Client::new());
    let outcome = fetcher
        .fetch(
            &format!("{}/feed", server.uri()),
            Some(("Mon, 21 Oct 2024 08:00:00 GMT", "\"v1\"")),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, FetchOutcome::NotModified));
}

#[tokio::test]
async fn single_validator_header_is_not_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"only\"")
                .set_body_string(sample_rss()),
        )
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(Client::new());
    let outcome = fetcher
        .fetch(&format!("{}/feed", server.uri()), None)
        .await
        .unwrap();
    let FetchOutcome::Fetched(feed) = outcome else {
        panic!("expected a fetched body");
    };
    assert!(feed.validators.is_none());
}

#[tokio::test]
async fn error_status_is_a_fetch_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(Client::new());
    let err = fetcher
        .fetch(&format!("{}/feed", server.uri()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 500, .. }));
}

#[tokio::test]
async fn invalid_url_is_rejected_before_sending() {
    let fetcher = HttpFetcher::new(Client::new());
    let err = fetcher.fetch("not a url", None).await.unwrap_err();
    assert!(matches!(err, FetchError::InvalidUrl(_)));
}
