use std::borrow::Cow;
use std::io::Cursor;

use async_trait::async_trait;
use encoding_rs::Encoding;

use crate::error::ParseError;
use crate::feed::Article;

#[async_trait]
pub trait FeedParser: Send + Sync {
    /// An empty list is a valid result, not an error.
    async fn parse(
        &self,
        body: &[u8],
        url: &str,
        charset: Option<&str>,
    ) -> Result<Vec<Article>, ParseError>;
}

/// RSS 2.0 first, Atom as the fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyndicationParser;

#[async_trait]
impl FeedParser for SyndicationParser {
    async fn parse(
        &self,
        body: &[u8],
        url: &str,
        charset: Option<&str>,
    ) -> Result<Vec<Article>, ParseError> {
        let text = decode(body, charset)?;

        let rss_err = match rss::Channel::read_from(Cursor::new(text.as_bytes())) {
            Ok(channel) => {
                return Ok(channel
                    .items()
                    .iter()
                    .filter_map(Article::from_rss_item)
                    .collect())
            }
            Err(e) => e,
        };

        match atom_syndication::Feed::read_from(Cursor::new(text.as_bytes())) {
            Ok(feed) => Ok(feed
                .entries()
                .iter()
                .filter_map(Article::from_atom_entry)
                .collect()),
            Err(atom_err) => Err(ParseError::Unrecognized {
                url: url.to_owned(),
                reason: format!("rss: {rss_err}; atom: {atom_err}"),
            }),
        }
    }
}

fn decode<'a>(body: &'a [u8], charset: Option<&str>) -> Result<Cow<'a, str>, ParseError> {
    let encoding = match charset {
        Some(label) => Encoding::for_label(label.as_bytes())
            .ok_or_else(|| ParseError::Charset(label.to_owned()))?,
        None => encoding_rs::UTF_8,
    };
    let (text, _, _) = encoding.decode(body);
    Ok(text)
}
