//! Paginated retrieval of one logical UniProt result set.
//!
//! A query is answered page by page. Every page repeats the header line and
//! may be gzip-compressed; the next page is announced through a
//! `Link: <url>; rel="next"` response header.

use std::io::Read;
use std::sync::LazyLock;

use flate2::read::MultiGzDecoder;
use regex::Regex;
use reqwest::Url;
use tracing::debug;

use crate::error::PeelError;
use crate::table::TsvTable;
use crate::uniprot::{HttpReply, Transport, ensure_success};

static NEXT_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<(.+)>; rel="next""#).expect("valid next-link pattern"));

pub fn next_link(header: Option<&str>) -> Option<String> {
    let header = header?;
    NEXT_LINK
        .captures(header)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

/// Decode a page body into its non-empty lines.
pub fn decode_lines(body: &[u8], compressed: bool) -> Result<Vec<String>, PeelError> {
    let text = if compressed {
        let mut decoder = MultiGzDecoder::new(body);
        let mut text = String::new();
        decoder
            .read_to_string(&mut text)
            .map_err(|err| PeelError::UniprotPayload(format!("gzip payload: {err}")))?;
        text
    } else {
        String::from_utf8(body.to_vec())
            .map_err(|err| PeelError::UniprotPayload(err.to_string()))?
    };
    Ok(text
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect())
}

/// Append a follow-up page, skipping its repeated header line.
pub fn combine_pages(mut all: Vec<String>, page: Vec<String>) -> Vec<String> {
    all.extend(page.into_iter().skip(1));
    all
}

/// Rewrite a results location so it yields compressed TSV pages.
pub fn results_url(location: &str, page_size: usize) -> Result<String, PeelError> {
    let mut url = Url::parse(location)
        .map_err(|err| PeelError::UniprotPayload(format!("results location {location}: {err}")))?;
    let kept = url
        .query_pairs()
        .filter(|(key, _)| !matches!(key.as_ref(), "format" | "size" | "compressed"))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect::<Vec<_>>();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("format", "tsv")
        .append_pair("size", &page_size.to_string())
        .append_pair("compressed", "true");
    Ok(url.to_string())
}

pub struct ChunkedBatchFetcher<'a, T: Transport> {
    transport: &'a T,
}

impl<'a, T: Transport> ChunkedBatchFetcher<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self { transport }
    }

    /// Fetch every page of `url`; the header line appears once, first.
    pub async fn fetch_lines(&self, url: &str, compressed: bool) -> Result<Vec<String>, PeelError> {
        debug!(%url, "fetching data");
        let reply = self.get(url).await?;
        let mut lines = decode_lines(&reply.body, compressed)?;
        let mut next = next_link(reply.link.as_deref());
        let mut pages = 1usize;
        while let Some(url) = next {
            let reply = self.get(&url).await?;
            lines = combine_pages(lines, decode_lines(&reply.body, compressed)?);
            next = next_link(reply.link.as_deref());
            pages += 1;
        }
        debug!(pages, lines = lines.len(), "pagination finished");
        Ok(lines)
    }

    pub async fn fetch_table(&self, url: &str, compressed: bool) -> Result<TsvTable, PeelError> {
        let lines = self.fetch_lines(url, compressed).await?;
        if lines.is_empty() {
            return Ok(TsvTable::default());
        }
        TsvTable::from_lines(&lines)
    }

    async fn get(&self, url: &str) -> Result<HttpReply, PeelError> {
        ensure_success(self.transport.get(url).await?)
    }
}
