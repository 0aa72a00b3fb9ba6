//! HTML link extraction
//!
//! Outlinks are taken from successful `text/html` responses:
//! - `<a href>` as followed links
//! - `<link rel="canonical" href>` as redirect-like hops
//! - `<img src>` as embeds
//!
//! Relative links resolve against `<base href>` when the page has one, or
//! the item's own URI. Links that cannot be resolved go to the URI error
//! log.

use crate::pipeline::{Processor, ProcessorContext, ProcessorError};
use crate::uri::{
    canonicalize, resolve_link, CandidateUri, CrawlUri, HOP_EMBED, HOP_LINK, HOP_REDIRECT,
};
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

const HTML_TYPES: &[&str] = &["text/html", "application/xhtml+xml"];

/// Selector and attribute for each kind of link, with its hop letter
const LINK_SOURCES: &[(&str, &str, char)] = &[
    ("a[href]", "href", HOP_LINK),
    ("link[rel=canonical][href]", "href", HOP_REDIRECT),
    ("img[src]", "src", HOP_EMBED),
];

pub struct ExtractHtml {
    name: String,
    pages: AtomicU64,
    links: AtomicU64,
}

impl ExtractHtml {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            pages: AtomicU64::new(0),
            links: AtomicU64::new(0),
        }
    }
}

fn is_html(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|mime| {
            let mime = mime.trim().to_ascii_lowercase();
            HTML_TYPES.contains(&mime.as_str())
        })
        .unwrap_or(false)
}

fn selector(css: &str) -> Result<Selector, ProcessorError> {
    Selector::parse(css)
        .map_err(|e| ProcessorError::Runtime(format!("bad selector '{}': {:?}", css, e)))
}

/// Every `(href, hop)` on the page, in document order per kind
fn extract_links(document: &Html) -> Result<Vec<(String, char)>, ProcessorError> {
    let mut found = Vec::new();
    for (css, attribute, hop) in LINK_SOURCES {
        let selector = selector(css)?;
        for element in document.select(&selector) {
            if let Some(value) = element.value().attr(attribute) {
                found.push((value.to_string(), *hop));
            }
        }
    }
    Ok(found)
}

fn base_href(document: &Html, page: &Url) -> Result<Url, ProcessorError> {
    let selector = selector("base[href]")?;
    let base = document
        .select(&selector)
        .next()
        .and_then(|element| element.value().attr("href"))
        .and_then(|href| resolve_link(page, href).ok().flatten());
    Ok(base.unwrap_or_else(|| page.clone()))
}

impl Processor for ExtractHtml {
    fn name(&self) -> &str {
        &self.name
    }

    fn inner_process(
        &self,
        ctx: &ProcessorContext,
        curi: &mut CrawlUri,
    ) -> Result<(), ProcessorError> {
        let status = curi.fetch_status();
        if curi.has_been_link_extracted()
            || !(200..300).contains(&status)
            || !is_html(curi.content_type())
        {
            return Ok(());
        }
        let Some(body) = curi.body() else {
            return Ok(());
        };

        let text = String::from_utf8_lossy(body).into_owned();
        let (base, links) = {
            let document = Html::parse_document(&text);
            (base_href(&document, curi.uri())?, extract_links(&document)?)
        };

        let mut seen = HashSet::new();
        let mut added = 0;
        for (href, hop) in links {
            match resolve_link(&base, &href) {
                Ok(Some(target)) => {
                    if seen.insert((canonicalize(&target), hop)) {
                        let candidate = CandidateUri::discovered(target, curi, hop);
                        curi.add_outlink(candidate);
                        added += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => ctx.logs().uri_error(&href, curi, &e.to_string()),
            }
        }

        tracing::debug!("{} found {} links in {}", self.name, added, curi);
        self.pages.fetch_add(1, Ordering::Relaxed);
        self.links.fetch_add(added, Ordering::Relaxed);
        curi.link_extraction_finished();
        Ok(())
    }

    fn report(&self) -> String {
        format!(
            "Processor: {}\n  Pages handled: {}\n  Links extracted: {}\n",
            self.name,
            self.pages.load(Ordering::Relaxed),
            self.links.load(Ordering::Relaxed)
        )
    }
}
