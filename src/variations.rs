//! Deterministic URL variants: word-split domains, hyphen stripping, sibling
//! TLDs and the www toggle.

use crate::error::{AppError, Result};
use std::ops::Range;
use url::Url;

const SIBLING_TLDS: [&str; 3] = ["org", "net", "io"];

/// Host as written in the input. `url::Url` lowercases hosts, which would
/// erase the camelCase boundaries the word splitter relies on.
struct RawHost<'a> {
    input: &'a str,
    span: Range<usize>,
}

impl<'a> RawHost<'a> {
    fn parse(input: &'a str) -> Result<Self> {
        let parsed = Url::parse(input)
            .map_err(|e| AppError::MalformedInput(format!("{:?}: {}", input, e)))?;
        if parsed.host_str().map_or(true, str::is_empty) {
            return Err(AppError::MalformedInput(format!("{:?} has no host", input)));
        }

        // `Url::parse` trims surrounding whitespace and accepts any run of
        // slashes or backslashes after a special scheme, so scan the same way.
        let end = input.trim_end_matches(|c: char| c <= ' ').len();
        let scheme_end = input
            .find(':')
            .ok_or_else(|| AppError::MalformedInput(format!("{:?} has no scheme", input)))?;
        let start = scheme_end
            + 1
            + input[scheme_end + 1..end]
                .find(|c: char| !matches!(c, '/' | '\\'))
                .unwrap_or(end - scheme_end - 1);
        let authority_len = input[start..end]
            .find(|c: char| matches!(c, '/' | '\\' | '?' | '#'))
            .unwrap_or(end - start);
        let authority = &input[start..start + authority_len];

        let host_start = authority.rfind('@').map_or(0, |i| i + 1);
        let host_part = &authority[host_start..];
        let host_len = if host_part.starts_with('[') {
            host_part.find(']').map_or(host_part.len(), |i| i + 1)
        } else {
            host_part.find(':').unwrap_or(host_part.len())
        };

        let begin = start + host_start;
        Ok(Self {
            input,
            span: begin..begin + host_len,
        })
    }

    fn host(&self) -> &'a str {
        &self.input[self.span.clone()]
    }

    fn labels(&self) -> Vec<&'a str> {
        self.host().split('.').collect()
    }

    fn with_host(&self, host: &str) -> String {
        format!(
            "{}{}{}",
            &self.input[..self.span.start],
            host,
            &self.input[self.span.end..]
        )
    }
}

/// Generates candidate URLs for `base_url`, starting with `base_url` itself.
pub fn generate_url_variations(base_url: &str) -> Result<Vec<String>> {
    let raw = RawHost::parse(base_url)?;
    let labels = raw.labels();
    let tld = labels.last().copied().unwrap_or_default();
    let domain = if labels.len() >= 2 {
        Some(labels[labels.len() - 2])
    } else {
        None
    };

    let mut variations = vec![base_url.to_string()];

    if let Some(domain) = domain.filter(|d| !d.is_empty()) {
        if !domain.contains('-') && !domain.contains('_') {
            let words = split_words(domain);
            if words.len() > 1 {
                let hyphenated = words.join("-").to_lowercase();
                variations.push(format!("https://{}.{}", hyphenated, tld));

                let underscored = words.join("_").to_lowercase();
                variations.push(format!("https://{}.{}", underscored, tld));

                variations.push(format!("https://{}.{}", camel_case(&words), tld));
            }
        }

        if domain.contains('-') {
            variations.push(format!("https://{}.{}", domain.replace('-', ""), tld));
        }
    }

    if tld == "com" {
        let stem = &raw.host()[..raw.host().len() - tld.len()];
        for sibling in SIBLING_TLDS {
            variations.push(raw.with_host(&format!("{}{}", stem, sibling)));
        }
    }

    let host = raw.host();
    if host.get(..4).map_or(false, |p| p.eq_ignore_ascii_case("www.")) {
        variations.push(raw.with_host(&host[4..]));
    } else {
        variations.push(raw.with_host(&format!("www.{}", host)));
    }

    Ok(dedup_preserving_order(variations))
}

fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

fn camel_case(words: &[String]) -> String {
    let mut out = words[0].to_lowercase();
    for word in &words[1..] {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(&chars.as_str().to_lowercase());
        }
    }
    out
}

/// Splits a domain label into word-like tokens: a capitalized or lowercase
/// run, or an all-caps run that is not the first letter of a capitalized word.
/// Characters outside any token (digits, for instance) are skipped.
pub fn split_words(label: &str) -> Vec<String> {
    let chars: Vec<char> = label.chars().collect();
    let mut words = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        match match_word_at(&chars, i) {
            Some(end) => {
                words.push(chars[i..end].iter().collect());
                i = end;
            }
            None => i += 1,
        }
    }
    words
}

fn match_word_at(chars: &[char], start: usize) -> Option<usize> {
    let n = chars.len();

    // Optional capital followed by at least one lowercase letter.
    let mut j = start;
    if chars[j].is_ascii_uppercase() {
        j += 1;
    }
    let lower_start = j;
    while j < n && chars[j].is_ascii_lowercase() {
        j += 1;
    }
    if j > lower_start {
        return Some(j);
    }

    // Capital run ending before a capitalized word or at a word boundary.
    if !chars[start].is_ascii_uppercase() {
        return None;
    }
    let mut run_end = start;
    while run_end < n && chars[run_end].is_ascii_uppercase() {
        run_end += 1;
    }
    (start + 1..=run_end).rev().find(|&end| {
        let starts_word = end + 1 < n
            && chars[end].is_ascii_uppercase()
            && chars[end + 1].is_ascii_lowercase();
        let at_boundary = end == n || !is_word_char(chars[end]);
        starts_word || at_boundary
    })
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
