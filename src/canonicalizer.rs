use regex::bytes::Regex;
use tracing::debug;

pub const DKIM_SIGNATURE_HEADER: &str = "DKIM-Signature";
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";

/// Headers deduplicated unless configured otherwise. A second top-level
/// `Content-Type` declares a boundary that conflicts with the first one.
pub const DEFAULT_DEDUP_HEADERS: [&str; 2] = [DKIM_SIGNATURE_HEADER, CONTENT_TYPE_HEADER];

/// Raw MIME message exactly as it was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage(Vec<u8>);

impl EmailMessage {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Email normalized into the single form the prover accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalEmail(Vec<u8>);

impl CanonicalEmail {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Removes header blocks that upstream relays duplicate.
///
/// A block starts at a line beginning with one of the configured header
/// names and runs over its folded continuation lines, up to the next line
/// that starts a new header. When a header occurs more than once, only the
/// first block is kept. Only the top-level header section is scanned.
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    blocks: Vec<(String, Regex)>,
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_HEADERS)
    }
}

impl Canonicalizer {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let blocks = headers
            .into_iter()
            .map(|name| {
                let name = name.as_ref().trim().to_string();
                (name.clone(), header_block_regex(&name))
            })
            .collect();
        Self { blocks }
    }

    pub fn canonicalize(&self, raw: EmailMessage) -> CanonicalEmail {
        let mut bytes = raw.0;
        for (name, regex) in &self.blocks {
            let header_end = header_section_end(&bytes);
            let spans: Vec<(usize, usize)> = regex
                .find_iter(&bytes[..header_end])
                .map(|m| (m.start(), m.end()))
                .collect();
            if spans.len() < 2 {
                continue;
            }
            debug!(
                header = %name,
                removed = spans.len() - 1,
                "dropping duplicated header blocks"
            );
            let mut kept = Vec::with_capacity(bytes.len());
            let mut cursor = 0;
            for (start, end) in spans.into_iter().skip(1) {
                kept.extend_from_slice(&bytes[cursor..start]);
                cursor = end;
            }
            kept.extend_from_slice(&bytes[cursor..]);
            bytes = kept;
        }
        CanonicalEmail(bytes)
    }
}

fn header_block_regex(name: &str) -> Regex {
    let pattern = format!(
        r"(?mi)^{}[ \t]*:[^\n]*(?:\n[ \t][^\n]*)*(?:\n|\z)",
        regex::escape(name)
    );
    // The name is escaped, so the pattern is always valid.
    Regex::new(&pattern).unwrap_or_else(|e| unreachable!("header regex: {e}"))
}

/// Length of the top-level header section, including the line break of its
/// last header. The whole input when there is no empty line.
fn header_section_end(bytes: &[u8]) -> usize {
    [&b"\n\r\n"[..], &b"\n\n"[..]]
        .iter()
        .filter_map(|sep| find(bytes, sep))
        .min()
        .map(|idx| idx + 1)
        .unwrap_or(bytes.len())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
