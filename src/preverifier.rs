use crate::canonicalizer::{CanonicalEmail, DKIM_SIGNATURE_HEADER};
use mailparse::{parse_mail, MailHeaderMap};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use trust_dns_resolver::TokioAsyncResolver;

/// Email plus the DNS material the prover needs to check its signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnverifiedEmail {
    pub email: String,
    pub dns_records: Vec<String>,
}

#[derive(Debug, Error)]
pub enum PreverifyError {
    #[error("{0}")]
    Malformed(String),
    #[error("{0}")]
    KeyLookup(String),
}

/// Turns a canonical email into the artifact the prover consumes.
///
/// Called from a blocking context; implementations may block.
pub trait Preverifier: Send + Sync {
    fn preverify(&self, canonical: CanonicalEmail) -> Result<UnverifiedEmail, PreverifyError>;
}

/// Selector and signing domain of a DKIM signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DkimTags {
    pub domain: String,
    pub selector: String,
}

impl DkimTags {
    pub fn parse(header_value: &str) -> Result<Self, PreverifyError> {
        let mut domain = None;
        let mut selector = None;
        let mut signature = None;
        for tag in header_value.split(';') {
            let Some((name, value)) = tag.split_once('=') else {
                continue;
            };
            let value: String = value.chars().filter(|c| !c.is_whitespace()).collect();
            match name.trim() {
                "d" => domain = Some(value),
                "s" => selector = Some(value),
                "b" => signature = Some(value),
                _ => {}
            }
        }
        let missing =
            |tag: &str| PreverifyError::Malformed(format!("DKIM-Signature has no {tag}= tag"));
        let domain = domain.filter(|d| !d.is_empty()).ok_or_else(|| missing("d"))?;
        let selector = selector.filter(|s| !s.is_empty()).ok_or_else(|| missing("s"))?;
        signature.filter(|b| !b.is_empty()).ok_or_else(|| missing("b"))?;
        Ok(Self { domain, selector })
    }

    pub fn key_name(&self) -> String {
        format!("{}._domainkey.{}", self.selector, self.domain)
    }
}

/// Parses the email with `mailparse` and, when a resolver is configured,
/// fetches the signer's DKIM key record.
pub struct MailPreverifier {
    resolver: Option<TokioAsyncResolver>,
}

impl MailPreverifier {
    /// Preverifier that ships no DNS records; the prover resolves keys itself.
    pub fn offline() -> Self {
        Self { resolver: None }
    }

    pub fn with_resolver(resolver: TokioAsyncResolver) -> Self {
        Self {
            resolver: Some(resolver),
        }
    }

    pub fn from_system_conf() -> anyhow::Result<Self> {
        Ok(Self::with_resolver(TokioAsyncResolver::tokio_from_system_conf()?))
    }

    fn lookup_key(
        &self,
        resolver: &TokioAsyncResolver,
        tags: &DkimTags,
    ) -> Result<Vec<String>, PreverifyError> {
        let name = tags.key_name();
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| PreverifyError::KeyLookup(format!("{name}: {e}")))?;
        let lookup = handle
            .block_on(resolver.txt_lookup(name.as_str()))
            .map_err(|e| PreverifyError::KeyLookup(format!("{name}: {e}")))?;
        let records: Vec<String> = lookup
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk))
                    .collect::<String>()
            })
            .collect();
        if records.is_empty() {
            return Err(PreverifyError::KeyLookup(format!("no DKIM key published at {name}")));
        }
        debug!(%name, records = records.len(), "resolved DKIM key");
        Ok(records)
    }
}

impl Preverifier for MailPreverifier {
    fn preverify(&self, canonical: CanonicalEmail) -> Result<UnverifiedEmail, PreverifyError> {
        let email = String::from_utf8(canonical.into_bytes())
            .map_err(|_| PreverifyError::Malformed("email is not valid UTF-8".to_string()))?;
        let tags = {
            let parsed = parse_mail(email.as_bytes())
                .map_err(|e| PreverifyError::Malformed(e.to_string()))?;
            if parsed.headers.get_first_value("From").is_none() {
                return Err(PreverifyError::Malformed("missing From header".to_string()));
            }
            let signature = parsed
                .headers
                .get_first_value(DKIM_SIGNATURE_HEADER)
                .ok_or_else(|| {
                    PreverifyError::Malformed("missing DKIM-Signature header".to_string())
                })?;
            DkimTags::parse(&signature)?
        };
        let dns_records = match &self.resolver {
            Some(resolver) => self.lookup_key(resolver, &tags)?,
            None => Vec::new(),
        };
        Ok(UnverifiedEmail { email, dns_records })
    }
}
