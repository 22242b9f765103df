// crates/policy-mirror-cli/src/convert.rs
// ============================================================================
// Module: Rule File Conversion
// Description: CSV policy files to rule documents and back into records.
// Purpose: Bootstrap a store from existing flat policy files.
// Dependencies: policy-mirror-core, reqwest, serde, serde_yaml, url
// ============================================================================

//! ## Overview
//! A policy file holds one rule per line: the rule type followed by up to six
//! comma-separated values. Blank lines and `#` comments are skipped and
//! leading whitespace before each value is ignored. Values may be
//! double-quoted, with `""` standing for a literal quote.
//!
//! Each rule becomes one YAML document named by its canonical key, in the
//! same form the store persists. Documents are separated by `---` lines so
//! the output can be appended to and applied as a batch.
//!
//! Security posture: local files and remote bodies are untrusted; sizes are
//! capped, redirects are rejected, and HTML pages are refused.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use policy_mirror_core::Labels;
use policy_mirror_core::RULE_API_VERSION;
use policy_mirror_core::RULE_FIELD_COUNT;
use policy_mirror_core::RULE_KIND;
use policy_mirror_core::RuleRecord;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum policy file or rule document payload in bytes.
pub const MAX_INPUT_BYTES: usize = 8 * 1024 * 1024;
/// Request timeout for remote policy files.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// Marker identifying an HTML page fetched by mistake.
const HTML_DOCTYPE: &str = "<!DOCTYPE html>";
/// Output target meaning stdout.
pub const STDOUT_TARGET: &str = "-";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Conversion failures.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// Input location is unusable.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Local file I/O failed.
    #[error("io error: {0}")]
    Io(String),
    /// Remote fetch failed or returned unusable content.
    #[error("http error: {0}")]
    Http(String),
    /// Payload exceeds [`MAX_INPUT_BYTES`].
    #[error("input exceeds {MAX_INPUT_BYTES} bytes")]
    TooLarge,
    /// A policy line could not be parsed.
    #[error("line {line}: {message}")]
    Parse {
        /// One-based line number.
        line: usize,
        /// Parser message.
        message: String,
    },
    /// A rule document is malformed or inconsistent.
    #[error("invalid rule document: {0}")]
    Document(String),
}

// ============================================================================
// SECTION: Sources
// ============================================================================

/// Where a policy file is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicySource {
    /// Local file.
    File(PathBuf),
    /// Remote `http` or `https` URL.
    Url(Url),
}

impl PolicySource {
    /// Classifies an input argument.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::InvalidInput`] for an empty argument or `-`.
    pub fn parse(input: &str) -> Result<Self, ConvertError> {
        if input.is_empty() {
            return Err(ConvertError::InvalidInput("missing input, provide a file path or HTTP(S) URL".to_string()));
        }
        if input == STDOUT_TARGET {
            return Err(ConvertError::InvalidInput(
                "stdin input is not supported, provide a file path or HTTP(S) URL".to_string(),
            ));
        }
        if let Ok(url) = Url::parse(input)
            && matches!(url.scheme(), "http" | "https")
        {
            return Ok(Self::Url(url));
        }
        Ok(Self::File(PathBuf::from(input)))
    }

    /// Reads the policy text.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError`] when the source cannot be read or its content
    /// is rejected.
    pub fn read(&self) -> Result<String, ConvertError> {
        match self {
            Self::File(path) => read_file(path),
            Self::Url(url) => fetch_url(url),
        }
    }
}

/// Reads a local file with the size cap applied.
///
/// # Errors
///
/// Returns [`ConvertError`] on I/O failure, oversize, or invalid UTF-8.
pub fn read_file(path: &Path) -> Result<String, ConvertError> {
    let file = File::open(path).map_err(|err| ConvertError::Io(format!("read {}: {err}", path.display())))?;
    let limit = u64::try_from(MAX_INPUT_BYTES).map_err(|_| ConvertError::TooLarge)?;
    let mut bytes = Vec::new();
    file.take(limit.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|err| ConvertError::Io(format!("read {}: {err}", path.display())))?;
    if bytes.len() > MAX_INPUT_BYTES {
        return Err(ConvertError::TooLarge);
    }
    String::from_utf8(bytes).map_err(|_| ConvertError::InvalidInput(format!("{} is not utf-8", path.display())))
}

/// Fetches a remote policy file.
fn fetch_url(url: &Url) -> Result<String, ConvertError> {
    let client = Client::builder()
        .redirect(Policy::none())
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|err| ConvertError::Http(err.to_string()))?;
    let response = client.get(url.as_str()).send().map_err(|err| ConvertError::Http(format!("get {url}: {err}")))?;
    if !response.status().is_success() {
        return Err(ConvertError::Http(format!("get {url}: unexpected status {}", response.status())));
    }
    let limit = u64::try_from(MAX_INPUT_BYTES).map_err(|_| ConvertError::TooLarge)?;
    if let Some(length) = response.content_length()
        && length > limit
    {
        return Err(ConvertError::TooLarge);
    }
    let content_type =
        response.headers().get(CONTENT_TYPE).and_then(|value| value.to_str().ok()).map(str::to_string);
    let mut bytes = Vec::new();
    response
        .take(limit.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|err| ConvertError::Http(format!("read body: {err}")))?;
    check_remote_payload(content_type.as_deref(), bytes)
}

/// Validates a fetched body and decodes it.
///
/// The content type, when present, must be textual or mention `csv`. Bodies
/// that are HTML pages (such as a repository viewer instead of the raw file)
/// are rejected.
///
/// # Errors
///
/// Returns [`ConvertError`] when the payload is rejected.
pub fn check_remote_payload(content_type: Option<&str>, bytes: Vec<u8>) -> Result<String, ConvertError> {
    if bytes.len() > MAX_INPUT_BYTES {
        return Err(ConvertError::TooLarge);
    }
    if let Some(content_type) = content_type.filter(|value| !value.is_empty())
        && !content_type.starts_with("text/")
        && !content_type.contains("csv")
    {
        return Err(ConvertError::Http(format!(
            "unexpected content type {content_type}, expected a raw policy file URL"
        )));
    }
    let body = String::from_utf8(bytes).map_err(|_| ConvertError::Http("response body is not utf-8".to_string()))?;
    if body.trim_start().starts_with(HTML_DOCTYPE) {
        return Err(ConvertError::Http("fetched an HTML page instead of a raw policy file".to_string()));
    }
    Ok(body)
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

/// Parses policy text into records.
///
/// # Errors
///
/// Returns [`ConvertError::Parse`] for malformed lines or rules wider than
/// six values.
pub fn parse_policy(content: &str) -> Result<Vec<RuleRecord>, ConvertError> {
    let mut records = Vec::new();
    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let tokens = split_policy_line(line).map_err(|message| ConvertError::Parse {
            line: index + 1,
            message,
        })?;
        let Some((ptype, values)) = tokens.split_first() else {
            continue;
        };
        if values.len() > RULE_FIELD_COUNT {
            return Err(ConvertError::Parse {
                line: index + 1,
                message: format!("rule has {} values, at most {RULE_FIELD_COUNT} are supported", values.len()),
            });
        }
        records.push(RuleRecord::project(ptype.as_str(), values));
    }
    Ok(records)
}

/// Splits one comma-separated line into values.
///
/// # Errors
///
/// Returns a message for stray or unterminated quotes.
pub fn split_policy_line(line: &str) -> Result<Vec<String>, String> {
    let mut values = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        while chars.peek().is_some_and(|ch| *ch == ' ' || *ch == '\t') {
            chars.next();
        }
        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') if chars.peek() == Some(&'"') => {
                        chars.next();
                        value.push('"');
                    }
                    Some('"') => break,
                    Some(ch) => value.push(ch),
                    None => return Err("unterminated quoted value".to_string()),
                }
            }
            match chars.next() {
                None => {
                    values.push(value);
                    return Ok(values);
                }
                Some(',') => values.push(value),
                Some(_) => return Err("unexpected character after quoted value".to_string()),
            }
        } else {
            loop {
                match chars.next() {
                    None => {
                        values.push(value);
                        return Ok(values);
                    }
                    Some(',') => {
                        values.push(value);
                        break;
                    }
                    Some('"') => return Err("bare quote in unquoted value".to_string()),
                    Some(ch) => value.push(ch),
                }
            }
        }
    }
}

// ============================================================================
// SECTION: Documents
// ============================================================================

/// Metadata of a rule document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    /// Canonical key of the rule.
    pub name: String,
    /// Target namespace; empty inherits the applying scope.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Labels; empty inherits the applying scope.
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
}

/// One rule in document form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDocument {
    /// API version of the rule kind.
    pub api_version: String,
    /// Kind name.
    pub kind: String,
    /// Object metadata.
    pub metadata: DocumentMeta,
    /// Stored rule.
    pub spec: RuleRecord,
}

impl RuleDocument {
    /// Builds the document for `record`.
    #[must_use]
    pub fn for_record(record: RuleRecord, namespace: &str, labels: &Labels) -> Self {
        Self {
            api_version: RULE_API_VERSION.to_string(),
            kind: RULE_KIND.to_string(),
            metadata: DocumentMeta {
                name: record.canonical_key(),
                namespace: namespace.to_string(),
                labels: labels.clone(),
            },
            spec: record,
        }
    }

    /// Checks kind, version, and that the name matches the rule content.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::Document`] describing the first mismatch.
    pub fn validate(&self) -> Result<(), ConvertError> {
        if self.kind != RULE_KIND || self.api_version != RULE_API_VERSION {
            return Err(ConvertError::Document(format!(
                "{} has kind {}/{}, expected {RULE_API_VERSION}/{RULE_KIND}",
                self.metadata.name, self.api_version, self.kind
            )));
        }
        if self.spec.ptype.is_empty() {
            return Err(ConvertError::Document(format!("{} has an empty ptype", self.metadata.name)));
        }
        let expected = self.spec.canonical_key();
        if self.metadata.name != expected {
            return Err(ConvertError::Document(format!(
                "{} does not match its rule content (expected {expected})",
                self.metadata.name
            )));
        }
        Ok(())
    }
}

/// Renders documents as a `---`-separated YAML stream.
///
/// # Errors
///
/// Returns [`ConvertError::Document`] when serialization fails.
pub fn render_documents(documents: &[RuleDocument]) -> Result<String, ConvertError> {
    let mut output = String::new();
    for document in documents {
        let yaml = serde_yaml::to_string(document).map_err(|err| ConvertError::Document(err.to_string()))?;
        output.push_str("---\n");
        output.push_str(&yaml);
    }
    Ok(output)
}

/// Parses a `---`-separated YAML stream of rule documents.
///
/// # Errors
///
/// Returns [`ConvertError::Document`] for malformed or invalid documents.
pub fn parse_documents(content: &str) -> Result<Vec<RuleDocument>, ConvertError> {
    let mut documents = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let parsed = RuleDocument::deserialize(document)
            .map_err(|err| ConvertError::Document(format!("document {}: {err}", index + 1)))?;
        parsed.validate()?;
        documents.push(parsed);
    }
    Ok(documents)
}

/// Writes rendered output to a file in append mode, or stdout for `-`.
///
/// # Errors
///
/// Returns [`ConvertError::Io`] when the output cannot be written.
pub fn write_output(target: &str, content: &str) -> Result<(), ConvertError> {
    if target == STDOUT_TARGET {
        let mut stdout = std::io::stdout().lock();
        return stdout
            .write_all(content.as_bytes())
            .and_then(|()| stdout.flush())
            .map_err(|err| ConvertError::Io(format!("write stdout: {err}")));
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(target)
        .map_err(|err| ConvertError::Io(format!("open output file {target}: {err}")))?;
    file.write_all(content.as_bytes()).map_err(|err| ConvertError::Io(format!("write {target}: {err}")))
}

/// Parses a `key=value` label argument.
///
/// # Errors
///
/// Returns a message when the separator is missing or either side is empty.
pub fn parse_label(argument: &str) -> Result<(String, String), String> {
    let Some((key, value)) = argument.split_once('=') else {
        return Err(format!("label {argument} must have the form key=value"));
    };
    if key.trim().is_empty() || value.trim().is_empty() {
        return Err(format!("label {argument} must have a non-empty key and value"));
    }
    Ok((key.to_string(), value.to_string()))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
