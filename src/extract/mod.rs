//! Code extraction: message body → ordered list of artifacts.
//!
//! Two recognition rules run independently over the fenced code regions of a
//! body and their results are concatenated in rule order:
//!
//! 1. Every fenced region is a candidate. A first line such as
//!    `// filepath: src/app.ts` or `# file: app/main.py` supplies the target
//!    path and is stripped from the content.
//! 2. A heading line directly above a fence whose text ends in a recognized
//!    extension (`## src/app.ts`) supplies the target path.
//!
//! When nothing resolves a path, a `LABEL: path/to/file.ext` subject names
//! the single file the body carries.

use regex::Regex;

use crate::config::ExtractConfig;
use crate::models::artifact::Artifact;
use crate::models::message::Message;
use crate::{AppError, Result};

const HINT_PATTERN: &str = r"(?i)^\s*(?://|#|--)\s*(?:filepath|file)\s*:\s*(\S.*?)\s*$";
const HEADING_PATTERN: &str = r"^\s{0,3}#{1,6}\s+(.+?)\s*#*\s*$";
const EXTENSION_PATTERN: &str =
    r"(?i)\.(?:tsx?|jsx?|mjs|cjs|css|scss|html|json|ya?ml|toml|py|rs|go|sh|sql|md|txt)$";
const LABEL_PATTERN: &str = r"^\s*[^:]+:\s*(.+?)\s*$";

/// One fenced region found in a body.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FencedBlock<'a> {
    /// Text of a heading line immediately above the opening fence.
    heading: Option<&'a str>,
    /// Lines strictly between the fences.
    lines: Vec<&'a str>,
}

/// Compiled extraction rules plus the limits applied to each message.
#[derive(Debug, Clone)]
pub struct Extractor {
    limits: ExtractConfig,
    hint: Regex,
    heading: Regex,
    extension: Regex,
    label: Regex,
}

impl Extractor {
    /// Compile the recognition rules.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a pattern fails to compile.
    pub fn new(limits: ExtractConfig) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|err| AppError::Config(format!("invalid extraction pattern: {err}")))
        };
        Ok(Self {
            limits,
            hint: compile(HINT_PATTERN)?,
            heading: compile(HEADING_PATTERN)?,
            extension: compile(EXTENSION_PATTERN)?,
            label: compile(LABEL_PATTERN)?,
        })
    }

    /// Extract artifacts from `message`, enforcing size limits.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the body exceeds `max_body_bytes` or
    /// yields more than `max_artifacts` artifacts.
    pub fn extract(&self, message: &Message) -> Result<Vec<Artifact>> {
        if message.body.len() > self.limits.max_body_bytes {
            return Err(AppError::Protocol(format!(
                "message body is {} bytes, limit is {}",
                message.body.len(),
                self.limits.max_body_bytes
            )));
        }

        let artifacts = self.extract_body(&message.body, message.subject.as_deref(), &message.id);
        if artifacts.len() > self.limits.max_artifacts {
            return Err(AppError::Protocol(format!(
                "message yields {} artifacts, limit is {}",
                artifacts.len(),
                self.limits.max_artifacts
            )));
        }
        Ok(artifacts)
    }

    /// Apply both rules and the subject fallback to a raw body.
    #[must_use]
    pub fn extract_body(&self, body: &str, subject: Option<&str>, message_id: &str) -> Vec<Artifact> {
        let normalized = body.replace("\r\n", "\n");
        let blocks = fenced_blocks(&normalized);

        let mut artifacts: Vec<Artifact> = blocks
            .iter()
            .map(|block| {
                let (path, content) = self.split_hint(&block.lines);
                Artifact::new(path, content, message_id)
            })
            .collect();

        artifacts.extend(blocks.iter().filter_map(|block| {
            let path = self.heading_path(block.heading?)?;
            let (_, content) = self.split_hint(&block.lines);
            Some(Artifact::new(Some(path), content, message_id))
        }));

        if artifacts.iter().any(|a| a.target_path.is_some()) {
            return artifacts;
        }

        match subject.and_then(|s| self.label_path(s)) {
            Some(path) => {
                let content = match blocks.as_slice() {
                    [only] => join_content(&only.lines),
                    _ => normalized,
                };
                vec![Artifact::new(Some(path), content, message_id)]
            }
            None => artifacts,
        }
    }

    /// Separate a path hint on the first line from the block content.
    fn split_hint(&self, lines: &[&str]) -> (Option<String>, String) {
        let Some(first) = lines.iter().position(|l| !l.trim().is_empty()) else {
            return (None, String::new());
        };
        match self.hint.captures(lines[first]) {
            Some(caps) => {
                let path = caps.get(1).map(|m| clean_path(m.as_str()));
                (path, join_content(&lines[first + 1..]))
            }
            None => (None, join_content(lines)),
        }
    }

    fn heading_path(&self, heading: &str) -> Option<String> {
        let caps = self.heading.captures(heading)?;
        let text = clean_path(caps.get(1)?.as_str());
        if text.is_empty() || text.contains(char::is_whitespace) {
            return None;
        }
        self.extension.is_match(&text).then_some(text)
    }

    fn label_path(&self, subject: &str) -> Option<String> {
        let caps = self.label.captures(subject)?;
        let hint: String = caps
            .get(1)?
            .as_str()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let file_name = hint.rsplit('/').next()?;
        (file_name.contains('.') && !file_name.ends_with('.')).then_some(hint)
    }
}

/// Strip markdown decoration around a path.
fn clean_path(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| matches!(c, '`' | '*' | '"' | '\''))
        .trim()
        .to_owned()
}

/// Join content lines, dropping leading blank lines and trailing whitespace.
fn join_content(lines: &[&str]) -> String {
    let start = lines
        .iter()
        .position(|l| !l.trim().is_empty())
        .unwrap_or(lines.len());
    lines[start..].join("\n").trim_end().to_owned()
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

fn is_closing_fence(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= 3 && trimmed.chars().all(|c| c == '`')
}

/// Locate fenced regions line by line. An unterminated fence ends the scan.
fn fenced_blocks(body: &str) -> Vec<FencedBlock<'_>> {
    let lines: Vec<&str> = body.lines().collect();
    let mut blocks = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if !is_fence(lines[i]) {
            i += 1;
            continue;
        }

        let Some(offset) = lines[i + 1..].iter().position(|l| is_closing_fence(l)) else {
            break;
        };
        let close = i + 1 + offset;

        let heading = i
            .checked_sub(1)
            .map(|prev| lines[prev])
            .filter(|l| l.trim_start().starts_with('#'));

        blocks.push(FencedBlock {
            heading,
            lines: lines[i + 1..close].to_vec(),
        });
        i = close + 1;
    }

    blocks
}
