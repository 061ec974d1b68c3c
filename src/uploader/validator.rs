use crate::config::UploaderConfig;
use crate::errors::AppError;

use super::intake::RawFile;

/// Separator between rejection messages of one intake pass
pub const REJECTION_SEPARATOR: &str = "\n";

#[derive(Debug, Clone, PartialEq, Eq)]
enum AcceptPattern {
    /// `.csv`: case-insensitive filename suffix
    Extension(String),
    /// `text/*`: media type prefix, stored with the trailing slash
    MediaWildcard(String),
    MediaType(String),
}

/// Parsed accept-list. An empty list accepts every file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptList {
    raw: String,
    patterns: Vec<AcceptPattern>,
}

impl AcceptList {
    pub fn parse(raw: &str) -> Self {
        let patterns = raw
            .split(',')
            .map(|p| p.trim().to_ascii_lowercase())
            .filter(|p| !p.is_empty())
            .map(|p| {
                if p.starts_with('.') {
                    AcceptPattern::Extension(p)
                } else if let Some(prefix) = p.strip_suffix("/*") {
                    AcceptPattern::MediaWildcard(format!("{}/", prefix))
                } else {
                    AcceptPattern::MediaType(p)
                }
            })
            .collect();

        Self {
            raw: raw.trim().to_string(),
            patterns,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, file: &RawFile) -> bool {
        if self.patterns.is_empty() {
            return true;
        }

        let name = file.name().to_ascii_lowercase();
        let media_type = file.media_type().to_ascii_lowercase();

        self.patterns.iter().any(|pattern| match pattern {
            AcceptPattern::Extension(ext) => name.ends_with(ext.as_str()),
            AcceptPattern::MediaWildcard(prefix) => media_type.starts_with(prefix.as_str()),
            AcceptPattern::MediaType(exact) => media_type == *exact,
        })
    }
}

/// Constraints applied to every candidate of an intake pass
#[derive(Debug, Clone)]
pub struct ValidationRules {
    pub accept: AcceptList,
    pub max_size_mb: u64,
    pub max_files: usize,
}

impl ValidationRules {
    pub fn from_config(config: &UploaderConfig) -> Self {
        Self {
            accept: AcceptList::parse(&config.accept),
            max_size_mb: config.max_size_mb,
            max_files: config.max_files,
        }
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Default)]
pub struct ValidationOutcome {
    /// Candidates that passed, in their original order
    pub accepted: Vec<RawFile>,
    pub rejections: Vec<AppError>,
}

impl ValidationOutcome {
    /// All rejection messages joined into one notification, if any
    pub fn error_message(&self) -> Option<String> {
        join_rejections(&self.rejections)
    }
}

pub fn join_rejections(rejections: &[AppError]) -> Option<String> {
    if rejections.is_empty() {
        return None;
    }

    Some(
        rejections
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(REJECTION_SEPARATOR),
    )
}

/// Check one intake pass against the files already selected.
///
/// Rules run in a fixed order per candidate: capacity, duplicate, type, size.
/// Hitting capacity stops the pass; every other rejection moves on to the
/// next candidate. Files accepted earlier in the pass count towards both
/// capacity and duplicate detection.
pub fn validate_selection(
    candidates: Vec<RawFile>,
    existing: &[&RawFile],
    rules: &ValidationRules,
) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::default();

    for candidate in candidates {
        if existing.len() + outcome.accepted.len() >= rules.max_files {
            log::debug!(
                "Selection is at capacity ({}), ignoring remaining candidates",
                rules.max_files
            );
            outcome.rejections.push(AppError::TooManyFiles {
                max_files: rules.max_files,
            });
            break;
        }

        let is_duplicate = existing
            .iter()
            .copied()
            .chain(outcome.accepted.iter())
            .any(|f| f.name() == candidate.name() && f.size() == candidate.size());
        if is_duplicate {
            outcome
                .rejections
                .push(AppError::duplicate_file(candidate.name()));
            continue;
        }

        if !rules.accept.matches(&candidate) {
            outcome.rejections.push(AppError::invalid_file_type(
                candidate.name(),
                rules.accept.as_str(),
            ));
            continue;
        }

        if candidate.size() > rules.max_size_bytes() {
            outcome
                .rejections
                .push(AppError::file_too_large(candidate.name(), rules.max_size_mb));
            continue;
        }

        outcome.accepted.push(candidate);
    }

    outcome
}
