use crate::Library;
use crate::error::{ErrorKind, Result};
use regex::Regex;
use tome_records::{CleaningConfig, CleaningConfigPatch, NewCleaningConfig};

/// Picks the cleaning policy for a source URL.
///
/// Policies are tried in the order given (creation order, as returned by the
/// record store) and the first whose pattern is found anywhere in the URL
/// wins. Patterns that don't compile are skipped.
pub struct PolicyMatcher<'a> {
    compiled: Vec<(Regex, &'a CleaningConfig)>,
}

impl<'a> PolicyMatcher<'a> {
    pub fn new(policies: &'a [CleaningConfig]) -> Self {
        let compiled = policies
            .iter()
            .filter_map(|policy| match Regex::new(&policy.url_pattern) {
                Ok(regex) => Some((regex, policy)),
                Err(error) => {
                    tracing::warn!(policy = %policy.name, %error, "Skipping cleaning policy with invalid URL pattern");
                    None
                },
            })
            .collect();
        Self { compiled }
    }

    pub fn find(&self, url: &str) -> Option<&'a CleaningConfig> {
        self.compiled.iter().find(|(regex, _)| regex.is_match(url)).map(|(_, policy)| *policy)
    }
}

fn validate_pattern(pattern: &str) -> Result<()> {
    if let Err(error) = Regex::new(pattern) {
        tracing::debug!(%error, "Rejecting URL pattern");
        exn::bail!(ErrorKind::InvalidPattern(pattern.to_string()));
    }
    Ok(())
}

impl Library {
    /// Stores a new cleaning policy. It applies to books added or refreshed
    /// from now on.
    pub async fn create_policy(&self, policy: &NewCleaningConfig) -> Result<CleaningConfig> {
        validate_pattern(&policy.url_pattern)?;
        self.records.create_policy(policy).await.map_err(ErrorKind::records)
    }

    pub async fn update_policy(&self, id: i64, patch: &CleaningConfigPatch) -> Result<CleaningConfig> {
        if let Some(pattern) = &patch.url_pattern {
            validate_pattern(pattern)?;
        }
        self.records.update_policy(id, patch).await.map_err(ErrorKind::records)
    }
}
