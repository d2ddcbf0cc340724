use crate::util::normalize_separators;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Which checks run and what gets redacted from the output
#[derive(Clone, Debug, Default)]
pub struct RunnerFilter {
    /// only run these check ids, all checks when empty
    pub checks: HashSet<String>,
    /// never run these check ids
    pub skip_checks: HashSet<String>,
    /// entity type (or `*`) → attribute names whose values are masked in code blocks
    pub resource_attr_to_omit: HashMap<String, HashSet<String>>,
    /// files and module directories whose path matches are not loaded
    pub excluded_paths: Vec<Regex>,
}

impl RunnerFilter {
    pub fn should_run_check(&self, check_id: &str) -> bool {
        if self.skip_checks.contains(check_id) {
            return false;
        }
        self.checks.is_empty() || self.checks.contains(check_id)
    }

    /// Attributes to omit for an entity type, including the ones configured for `*`
    pub fn attributes_to_omit(&self, entity_type: &str) -> Vec<&str> {
        let mut attributes: Vec<&str> = [entity_type, "*"]
            .iter()
            .filter_map(|key| self.resource_attr_to_omit.get(*key))
            .flatten()
            .map(String::as_str)
            .collect();
        attributes.sort_unstable();
        attributes.dedup();
        attributes
    }

    /// Parse `TYPE:ATTRIBUTE` pairs
    pub fn with_omitted_attributes<'a>(mut self, pairs: impl IntoIterator<Item = &'a str>) -> Self {
        for pair in pairs {
            match pair.split_once(':') {
                Some((entity_type, attribute)) => {
                    self.resource_attr_to_omit
                        .entry(entity_type.to_string())
                        .or_default()
                        .insert(attribute.to_string());
                }
                None => tracing::warn!(%pair, "expected TYPE:ATTRIBUTE, ignoring"),
            }
        }
        self
    }

    /// Compile path exclusion patterns, matched anywhere in a path
    pub fn with_excluded_paths<'a>(
        mut self,
        patterns: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, regex::Error> {
        for pattern in patterns {
            self.excluded_paths.push(Regex::new(pattern)?);
        }
        Ok(self)
    }
}

/// `true` if any pattern matches `path`, with `/` as separator
pub fn is_excluded(patterns: &[Regex], path: &Path) -> bool {
    if patterns.is_empty() {
        return false;
    }
    let path = normalize_separators(&path.display().to_string());
    patterns.iter().any(|pattern| pattern.is_match(&path))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn skip_list_wins_over_allow_list() {
        let filter = RunnerFilter {
            checks: HashSet::from(["CKV_1".to_string(), "CKV_2".to_string()]),
            skip_checks: HashSet::from(["CKV_2".to_string()]),
            ..Default::default()
        };
        assert!(filter.should_run_check("CKV_1"));
        assert!(!filter.should_run_check("CKV_2"));
        assert!(!filter.should_run_check("CKV_3"));
    }

    #[test]
    fn empty_filter_runs_everything() {
        assert!(RunnerFilter::default().should_run_check("CKV_ANY"));
    }

    #[test]
    fn omitted_attributes_include_wildcard() {
        let filter = RunnerFilter::default()
            .with_omitted_attributes(["aws_db_instance:password", "*:token", "broken"]);
        assert_eq!(filter.attributes_to_omit("aws_db_instance"), vec!["password", "token"]);
        assert_eq!(filter.attributes_to_omit("aws_s3_bucket"), vec!["token"]);
    }

    #[test]
    fn excluded_paths_match_anywhere() {
        let filter = RunnerFilter::default()
            .with_excluded_paths(["modules/legacy", r"\.generated\.tf$"])
            .unwrap();
        assert!(is_excluded(&filter.excluded_paths, Path::new("/repo/modules/legacy")));
        assert!(is_excluded(&filter.excluded_paths, Path::new("/repo/modules/legacy/main.tf")));
        assert!(is_excluded(&filter.excluded_paths, Path::new("/repo/vpc.generated.tf")));
        assert!(!is_excluded(&filter.excluded_paths, Path::new("/repo/modules/network/main.tf")));
        assert!(!is_excluded(&[], Path::new("/repo/main.tf")));
    }

    #[test]
    fn invalid_exclusion_pattern_is_an_error() {
        assert!(RunnerFilter::default().with_excluded_paths(["modules/("]).is_err());
    }
}
