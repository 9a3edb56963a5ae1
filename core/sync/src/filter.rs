//! Path exclusion.

/// Substring-based exclusion rule taken from the source backend config.
///
/// A path is excluded when at least one pattern occurs in it verbatim.
/// Patterns are plain substrings, not globs: `logs/` excludes
/// `logs/app.log` and `var/logs/x` but not `data/logs-note.txt`.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    patterns: Vec<String>,
}

impl ExclusionFilter {
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            patterns: patterns
                .into_iter()
                .map(Into::<String>::into)
                .filter(|pattern| !pattern.is_empty())
                .collect(),
        }
    }

    /// First pattern that excludes `path`, if any.
    pub fn matching_pattern(&self, path: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|pattern| path.contains(pattern.as_str()))
            .map(String::as_str)
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.matching_pattern(path).is_some()
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}
