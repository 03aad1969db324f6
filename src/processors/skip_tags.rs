//! Elements whose content is never sent for translation

use std::collections::BTreeSet;

/// Script, media, form, metadata, embedded-object and e-book marker elements
pub const DEFAULT_SKIP_TAGS: &[&str] = &[
    "script", "style", "code", "pre", "kbd", "var", "samp", "svg", "math", "canvas", "address",
    "applet", "img", "audio", "video", "track", "source", "input", "button", "select", "option",
    "textarea", "form", "meta", "link", "iframe", "embed", "object", "param", "time", "data",
    "meter", "progress", "xml", "xmlns", "epub:switch", "epub:case", "epub:default",
    "annotation", "note",
];

/// Case-insensitive set of skip-tag names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipTagRegistry {
    tags: BTreeSet<String>,
}

impl Default for SkipTagRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SKIP_TAGS.iter().copied())
    }
}

impl SkipTagRegistry {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tags: tags
                .into_iter()
                .map(|t| t.as_ref().trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.insert(tag.to_ascii_lowercase());
        self
    }

    pub fn without_tag(mut self, tag: &str) -> Self {
        self.tags.remove(&tag.to_ascii_lowercase());
        self
    }

    pub fn is_skipped(&self, tag: &str) -> bool {
        if self.tags.contains(tag) {
            return true;
        }
        self.tags.contains(&tag.to_ascii_lowercase())
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_set() {
        let registry = SkipTagRegistry::default();
        for tag in ["script", "code", "svg", "epub:switch", "form", "img"] {
            assert!(registry.is_skipped(tag), "{tag} should be skipped");
        }
        assert!(registry.is_skipped("CODE"));
        assert!(!registry.is_skipped("p"));
        assert!(!registry.is_skipped("span"));
    }

    #[test]
    fn test_customisation() {
        let registry = SkipTagRegistry::default().without_tag("pre").with_tag("Aside");
        assert!(!registry.is_skipped("pre"));
        assert!(registry.is_skipped("aside"));
        assert!(SkipTagRegistry::new(Vec::<String>::new()).is_empty());
    }
}
