use std::fmt;

/// Lowercased words of a label or search string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TokenList(Vec<String>);

impl TokenList {
    /// Splits on anything that is not a letter or digit.
    pub fn parse(text: &str) -> Self {
        let mut tokens = TokenList::default();
        tokens.push_text(text);
        tokens
    }

    pub fn from_labels<'a>(labels: impl IntoIterator<Item = &'a str>) -> Self {
        let mut tokens = TokenList::default();
        for label in labels {
            tokens.push_text(label);
        }
        tokens
    }

    pub fn push_text(&mut self, text: &str) {
        self.0.extend(
            text.split(|c: char| !c.is_alphanumeric())
                .filter(|word| !word.is_empty())
                .map(|word| word.to_lowercase()),
        );
    }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn iter(&self) -> impl Iterator<Item = &str> { self.0.iter().map(String::as_str) }

    pub fn as_slice(&self) -> &[String] { &self.0 }
}

impl fmt::Display for TokenList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0.join(" ")) }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn splits_and_lowercases() {
        let tokens = TokenList::parse("  Save  As... (Ctrl+S) ");
        assert_eq!(tokens.as_slice(), ["save", "as", "ctrl", "s"]);
    }

    #[test]
    fn whitespace_only_is_empty() {
        assert!(TokenList::parse(" \t ").is_empty());
    }

    #[test]
    fn labels_concatenate() {
        let tokens = TokenList::from_labels(["File", "Open Recent"]);
        assert_eq!(tokens.to_string(), "file open recent");
    }
}
