use std::borrow::Cow;
use std::collections::BTreeMap;

/// Alias definitions owned by a session.
///
/// Expansion is plain text substitution on the first token of a line; the
/// replacement is not expanded again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasTable {
    aliases: BTreeMap<String, String>,
}

impl AliasTable {
    /// Replace the first whitespace-delimited token of `line` if it names an
    /// alias. The rest of the line follows the replacement after one space.
    pub fn expand<'a>(&self, line: &'a str) -> Cow<'a, str> {
        let line = line.trim_start();
        let (first, rest) = match line.split_once(char::is_whitespace) {
            Some((first, rest)) => (first, rest.trim_start()),
            None => (line, ""),
        };
        match self.aliases.get(first) {
            Some(replacement) if rest.is_empty() => Cow::Owned(replacement.clone()),
            Some(replacement) => Cow::Owned(format!("{replacement} {rest}")),
            None => Cow::Borrowed(line),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AliasTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            aliases: iter
                .into_iter()
                .map(|(name, replacement)| (name.into(), replacement.into()))
                .collect(),
        }
    }
}
