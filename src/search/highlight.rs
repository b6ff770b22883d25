use super::TokenList;

/// Character ranges of `text` that contain a query token, case-insensitive,
/// merged and sorted. Ranges are `(start, end)` with `end` exclusive.
pub fn highlights(text: &str, query: &TokenList) -> Vec<(i32, i32)> {
    let haystack: Vec<char> = text.chars().map(lower).collect();
    let mut spans = Vec::new();

    for token in query.iter() {
        let needle: Vec<char> = token.chars().map(lower).collect();
        if needle.is_empty() || needle.len() > haystack.len() {
            continue;
        }
        for start in 0..=haystack.len() - needle.len() {
            if haystack[start..start + needle.len()] == needle[..] {
                spans.push((start as i32, (start + needle.len()) as i32));
            }
        }
    }

    spans.sort_unstable();
    let mut merged: Vec<(i32, i32)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

fn lower(c: char) -> char { c.to_lowercase().next().unwrap_or(c) }

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn finds_case_insensitive_matches() {
        assert_eq!(highlights("Save As", &TokenList::parse("sa")), vec![(0, 2)]);
        assert_eq!(highlights("Banana", &TokenList::parse("an")), vec![(1, 5)]);
    }

    #[test]
    fn overlapping_tokens_merge() {
        assert_eq!(highlights("Preferences", &TokenList::parse("pref ref")), vec![(0, 4)]);
    }

    #[test]
    fn no_query_no_spans() {
        assert!(highlights("Quit", &TokenList::default()).is_empty());
    }
}
