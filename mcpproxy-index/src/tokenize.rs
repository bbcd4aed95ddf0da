//! Tokenization shared by indexing and queries

/// Split text into lowercase alphanumeric tokens
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_string())
        .collect()
}

/// Tokenize a query. Besides the plain tokens, a qualified `server:tool`
/// query also contributes its whole form so exact identifiers match the
/// identifier token emitted at index time.
pub fn tokenize_query(query: &str) -> Vec<String> {
    let mut tokens = tokenize(query);
    let trimmed = query.trim().to_lowercase();
    if trimmed.contains(':') && !trimmed.is_empty() {
        tokens.push(trimmed);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_splits_and_lowercases() {
        assert_eq!(
            tokenize("Create-Issue v2 (GitHub)"),
            vec!["create", "issue", "v2", "github"]
        );
    }

    #[test]
    fn test_tokenize_drops_empties() {
        assert!(tokenize("---").is_empty());
    }

    #[test]
    fn test_query_keeps_qualified_form() {
        let tokens = tokenize_query("github:create_issue");
        assert!(tokens.contains(&"github".to_string()));
        assert!(tokens.contains(&"create".to_string()));
        assert!(tokens.contains(&"github:create_issue".to_string()));
    }
}
