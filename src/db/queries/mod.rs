pub mod archives;
pub mod chapters;
pub mod counters;
pub mod folders;
pub mod history;
pub mod series;

/// LIKE pattern matching every path strictly below `root`.
/// Escapes `%`, `_` and the escape character itself.
pub(crate) fn like_prefix(root: &str) -> String {
    let trimmed = root.trim_end_matches('/');
    let mut pattern = String::with_capacity(trimmed.len() + 2);
    for c in trimmed.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push_str("/%");
    pattern
}
