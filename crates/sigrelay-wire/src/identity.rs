use std::fmt;

/// Number of leading characters kept by [`pretty_id`].
const SHORT_LEN: usize = 8;

/// Shortened form of an opaque id for log lines.
///
/// Ids are UUID strings in practice, but any string works; the cut is made on
/// a char boundary.
pub fn pretty_id(id: &str) -> String {
    ShortId(id).to_string()
}

/// Display adapter printing the shortened id without allocating.
#[derive(Debug, Clone, Copy)]
pub struct ShortId<'a>(pub &'a str);

impl fmt::Display for ShortId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self
            .0
            .char_indices()
            .nth(SHORT_LEN)
            .map(|(idx, _)| idx)
            .unwrap_or(self.0.len());
        f.write_str(&self.0[..end])
    }
}
