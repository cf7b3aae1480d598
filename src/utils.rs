//! Utility functions for batch input files

use crate::error::{Error, Result};
use std::path::Path;

/// Marker that starts a comment line in a batch file
pub const COMMENT_PREFIX: char = '#';

/// Extract batch entries from text, one per line
///
/// Lines are trimmed; blank lines and lines starting with `#` are skipped.
/// Order is preserved and duplicates are kept.
///
/// # Examples
///
/// ```
/// use bilibili_dl::utils::parse_batch_lines;
///
/// let text = "# favourites\nBV1xx411c7mD\n\n  av170001  \n";
/// assert_eq!(parse_batch_lines(text), vec!["BV1xx411c7mD", "av170001"]);
/// ```
pub fn parse_batch_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(COMMENT_PREFIX))
        .map(str::to_string)
        .collect()
}

/// Read a batch file and return its entries
///
/// Invalid UTF-8 is replaced rather than rejected; a byte-order mark is ignored.
pub async fn read_batch_file(path: &Path) -> Result<Vec<String>> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to read batch file '{}': {}", path.display(), e),
        ))
    })?;
    let text = String::from_utf8_lossy(&bytes);
    let text = text.strip_prefix('\u{FEFF}').unwrap_or(&text);
    let entries = parse_batch_lines(text);
    tracing::debug!(path = %path.display(), entries = entries.len(), "Read batch file");
    Ok(entries)
}
