//! Turning user input into canonical bilibili video URLs
//!
//! Resolution is purely syntactic; nothing here touches the network. Rules are
//! tried in order and the first match wins:
//!
//! 1. a bilibili video-page URL is returned unchanged (after trimming)
//! 2. the whole input is a `BV` token (prefix case-insensitive, 10 alphanumerics)
//! 3. the whole input is an `av` token with 5 to 10 digits
//! 4. the first `BV` token found anywhere in free text
//! 5. the first `av` token found anywhere in free text
//!
//! Anything else is [`ResolutionError::Unrecognized`].

use regex::Regex;
use std::sync::LazyLock;

use crate::error::ResolutionError;

/// Prefix every canonical URL starts with
pub const CANONICAL_VIDEO_BASE: &str = "https://www.bilibili.com/video/";

const AV_MIN_DIGITS: usize = 5;
const AV_MAX_DIGITS: usize = 10;

#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("literal pattern compiles")
}

static VIDEO_PAGE_URL: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)^https?://(www\.)?bilibili\.com/video/"));
static BV_EXACT: LazyLock<Regex> = LazyLock::new(|| compile(r"^[Bb][Vv][0-9A-Za-z]{10}$"));
static AV_EXACT: LazyLock<Regex> = LazyLock::new(|| compile(r"^[Aa][Vv](\d{5,10})$"));
static BV_SEARCH: LazyLock<Regex> = LazyLock::new(|| compile(r"[Bb][Vv][0-9A-Za-z]{10}"));
static AV_SEARCH: LazyLock<Regex> = LazyLock::new(|| compile(r"[Aa][Vv](\d+)"));

/// Resolve raw user input to a canonical video URL
///
/// # Examples
///
/// ```
/// use bilibili_dl::resolver::resolve;
///
/// assert_eq!(
///     resolve("BV1xx411c7mD").unwrap(),
///     "https://www.bilibili.com/video/BV1xx411c7mD"
/// );
/// assert!(resolve("not a real video").is_err());
/// ```
pub fn resolve(input: &str) -> Result<String, ResolutionError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ResolutionError::Empty);
    }

    if VIDEO_PAGE_URL.is_match(input) {
        return Ok(input.to_string());
    }

    if BV_EXACT.is_match(input) {
        return Ok(canonical_url(input));
    }

    if let Some(caps) = AV_EXACT.captures(input) {
        return Ok(av_url(&caps[1]));
    }

    if let Some(m) = BV_SEARCH.find(input) {
        return Ok(canonical_url(m.as_str()));
    }

    // Only the leftmost av token is considered; a run of digits that is too
    // short or too long does not fall through to a later one.
    if let Some(caps) = AV_SEARCH.captures(input) {
        let digits = &caps[1];
        if (AV_MIN_DIGITS..=AV_MAX_DIGITS).contains(&digits.len()) {
            return Ok(av_url(digits));
        }
    }

    Err(ResolutionError::Unrecognized {
        input: input.to_string(),
    })
}

fn canonical_url(id: &str) -> String {
    format!("{CANONICAL_VIDEO_BASE}{id}")
}

fn av_url(digits: &str) -> String {
    format!("{CANONICAL_VIDEO_BASE}av{digits}")
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_bv_token_becomes_canonical_url() {
        assert_eq!(
            resolve("BV1xx411c7mD").unwrap(),
            "https://www.bilibili.com/video/BV1xx411c7mD"
        );
    }

    #[test]
    fn video_page_url_is_returned_trimmed() {
        assert_eq!(
            resolve("  http://bilibili.com/video/av12345 ").unwrap(),
            "http://bilibili.com/video/av12345"
        );
        assert_eq!(
            resolve("HTTPS://WWW.BILIBILI.COM/video/BV1xx411c7mD?p=2").unwrap(),
            "HTTPS://WWW.BILIBILI.COM/video/BV1xx411c7mD?p=2"
        );
    }

    #[test]
    fn bv_token_is_found_in_free_text() {
        assert_eq!(
            resolve("check out BV1AbC234dE5 now").unwrap(),
            "https://www.bilibili.com/video/BV1AbC234dE5"
        );
    }

    #[test]
    fn av_token_resolves_to_av_url() {
        assert_eq!(
            resolve("av99999").unwrap(),
            "https://www.bilibili.com/video/av99999"
        );
        assert_eq!(
            resolve("AV170001").unwrap(),
            "https://www.bilibili.com/video/av170001"
        );
    }

    #[test]
    fn bv_prefix_casing_is_preserved() {
        assert_eq!(
            resolve("bv1xx411c7mD").unwrap(),
            "https://www.bilibili.com/video/bv1xx411c7mD"
        );
    }

    #[test]
    fn first_bv_token_wins_over_later_ones() {
        assert_eq!(
            resolve("BV1111111111 and BV2222222222").unwrap(),
            "https://www.bilibili.com/video/BV1111111111"
        );
    }

    #[test]
    fn bv_token_takes_priority_over_av_in_free_text() {
        assert_eq!(
            resolve("av12345 or maybe BV1xx411c7mD").unwrap(),
            "https://www.bilibili.com/video/BV1xx411c7mD"
        );
    }

    #[test]
    fn av_token_in_free_text() {
        assert_eq!(
            resolve("old link: av1234567 (mirror)").unwrap(),
            "https://www.bilibili.com/video/av1234567"
        );
    }

    #[test]
    fn short_av_number_is_rejected() {
        assert_eq!(
            resolve("av1234"),
            Err(ResolutionError::Unrecognized {
                input: "av1234".to_string()
            })
        );
    }

    #[test]
    fn overlong_av_number_is_rejected() {
        assert!(matches!(
            resolve("av12345678901"),
            Err(ResolutionError::Unrecognized { .. })
        ));
    }

    #[test]
    fn free_text_without_id_is_unrecognized() {
        assert_eq!(
            resolve("not a real video"),
            Err(ResolutionError::Unrecognized {
                input: "not a real video".to_string()
            })
        );
        assert!(resolve("https://example.com/video/123").is_err());
    }

    #[test]
    fn blank_input_is_empty() {
        assert_eq!(resolve(""), Err(ResolutionError::Empty));
        assert_eq!(resolve("   \t\n"), Err(ResolutionError::Empty));
    }
}
