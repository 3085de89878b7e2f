//! Interpretation of raw BlockClock display text.
//!
//! The device reports what it shows as a handful of rendered segments
//! (e.g. `["$", "6", "7", "4", "3", "2", "USD"]`). Joined together they are
//! hard to read in a log, so [`classify`] works out what kind of screen is
//! up and produces a label such as `Bitcoin Price: $67,432`.

use serde::Serialize;

/// What kind of screen the device is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayCategory {
    /// Current block height (digits only)
    BlockHeight,
    /// BTC price in dollars
    Price,
    /// Moscow time (sats per dollar)
    Time,
    /// Short upper-case text, most likely one we injected
    CustomText,
    /// Anything else
    Unknown,
}

impl DisplayCategory {
    /// Human-readable name for status pages.
    pub fn display_name(&self) -> &'static str {
        match self {
            DisplayCategory::BlockHeight => "Block Height Display",
            DisplayCategory::Price => "Price Display",
            DisplayCategory::Time => "Moscow Time Display",
            DisplayCategory::CustomText => "Custom Text",
            DisplayCategory::Unknown => "BlockClock Display",
        }
    }
}

/// Result of [`classify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// Raw text with ticker decorations removed
    pub cleaned: String,
    /// Screen type
    pub category: DisplayCategory,
    /// Readable label for logs and the status page
    pub label: String,
}

/// Strip ticker decorations (`/BTC`, `/`, `USD`) from display text.
pub fn clean_display_text(raw: &str) -> String {
    raw.replace("/BTC", "").replace('/', "").replace("USD", "")
}

/// Classify raw display text. Never fails.
///
/// # Example
///
/// ```
/// use blockclock_rotate::{classify, DisplayCategory};
///
/// let c = classify("$67432USD");
/// assert_eq!(c.category, DisplayCategory::Price);
/// assert_eq!(c.label, "Bitcoin Price: $67,432");
///
/// assert_eq!(classify(" 840000").label, "Block Height: 840000");
/// ```
pub fn classify(raw: &str) -> Classification {
    let cleaned = clean_display_text(raw);
    let trimmed = raw.trim();

    let (category, label) = if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit())
    {
        (
            DisplayCategory::BlockHeight,
            format!("Block Height: {}", cleaned.trim()),
        )
    } else if raw.contains('$') {
        let digits: String = cleaned.chars().filter(|c| c.is_ascii_digit()).collect();
        (
            DisplayCategory::Price,
            format!("Bitcoin Price: ${}", group_thousands(&digits)),
        )
    } else if raw.contains("TIME") {
        let label = match time_token(&cleaned) {
            Some(token) => format!("Moscow Time: {}", token),
            None => format!("Moscow Time: {}", cleaned),
        };
        (DisplayCategory::Time, label)
    } else if is_custom_text(trimmed) {
        (DisplayCategory::CustomText, cleaned.clone())
    } else {
        (DisplayCategory::Unknown, cleaned.clone())
    };

    Classification {
        cleaned,
        category,
        label,
    }
}

/// Group a digit string from the right into comma-separated triples.
///
/// ```
/// use blockclock_rotate::classify::group_thousands;
///
/// assert_eq!(group_thousands("123"), "123");
/// assert_eq!(group_thousands("1234567"), "1,234,567");
/// ```
pub fn group_thousands(digits: &str) -> String {
    let len = digits.chars().count();
    let mut out = String::with_capacity(len + len / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Numeric token following `TIME`, separated by at least one space.
fn time_token(text: &str) -> Option<&str> {
    let (_, rest) = text.split_once("TIME")?;
    let rest_trimmed = rest.trim_start();
    if rest_trimmed.len() == rest.len() {
        return None;
    }
    let end = rest_trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest_trimmed.len());
    (end > 0).then(|| &rest_trimmed[..end])
}

fn is_custom_text(text: &str) -> bool {
    !text.is_empty()
        && text.chars().count() <= crate::MAX_TEXT_LEN
        && text.chars().any(|c| c.is_alphabetic())
        && !text.chars().any(|c| c.is_lowercase())
}
