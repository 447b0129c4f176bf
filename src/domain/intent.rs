//! Keyword-based intent classification for free text outside any flow.
//!
//! An ordered rule list: the first rule whose keyword set matches wins,
//! and the ordering is fixed and significant — "broken" phrasing is
//! checked before generic "pay" phrasing so "my screen broke, how do I
//! pay" files under the broken-device intent consistently.

/// Coarse intent of a free-text message when no session is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Asking about home delivery.
    Delivery,
    /// Asking where the shop is / how to navigate there.
    Location,
    /// Reporting a broken device.
    BrokenDevice,
    /// Asking for prices.
    Pricelist,
    /// Asking for reviews.
    Reviews,
    /// Asking for a human agent.
    HumanAgent,
    /// Wants to pay / get a payment link.
    Payment,
    /// Nothing matched.
    Unknown,
}

/// The fixed rule table: `(keywords, intent)` pairs evaluated in order.
const RULES: &[(&[&str], Intent)] = &[
    (
        &["שליחות", "שליח", "משלוח", "עד הבית", "הגעה", "מגיעים אלי"],
        Intent::Delivery,
    ),
    (
        &["איפה", "כתובת", "מיקום", "ניווט", "וויז", "waze", "איך מגיעים"],
        Intent::Location,
    ),
    (
        &["נשבר", "נישבר", "שבור", "נשברה", "מסך נשבר", "נפל ונשבר"],
        Intent::BrokenDevice,
    ),
    (
        &["מחירון", "מחירים", "כמה עולה", "עלות"],
        Intent::Pricelist,
    ),
    (&["ביקורות", "חוות דעת", "המלצות"], Intent::Reviews),
    (
        &["נציג", "אדם", "טלפון", "דבר איתי", "לחזור אלי"],
        Intent::HumanAgent,
    ),
    (
        &["תשלום", "לשלם", "לינק", "paypal", "פייפאל", "מקדמה"],
        Intent::Payment,
    ),
];

/// Classifies free text into exactly one [`Intent`].
///
/// Matching is lowercase keyword containment; the first matching rule in
/// the fixed table wins. Returns [`Intent::Unknown`] when nothing matches.
#[must_use]
pub fn classify(text: &str) -> Intent {
    let normalized = text.trim().to_lowercase();
    if normalized.is_empty() {
        return Intent::Unknown;
    }
    for (keywords, intent) in RULES {
        if keywords.iter().any(|kw| normalized.contains(kw)) {
            return *intent;
        }
    }
    Intent::Unknown
}
