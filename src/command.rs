//! Command Parser — free-form message text to a structured payment intent.
//!
//! Pure and infallible: unparseable text is simply not a command. Supported
//! surface forms, tried in priority order with the first match winning:
//!
//! 1. `send @user $N`
//! 2. `send $N to @user`
//! 3. `pay @user $N`
//!
//! All forms are case-insensitive and the currency symbol on the amount is
//! optional.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::models::normalize_handle;
use crate::units;

/// A parsed payment command: who gets paid, and how much (minor units).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub recipient: String,
    pub amount_minor: i64,
}

// Priority-ordered command forms. `(?i)` keeps matching case-insensitive;
// the amount group accepts an optional `$` and a plain decimal number.
static COMMAND_FORMS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // send @user $N
        Regex::new(r"(?i)\bsend\s+@(\w+)\s+\$?(\d+(?:\.\d+)?)").unwrap(),
        // send $N to @user
        Regex::new(r"(?i)\bsend\s+\$?(\d+(?:\.\d+)?)\s+to\s+@(\w+)").unwrap(),
        // pay @user $N
        Regex::new(r"(?i)\bpay\s+@(\w+)\s+\$?(\d+(?:\.\d+)?)").unwrap(),
    ]
});

/// Indices of the (recipient, amount) capture groups per form above.
const GROUP_ORDER: [(usize, usize); 3] = [(1, 2), (2, 1), (1, 2)];

/// Extract a payment intent from raw message text, or `None` if the text is
/// not a recognizable, valid command.
pub fn parse_command(text: &str) -> Option<PaymentIntent> {
    for (form, (recip_group, amount_group)) in COMMAND_FORMS.iter().zip(GROUP_ORDER) {
        let Some(caps) = form.captures(text) else {
            continue;
        };
        let recipient = normalize_handle(caps.get(recip_group)?.as_str());
        if recipient.is_empty() {
            continue;
        }
        let Ok(amount) = Decimal::from_str(caps.get(amount_group)?.as_str()) else {
            continue;
        };
        let Some(amount_minor) = units::to_minor_units(amount) else {
            continue;
        };
        return Some(PaymentIntent {
            recipient,
            amount_minor,
        });
    }
    None
}

/// Whether the text is a manual repost: a case-insensitive `rt ` token at
/// the start of the text or preceded by whitespace.
pub fn is_manual_repost(text: &str) -> bool {
    static RT_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(^|\s)rt\s").unwrap());
    RT_MARKER.is_match(text)
}

/// Remove `@handle` mentions of the bot itself from command text, so the
/// bot can never be parsed as a recipient (`send @paydrop $5 to @alice`
/// must pay alice). Case-insensitive; trailing punctuation on the mention
/// is tolerated.
pub fn strip_mention(text: &str, handle: &str) -> String {
    let handle = normalize_handle(handle);
    if handle.is_empty() {
        return text.to_string();
    }
    text.split_whitespace()
        .filter(|token| {
            let bare = token
                .trim_end_matches([',', '.', '!', '?', ':', ';'])
                .trim_start_matches('@');
            !(token.starts_with('@') && bare.eq_ignore_ascii_case(&handle))
        })
        .collect::<Vec<_>>()
        .join(" ")
}
