//! Shortcode to media id conversion
//!
//! A shortcode is the base-64 positional rendering of the numeric media id
//! over [`ALPHABET`], most significant digit first.

use crate::feed::FeedError;

/// Digit alphabet, in digit-value order
pub const ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

fn digit_value(c: char) -> Option<u128> {
    ALPHABET
        .iter()
        .position(|&b| b as char == c)
        .map(|index| index as u128)
}

/// Decodes a shortcode into the server's numeric media id
///
/// Accumulates `value = value * 64 + index(char)` left to right.
pub fn shortcode_to_media_id(code: &str) -> Result<u128, FeedError> {
    if code.is_empty() {
        return Err(FeedError::InvalidShortcode(code.to_string()));
    }

    code.chars().try_fold(0u128, |value, c| {
        let digit = digit_value(c).ok_or_else(|| FeedError::InvalidShortcode(code.to_string()))?;
        value
            .checked_mul(64)
            .and_then(|v| v.checked_add(digit))
            .ok_or_else(|| FeedError::InvalidShortcode(code.to_string()))
    })
}

/// Encodes a media id as a shortcode
pub fn media_id_to_shortcode(mut id: u128) -> String {
    if id == 0 {
        return (ALPHABET[0] as char).to_string();
    }

    let mut digits = Vec::new();
    while id > 0 {
        digits.push(ALPHABET[(id % 64) as usize] as char);
        id /= 64;
    }
    digits.iter().rev().collect()
}
