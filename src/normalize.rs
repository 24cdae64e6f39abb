//! Normalization of establishment rows before they enter the cascade.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{Coord, EstablishmentRecord, RawEstablishment};

pub const POSTAL_CODE_WIDTH: usize = 8;
pub const ID_BASE_WIDTH: usize = 8;
pub const ID_ORDER_WIDTH: usize = 4;
pub const ID_CHECK_DIGIT_WIDTH: usize = 2;

static NON_DIGIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^0-9]").expect("valid regex"));

/// Removes every character that is not an ASCII digit.
pub fn digits_only(value: &str) -> String {
    NON_DIGIT.replace_all(value, "").into_owned()
}

/// Left pads with zeros up to `width`. Longer values are kept as they are.
pub fn zero_pad(value: &str, width: usize) -> String {
    format!("{:0>width$}", value, width = width)
}

/// Digits only, padded to eight. No digits at all yields an empty string.
pub fn normalize_postal_code(value: &str) -> String {
    let digits = digits_only(value);
    if digits.is_empty() {
        digits
    } else {
        zero_pad(&digits, POSTAL_CODE_WIDTH)
    }
}

pub fn normalize_street_number(value: &str) -> String {
    digits_only(value)
}

/// Base, order and check digit concatenated at fixed widths.
pub fn composite_id(base: &str, order: &str, check_digit: &str) -> String {
    let mut id = String::with_capacity(ID_BASE_WIDTH + ID_ORDER_WIDTH + ID_CHECK_DIGIT_WIDTH);
    id.push_str(&zero_pad(base.trim(), ID_BASE_WIDTH));
    id.push_str(&zero_pad(order.trim(), ID_ORDER_WIDTH));
    id.push_str(&zero_pad(check_digit.trim(), ID_CHECK_DIGIT_WIDTH));
    id
}

/// Normalizes one raw row.
///
/// Coordinates are absent unless the input already carried a complete, finite
/// pair (a previously enriched file); a half pair is dropped.
pub fn normalize_record(raw: RawEstablishment) -> EstablishmentRecord {
    let composite = composite_id(&raw.id_base, &raw.id_order, &raw.id_check_digit);
    let postal_code = normalize_postal_code(&raw.postal_code);
    let street_number = normalize_street_number(&raw.street_number);
    let prior = match (raw.latitude, raw.longitude) {
        (Some(lat), Some(lon)) => Coord::new(lat, lon),
        _ => None,
    };
    EstablishmentRecord::from_parts(composite, raw, street_number, postal_code, prior)
}

pub fn normalize_batch(batch: Vec<RawEstablishment>) -> Vec<EstablishmentRecord> {
    batch.into_iter().map(normalize_record).collect()
}
