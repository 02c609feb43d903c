// 🔢 Field Normalizer - Locale-tolerant field conversions
// Total functions: every input produces a value, validity is a flag

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// NUMERIC FIELDS
// ============================================================================

/// Outcome of a decimal conversion. `valid` is false when the raw text was
/// blank or unparseable; `value` is then 0.0 so a single malformed number
/// never costs the whole row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericField {
    pub value: f64,
    pub valid: bool,
}

impl NumericField {
    fn invalid() -> Self {
        NumericField {
            value: 0.0,
            valid: false,
        }
    }
}

/// Parse a decimal field from the source file.
///
/// The source mixes locale conventions: `"1234,56"` and `"1234.56"` both mean
/// the same number, so commas become dots before the numeric parse.
pub fn parse_decimal(raw: &str) -> NumericField {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return NumericField::invalid();
    }

    match trimmed.replace(',', ".").parse::<f64>() {
        Ok(value) => NumericField { value, valid: true },
        Err(_) => NumericField::invalid(),
    }
}

// ============================================================================
// DATE FIELDS
// ============================================================================

/// Parse a declaration date.
///
/// Accepted shapes:
/// - `D/M/Y` with 2- or 4-digit year ("15/03/49" → 2049-03-15)
/// - ISO `Y-M-D` ("2023-03-15")
///
/// Two-digit years pivot at 51: `>= 51` lands in the 1900s, everything else
/// in the 2000s. Impossible calendar dates ("31/02/23") are invalid.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.contains('/') {
        let parts: Vec<&str> = trimmed.split('/').collect();
        if parts.len() != 3 {
            return None;
        }

        let day: u32 = parts[0].trim().parse().ok()?;
        let month: u32 = parts[1].trim().parse().ok()?;

        let year_text = parts[2].trim();
        let mut year: i32 = year_text.parse().ok()?;
        if year_text.len() == 2 {
            year = if year > 50 { 1900 + year } else { 2000 + year };
        }

        return NaiveDate::from_ymd_opt(year, month, day);
    }

    if trimmed.contains('-') {
        return NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok();
    }

    None
}

// ============================================================================
// TEXT CLEANUP (exploratory path only, never applied during the load)
// ============================================================================

/// Drop diacritics: NFKD decomposition, then remove combining marks.
/// "pólizas" → "polizas"
pub fn strip_diacritics(text: &str) -> String {
    text.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Full cleanup for preview output: diacritics stripped plus the U+FFFD
/// replacement glyph removed (it shows up where a bad encoding guess already
/// destroyed a byte).
pub fn clean_text(text: &str) -> String {
    strip_diacritics(text).replace('\u{FFFD}', "")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_comma_and_dot_agree() {
        let comma = parse_decimal("1234,56");
        let dot = parse_decimal("1234.56");

        assert!(comma.valid);
        assert!(dot.valid);
        assert_eq!(comma.value, dot.value);
    }

    #[test]
    fn test_decimal_blank_is_invalid_zero() {
        let field = parse_decimal("   ");
        assert!(!field.valid);
        assert_eq!(field.value, 0.0);
    }

    #[test]
    fn test_decimal_garbage_is_invalid_zero() {
        let field = parse_decimal("N/A");
        assert!(!field.valid);
        assert_eq!(field.value, 0.0);
    }

    #[test]
    fn test_decimal_negative() {
        let field = parse_decimal("-12,5");
        assert!(field.valid);
        assert_eq!(field.value, -12.5);
    }

    #[test]
    fn test_date_century_pivot() {
        // 49 → 2049, 51 → 1951
        assert_eq!(
            parse_date("15/03/49"),
            NaiveDate::from_ymd_opt(2049, 3, 15)
        );
        assert_eq!(
            parse_date("15/03/51"),
            NaiveDate::from_ymd_opt(1951, 3, 15)
        );
        assert_eq!(
            parse_date("01/01/50"),
            NaiveDate::from_ymd_opt(2050, 1, 1)
        );
    }

    #[test]
    fn test_date_four_digit_year() {
        assert_eq!(
            parse_date("01/02/2023"),
            NaiveDate::from_ymd_opt(2023, 2, 1)
        );
    }

    #[test]
    fn test_date_iso_form() {
        assert_eq!(
            parse_date("2023-02-01"),
            NaiveDate::from_ymd_opt(2023, 2, 1)
        );
    }

    #[test]
    fn test_date_rejects_other_shapes() {
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("20230201"), None);
        assert_eq!(parse_date("1/2"), None);
        assert_eq!(parse_date("a/b/c"), None);
    }

    #[test]
    fn test_date_rejects_impossible_calendar_date() {
        assert_eq!(parse_date("31/02/2023"), None);
    }

    #[test]
    fn test_strip_diacritics() {
        assert_eq!(strip_diacritics("pólizas de importación"), "polizas de importacion");
        assert_eq!(strip_diacritics("Ñandú"), "Nandu");
    }

    #[test]
    fn test_clean_text_removes_replacement_glyph() {
        assert_eq!(clean_text("descripci�n"), "descripcin");
    }
}
