use crate::error::ReconcileError;
use crate::table::Cell;
use regex::Regex;
use std::sync::OnceLock;

/// Width of every Michigan entity code seen so far.
pub const DEFAULT_CODE_WIDTH: usize = 5;

// "12,345" or "12,345.0" as produced by locale-aware spreadsheet exports
fn grouped_number() -> &'static Regex {
    static GROUPED: OnceLock<Regex> = OnceLock::new();
    GROUPED.get_or_init(|| Regex::new(r"^\d{1,3}(,\d{3})+(\.\d*)?$").expect("static pattern"))
}

/// Canonicalize a raw code cell into a zero-padded digit string of at least `width` characters.
///
/// Float artifacts are truncated (`"22010.0"` and `22010.0` both become `"22010"`), grouping
/// commas are removed, and codes longer than `width` pass through unshortened.
pub fn normalize_code(raw: &Cell, width: usize) -> Result<String, ReconcileError> {
    let digits = match raw {
        Cell::Int(value) => value.to_string(),
        Cell::Float(value) => float_to_digits(*value, &value.to_string())?,
        Cell::Text(text) => text_to_digits(text)?,
        Cell::Bool(value) => {
            return Err(ReconcileError::malformed_code(
                value.to_string(),
                "a true/false value is not a code",
            ));
        }
        Cell::Empty => return Err(ReconcileError::malformed_code("", "the code is empty")),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ReconcileError::malformed_code(
            raw.to_string(),
            "codes may only contain digits",
        ));
    }

    Ok(format!("{digits:0>width$}"))
}

/// Trim surrounding whitespace. Case and inner spacing are significant.
pub fn normalize_name(raw: &str) -> String {
    raw.trim().to_string()
}

fn text_to_digits(text: &str) -> Result<String, ReconcileError> {
    let trimmed = text.trim();
    let ungrouped = if grouped_number().is_match(trimmed) {
        trimmed.replace(',', "")
    } else {
        trimmed.to_string()
    };

    let Some((whole, fraction)) = ungrouped.split_once('.') else {
        return Ok(ungrouped);
    };
    // Plain decimals are truncated as text so long codes keep every digit
    if !whole.is_empty() && whole.bytes().all(|b| b.is_ascii_digit()) && fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(whole.to_string());
    }

    let value: f64 = ungrouped
        .parse()
        .map_err(|_| ReconcileError::malformed_code(text, "not a number"))?;
    float_to_digits(value, text)
}

fn float_to_digits(value: f64, raw: &str) -> Result<String, ReconcileError> {
    if !value.is_finite() {
        return Err(ReconcileError::malformed_code(raw, "not a finite number"));
    }
    let truncated = value.trunc();
    if truncated < 0.0 {
        return Err(ReconcileError::malformed_code(raw, "codes cannot be negative"));
    }
    if truncated >= u64::MAX as f64 {
        return Err(ReconcileError::malformed_code(raw, "too large to be a code"));
    }
    Ok(format!("{}", truncated as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    #[test]
    fn equivalent_spellings_share_one_canonical_code() {
        let expected = "00123";
        assert_eq!(normalize_code(&text("123"), 5).unwrap(), expected);
        assert_eq!(normalize_code(&text("00123"), 5).unwrap(), expected);
        assert_eq!(normalize_code(&Cell::Float(123.0), 5).unwrap(), expected);
        assert_eq!(normalize_code(&Cell::Int(123), 5).unwrap(), expected);
    }

    #[test]
    fn float_artifacts_are_truncated() {
        assert_eq!(normalize_code(&text("22010.0"), 5).unwrap(), "22010");
        assert_eq!(normalize_code(&Cell::Int(22010), 5).unwrap(), "22010");
        assert_eq!(normalize_code(&text("22010"), 5).unwrap(), "22010");
        assert_eq!(normalize_code(&text("2201.9"), 5).unwrap(), "02201");
    }

    #[test]
    fn grouping_commas_and_padding_whitespace_are_ignored() {
        assert_eq!(normalize_code(&text("22,010"), 5).unwrap(), "22010");
        assert_eq!(normalize_code(&text(" 1,234.0 "), 5).unwrap(), "01234");
        assert_eq!(normalize_code(&text(" 81 "), 5).unwrap(), "00081");
    }

    #[test]
    fn longer_codes_are_not_truncated() {
        assert_eq!(normalize_code(&text("1234567"), 5).unwrap(), "1234567");
        assert_eq!(normalize_code(&Cell::Float(1234567.0), 5).unwrap(), "1234567");
    }

    #[test]
    fn long_decimal_text_keeps_every_digit() {
        assert_eq!(normalize_code(&text("12345678901234567.0"), 5).unwrap(), "12345678901234567");
        assert_eq!(normalize_code(&text("0041.00"), 5).unwrap(), "00041");
        assert_eq!(normalize_code(&text("1.5e3"), 5).unwrap(), "01500");
    }

    #[test]
    fn non_numeric_codes_are_rejected() {
        for raw in [text("12a34"), text("abc.def"), text(""), text("-12"), Cell::Empty] {
            assert!(
                matches!(normalize_code(&raw, 5), Err(ReconcileError::MalformedCode { .. })),
                "{raw:?} should be rejected"
            );
        }
        assert!(normalize_code(&Cell::Bool(true), 5).is_err());
        assert!(normalize_code(&Cell::Float(f64::NAN), 5).is_err());
        assert!(normalize_code(&Cell::Float(-3.0), 5).is_err());
        assert!(normalize_code(&Cell::Int(-3), 5).is_err());
    }

    #[test]
    fn names_keep_case_and_inner_spacing() {
        assert_eq!(normalize_name("  Kent  ISD \t"), "Kent  ISD");
        assert_eq!(normalize_name("kent isd"), "kent isd");
    }

    fn arb_code_cell() -> impl Strategy<Value = Cell> {
        prop_oneof![
            (0i64..10_000_000).prop_map(Cell::Int),
            (0u32..10_000_000).prop_map(|v| Cell::Float(f64::from(v))),
            (0u32..10_000_000).prop_map(|v| Cell::Text(v.to_string())),
            (0u32..10_000_000).prop_map(|v| Cell::Text(format!("{v}.0"))),
            "[0-9]{1,8}".prop_map(Cell::Text),
        ]
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(raw in arb_code_cell()) {
            let once = normalize_code(&raw, DEFAULT_CODE_WIDTH).unwrap();
            let twice = normalize_code(&Cell::Text(once.clone()), DEFAULT_CODE_WIDTH).unwrap();
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn width_is_a_lower_bound(raw in arb_code_cell()) {
            let code = normalize_code(&raw, DEFAULT_CODE_WIDTH).unwrap();
            prop_assert!(code.len() >= DEFAULT_CODE_WIDTH);
        }

        #[test]
        fn short_values_land_exactly_on_width(value in 0u32..100_000) {
            let code = normalize_code(&Cell::Int(i64::from(value)), DEFAULT_CODE_WIDTH).unwrap();
            prop_assert_eq!(code.len(), DEFAULT_CODE_WIDTH);
            prop_assert_eq!(code.parse::<u32>().unwrap(), value);
        }
    }
}
