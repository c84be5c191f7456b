use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Money is held as integer cents: an exact fixed-point value with two fractional digits.
/// All balance arithmetic happens on this type, never on floats.
pub type Cents = i64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("invalid money format: {0}")]
    InvalidFormat(String),

    #[error("amount {0} has more than two decimal places")]
    TooPrecise(String),

    #[error("amount {0} is out of range")]
    OutOfRange(String),
}

/// Format cents as a decimal string.
/// Example: 5000 -> "50.00", -1234 -> "-12.34"
pub fn format_cents(cents: Cents) -> String {
    cents_to_decimal(cents).to_string()
}

/// Convert cents into a `Decimal` with scale 2.
pub fn cents_to_decimal(cents: Cents) -> Decimal {
    Decimal::new(cents, 2)
}

/// Convert an exact decimal into cents. Values with a third significant
/// fractional digit are rejected rather than truncated.
pub fn cents_from_decimal(value: Decimal) -> Result<Cents, MoneyError> {
    if value.normalize().scale() > 2 {
        return Err(MoneyError::TooPrecise(value.to_string()));
    }
    value
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|scaled| scaled.to_i64())
        .ok_or_else(|| MoneyError::OutOfRange(value.to_string()))
}

/// Parse a decimal string into cents.
/// Example: "50.00" -> 5000, "12.5" -> 1250, "100" -> 10000
pub fn parse_amount(input: &str) -> Result<Cents, MoneyError> {
    let input = input.trim();
    let value: Decimal = input
        .parse()
        .map_err(|_| MoneyError::InvalidFormat(input.to_string()))?;
    cents_from_decimal(value)
}

/// Convert a transport float into cents, rounding half away from zero.
pub fn cents_from_f64(value: f64) -> Result<Cents, MoneyError> {
    if !value.is_finite() {
        return Err(MoneyError::InvalidFormat(value.to_string()));
    }
    let decimal =
        Decimal::from_f64(value).ok_or_else(|| MoneyError::OutOfRange(value.to_string()))?;
    cents_from_decimal(decimal.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(5000), "50.00");
        assert_eq!(format_cents(1234), "12.34");
        assert_eq!(format_cents(1), "0.01");
        assert_eq!(format_cents(0), "0.00");
        assert_eq!(format_cents(-5000), "-50.00");
        assert_eq!(format_cents(-1), "-0.01");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("50.00"), Ok(5000));
        assert_eq!(parse_amount("50"), Ok(5000));
        assert_eq!(parse_amount("12.34"), Ok(1234));
        assert_eq!(parse_amount("12.5"), Ok(1250));
        assert_eq!(parse_amount(" 0.01 "), Ok(1));
        assert_eq!(parse_amount("-50.00"), Ok(-5000));
        assert_eq!(parse_amount("1.230"), Ok(123));
    }

    #[test]
    fn test_parse_amount_rejects_sub_cent_precision() {
        assert!(matches!(
            parse_amount("100.999"),
            Err(MoneyError::TooPrecise(_))
        ));
    }

    #[test]
    fn test_parse_amount_invalid() {
        assert!(matches!(
            parse_amount("abc"),
            Err(MoneyError::InvalidFormat(_))
        ));
        assert!(parse_amount("12.34.56").is_err());
    }

    #[test]
    fn test_cents_from_decimal() {
        assert_eq!(cents_from_decimal(dec!(150.00)), Ok(15000));
        assert_eq!(cents_from_decimal(dec!(0.10)), Ok(10));
        assert_eq!(cents_to_decimal(7000), dec!(70.00));
    }

    #[test]
    fn test_cents_from_f64_rounds_binary_noise() {
        // 0.1 + 0.2 is 0.30000000000000004 in binary floating point
        assert_eq!(cents_from_f64(0.1 + 0.2), Ok(30));
        assert_eq!(cents_from_f64(19.99), Ok(1999));
        assert!(cents_from_f64(f64::NAN).is_err());
    }
}
