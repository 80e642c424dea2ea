use std::fmt;

/// Coin amounts are integer minor units to avoid floating-point drift.
/// One coin is 100 minor units, so 12.34 coins = 1234.
pub type Amount = i64;

pub const MINOR_UNITS_PER_COIN: Amount = 100;

/// Format minor units as a decimal coin string.
/// Example: 5000 -> "50.00", -1234 -> "-12.34"
pub fn format_amount(amount: Amount) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    let scale = MINOR_UNITS_PER_COIN.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / scale, abs % scale)
}

/// Parse a decimal coin string into minor units.
/// Example: "50.00" -> 5000, "12.5" -> 1250, "100" -> 10000
///
/// More than two fractional digits is an error rather than a truncation.
pub fn parse_amount(input: &str) -> Result<Amount, ParseAmountError> {
    let input = input.trim();
    let (negative, digits) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input),
    };
    if digits.is_empty() {
        return Err(ParseAmountError::InvalidFormat);
    }

    let (units_str, fraction_str) = match digits.split_once('.') {
        Some((units, fraction)) => (units, fraction),
        None => (digits, ""),
    };

    if fraction_str.contains('.') {
        return Err(ParseAmountError::InvalidFormat);
    }
    if !units_str.chars().all(|c| c.is_ascii_digit())
        || !fraction_str.chars().all(|c| c.is_ascii_digit())
    {
        return Err(ParseAmountError::InvalidFormat);
    }
    if units_str.is_empty() && fraction_str.is_empty() {
        return Err(ParseAmountError::InvalidFormat);
    }

    let units: i64 = if units_str.is_empty() {
        0
    } else {
        units_str.parse().map_err(|_| ParseAmountError::Overflow)?
    };

    let fraction: i64 = match fraction_str.len() {
        0 => 0,
        1 => fraction_str.parse::<i64>().map_err(|_| ParseAmountError::InvalidFormat)? * 10,
        2 => fraction_str.parse().map_err(|_| ParseAmountError::InvalidFormat)?,
        _ => return Err(ParseAmountError::TooPrecise),
    };

    let amount = units
        .checked_mul(MINOR_UNITS_PER_COIN)
        .and_then(|a| a.checked_add(fraction))
        .ok_or(ParseAmountError::Overflow)?;

    Ok(if negative { -amount } else { amount })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseAmountError {
    InvalidFormat,
    TooPrecise,
    Overflow,
}

impl fmt::Display for ParseAmountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseAmountError::InvalidFormat => write!(f, "invalid coin amount format"),
            ParseAmountError::TooPrecise => {
                write!(f, "coin amounts have at most two decimal places")
            }
            ParseAmountError::Overflow => write!(f, "coin amount is too large"),
        }
    }
}

impl std::error::Error for ParseAmountError {}
