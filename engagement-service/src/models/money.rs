//! Money helpers. Amounts are `i64` minor units everywhere; `Decimal` only
//! appears when an amount is shown to a person.

use rust_decimal::Decimal;

/// Minor units to a two-place decimal in major units.
pub fn to_major(minor_units: i64) -> Decimal {
    Decimal::new(minor_units, 2)
}

/// Currency symbol for the codes we bill in; anything else is shown as the
/// upper-cased ISO code followed by a space.
pub fn currency_symbol(currency: &str) -> String {
    match currency.to_ascii_lowercase().as_str() {
        "gbp" => "£".to_string(),
        "usd" => "$".to_string(),
        "eur" => "€".to_string(),
        other => format!("{} ", other.to_ascii_uppercase()),
    }
}

/// `150000, "gbp"` -> `£1,500.00`.
pub fn format_amount(minor_units: i64, currency: &str) -> String {
    let sign = if minor_units < 0 { "-" } else { "" };
    let abs = minor_units.unsigned_abs();
    let whole = abs / 100;
    let cents = abs % 100;

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{}{}{}.{:02}", sign, currency_symbol(currency), grouped, cents)
}

/// Split a price into deposit and balance. The deposit carries the odd
/// minor unit so the two always sum to the price.
pub fn split_deposit(total_minor_units: i64) -> (i64, i64) {
    let balance = total_minor_units / 2;
    (total_minor_units - balance, balance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_grouping_and_symbol() {
        assert_eq!(format_amount(150000, "gbp"), "£1,500.00");
        assert_eq!(format_amount(5, "usd"), "$0.05");
        assert_eq!(format_amount(123456789, "eur"), "€1,234,567.89");
        assert_eq!(format_amount(99900, "chf"), "CHF 999.00");
        assert_eq!(format_amount(-250, "gbp"), "-£2.50");
    }

    #[test]
    fn major_units_keep_exact_value() {
        assert_eq!(to_major(150000).to_string(), "1500.00");
        assert_eq!(to_major(1).to_string(), "0.01");
    }

    #[test]
    fn deposit_split_sums_to_total() {
        assert_eq!(split_deposit(150000), (75000, 75000));
        assert_eq!(split_deposit(150001), (75001, 75000));
        for total in [0_i64, 1, 2, 99, 12345, 9_999_999] {
            let (deposit, balance) = split_deposit(total);
            assert_eq!(deposit + balance, total);
            assert!(deposit >= balance);
        }
    }
}
