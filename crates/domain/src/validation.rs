//! Order number checksum.

/// Returns true if `number` is a non-empty string of ASCII digits that passes
/// the mod-10 (Luhn) checksum.
///
/// Every second digit counting from the rightmost one is doubled, doubled
/// values above 9 have 9 subtracted, and the digit sum must be divisible by 10.
pub fn is_valid_order_number(number: &str) -> bool {
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    let sum: u32 = number
        .bytes()
        .rev()
        .map(|b| u32::from(b - b'0'))
        .enumerate()
        .map(|(i, digit)| {
            if i % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                digit
            }
        })
        .sum();

    sum % 10 == 0
}
