//! Text to typed-value conversions for the six logical field types.
//!
//! The wire protocol and the reply formats both speak text. Numeric
//! parsing keeps the daemon's historical `atoll`/`atoi`/`atof` semantics:
//! the longest valid prefix is read and garbage yields zero. Handlers
//! that need strict integers validate against the `^[0-9]+$` pattern
//! before converting.

/// Parse a 64-bit integer, `atoll` style: optional sign, digit prefix,
/// zero on no digits. Overflow saturates.
#[must_use]
pub fn parse_i64(text: &str) -> i64 {
    let trimmed = text.trim_start();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let mut value: i64 = 0;
    for b in digits.bytes() {
        if !b.is_ascii_digit() {
            break;
        }
        value = value
            .saturating_mul(10)
            .saturating_add(i64::from(b - b'0'));
    }
    if negative {
        -value
    } else {
        value
    }
}

/// Parse a 32-bit integer with the same prefix semantics as
/// [`parse_i64`]. Out-of-range values saturate.
#[must_use]
pub fn parse_i32(text: &str) -> i32 {
    let wide = parse_i64(text);
    i32::try_from(wide).unwrap_or(if wide < 0 { i32::MIN } else { i32::MAX })
}

/// Parse a double, `atof` style: the longest prefix that forms a valid
/// floating literal (sign, digits, fraction, exponent), zero otherwise.
#[must_use]
pub fn parse_f64(text: &str) -> f64 {
    let trimmed = text.trim_start();
    let bytes = trimmed.as_bytes();
    let mut end = 0;

    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    let int_digits = count_digits(&bytes[end..]);
    end += int_digits;
    let mut frac_digits = 0;
    if end < bytes.len() && bytes[end] == b'.' {
        frac_digits = count_digits(&bytes[end + 1..]);
        if int_digits + frac_digits > 0 {
            end += 1 + frac_digits;
        }
    }
    if int_digits + frac_digits == 0 {
        return 0.0;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits = count_digits(&bytes[exp_end..]);
        if exp_digits > 0 {
            end = exp_end + exp_digits;
        }
    }

    trimmed[..end].parse().unwrap_or(0.0)
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}

/// Render an integer in decimal.
#[must_use]
pub fn i64_to_text(value: i64) -> String {
    value.to_string()
}

/// Render a 32-bit integer in decimal.
#[must_use]
pub fn i32_to_text(value: i32) -> String {
    value.to_string()
}

/// Render a double in `printf("%f")` form: six decimal places.
#[must_use]
pub fn f64_to_text(value: f64) -> String {
    format!("{value:.6}")
}
