/// Normalize a dialed string into an E.164-style dialable address.
///
/// 11 digits starting with `1` and bare 10-digit numbers are treated as
/// North American numbers. Anything else keeps its digits behind a `+`,
/// unless the raw input already carries a leading `+`, in which case it is
/// returned untouched. Never fails; callers validate non-emptiness.
pub fn normalize(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.len() == 11 && digits.starts_with('1') {
        return format!("+{}", digits);
    }
    if digits.len() == 10 {
        return format!("+1{}", digits);
    }
    if raw.starts_with('+') {
        raw.to_string()
    } else {
        format!("+{}", digits)
    }
}

/// True when the address carries at least one digit after normalization.
pub fn is_dialable(address: &str) -> bool {
    address.chars().any(|c| c.is_ascii_digit())
}
