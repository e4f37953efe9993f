//! User-visible name to file-system name conversion.
//!
//! This is the UFO 3 naming algorithm: transliterate away characters that
//! file systems reject, tag every uppercase letter with a trailing `_` so
//! that names survive case-insensitive volumes, dodge reserved system
//! stems, and resolve any remaining collisions deterministically.

use std::collections::HashSet;

use crate::error::NormalizerError;

/// The per-name length limit imposed by common file systems.
pub const MAX_FILE_NAME_LENGTH: usize = 255;

/// Reserved stems, compared case-insensitively against each dot-separated
/// segment of a candidate name.
pub static RESERVED_FILE_NAMES: [&str; 13] = [
    "con", "prn", "aux", "clock$", "nul", "a:-z:", "com1", "lpt1", "lpt2", "lpt3", "com2", "com3",
    "com4",
];

/// Characters that must not appear in a file name.
pub fn is_illegal_character(c: char) -> bool {
    matches!(
        c,
        '"' | '*' | '+' | '/' | ':' | '<' | '>' | '?' | '[' | '\\' | ']' | '|'
    ) || (c as u32) < 0x20
        || c as u32 == 0x7F
}

/// Convert a user-visible name into a legal file name that does not
/// collide with anything in `existing`.
///
/// `existing` holds the lowercased forms of every name already taken in
/// the target directory; candidates are compared lowercased so that two
/// names differing only in case can never coexist.
pub fn user_name_to_file_name(
    user_name: &str,
    existing: &HashSet<String>,
    prefix: &str,
    suffix: &str,
) -> Result<String, NormalizerError> {
    let prefix_length = prefix.chars().count();
    let suffix_length = suffix.chars().count();
    // an initial period would hide the file; only a prefix saves it
    let name = if let Some(rest) = user_name.strip_prefix('.').filter(|_| prefix.is_empty()) {
        format!("_{}", rest)
    } else {
        user_name.to_string()
    };
    // transliterate
    let mut filtered = String::new();
    for c in name.chars() {
        if is_illegal_character(c) {
            filtered.push('_');
        } else if c.to_lowercase().to_string() != c.to_string() {
            filtered.push(c);
            filtered.push('_');
        } else {
            filtered.push(c);
        }
    }
    // clip to the length limit
    let slice_length = MAX_FILE_NAME_LENGTH.saturating_sub(prefix_length + suffix_length);
    let mut name: String = filtered.chars().take(slice_length).collect();
    // keep reserved stems out of the dot-separated segments
    name = name
        .split('.')
        .map(|part| {
            if RESERVED_FILE_NAMES.contains(&part.to_lowercase().as_str()) {
                format!("_{}", part)
            } else {
                part.to_string()
            }
        })
        .collect::<Vec<String>>()
        .join(".");
    let full_name = format!("{}{}{}", prefix, name, suffix);
    if existing.contains(&full_name.to_lowercase()) {
        return resolve_collision_by_counter(&name, existing, prefix, suffix);
    }
    Ok(full_name)
}

/// Collision fallback, tier 1: append a zero-padded 15-digit counter to
/// the (possibly further truncated) name.
fn resolve_collision_by_counter(
    user_name: &str,
    existing: &HashSet<String>,
    prefix: &str,
    suffix: &str,
) -> Result<String, NormalizerError> {
    const COUNTER_WIDTH: usize = 15;
    const MAX_COUNTER: u64 = 999_999_999_999_999;
    let prefix_length = prefix.chars().count();
    let suffix_length = suffix.chars().count();
    let mut name = user_name.to_string();
    let total = prefix_length + name.chars().count() + suffix_length + COUNTER_WIDTH;
    if total > MAX_FILE_NAME_LENGTH {
        let keep = MAX_FILE_NAME_LENGTH.saturating_sub(prefix_length + suffix_length + COUNTER_WIDTH);
        name = name.chars().take(keep).collect();
    }
    let mut counter: u64 = 1;
    loop {
        let full_name = format!("{}{}{:015}{}", prefix, name, counter, suffix);
        if !existing.contains(&full_name.to_lowercase()) {
            return Ok(full_name);
        }
        counter += 1;
        if counter >= MAX_COUNTER {
            break;
        }
    }
    resolve_collision_by_sequence(user_name, existing, prefix, suffix)
}

/// Collision fallback, tier 2: abandon the name and search bare integers.
/// Exhausting the numeric capacity of the remaining width is an error.
fn resolve_collision_by_sequence(
    user_name: &str,
    existing: &HashSet<String>,
    prefix: &str,
    suffix: &str,
) -> Result<String, NormalizerError> {
    let max_length =
        MAX_FILE_NAME_LENGTH.saturating_sub(prefix.chars().count() + suffix.chars().count());
    let max_value: u128 = if max_length >= 39 {
        // 10^39 - 1 would overflow; the search can never get there anyway
        u128::MAX
    } else {
        10u128.pow(max_length as u32) - 1
    };
    let mut counter: u128 = 1;
    while counter < max_value {
        let full_name = format!("{}{}{}", prefix, counter, suffix);
        if !existing.contains(&full_name.to_lowercase()) {
            return Ok(full_name);
        }
        counter += 1;
    }
    Err(NormalizerError::NameTranslation {
        name: user_name.to_string(),
    })
}
