//! Task ID generation and resolution
//!
//! All IDs use the format: `{6-char-hex}-{type}-{slug}`
//! Example: `01943a-task-lunch-with-mara`

/// Generate a record ID from type and title
pub fn generate_id(domain_type: &str, title: &str) -> String {
    // The tail of a v7 UUID is random; the head is a coarse timestamp
    let hex = uuid::Uuid::now_v7().simple().to_string();
    let hex_prefix = &hex[hex.len() - 6..];
    let slug = slugify(title);
    if slug.is_empty() {
        format!("{}-{}", hex_prefix, domain_type)
    } else {
        format!("{}-{}-{}", hex_prefix, domain_type, slug)
    }
}

/// Slugify a title for use in IDs
fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        // Apostrophes vanish, everything else non-alphanumeric splits words
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c)
            } else if matches!(c, '\'' | '\u{2018}' | '\u{2019}') {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .take(6)
        .collect::<Vec<_>>()
        .join("-")
}

/// Resolve a partial task reference (hex prefix or slug fragment) to a full ID
///
/// Returns:
/// - Ok(Some(id)) if exactly one ID matches
/// - Ok(None) if none do
/// - Err with the candidates if the reference is ambiguous
pub fn resolve_reference<'a, I>(reference: &str, ids: I) -> Result<Option<String>, Vec<String>>
where
    I: IntoIterator<Item = &'a str>,
{
    let ids: Vec<&str> = ids.into_iter().collect();
    if ids.contains(&reference) {
        return Ok(Some(reference.to_string()));
    }

    let mut matches: Vec<String> = ids
        .into_iter()
        .filter(|id| id.starts_with(reference) || slug_of(id).is_some_and(|slug| slug.contains(reference)))
        .map(str::to_string)
        .collect();

    match matches.len() {
        0 => Ok(None),
        1 => Ok(matches.pop()),
        _ => {
            matches.sort();
            Err(matches)
        }
    }
}

/// The slug portion of `{hex}-{type}-{slug}`
fn slug_of(id: &str) -> Option<&str> {
    id.splitn(3, '-').nth(2)
}
