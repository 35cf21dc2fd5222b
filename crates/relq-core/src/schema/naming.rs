//! Relation naming rules used by foreign-key inference.

/// Lower-cases the first character: `ClassSession` -> `classSession`.
pub fn to_lower_camel(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// English plural of an identifier, good enough for table names.
pub fn pluralize(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with('y')
        && !matches!(
            lower.chars().rev().nth(1),
            Some('a') | Some('e') | Some('i') | Some('o') | Some('u')
        )
    {
        format!("{}ies", &name[..name.len() - 1])
    } else if lower.ends_with('s')
        || lower.ends_with('x')
        || lower.ends_with('z')
        || lower.ends_with("ch")
        || lower.ends_with("sh")
    {
        format!("{}es", name)
    } else {
        format!("{}s", name)
    }
}

/// Name of the relation a foreign-key column creates on its own table.
///
/// `mentorId` and `mentor_id` become `mentor`. Falls back to the target table
/// name when the stripped name is empty, is `id`, or equals the owning table.
/// A column with neither suffix also takes the target name, so the relation
/// never shadows the column it is inferred from.
pub fn forward_relation_name(column: &str, owner: &str, target: &str) -> String {
    let stripped = column
        .strip_suffix("Id")
        .or_else(|| column.strip_suffix("_id"))
        .unwrap_or(column);

    if stripped.is_empty()
        || stripped.eq_ignore_ascii_case("id")
        || stripped.eq_ignore_ascii_case(owner)
        || stripped == column
    {
        to_lower_camel(target)
    } else {
        stripped.to_string()
    }
}
