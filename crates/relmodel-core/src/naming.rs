//! Default naming of join columns and junction tables, plus identifier checks.

use regex::Regex;
use std::sync::OnceLock;

/// Rules used to name join constructs that the declarations leave unnamed.
///
/// Each rule is a plain function so individual rules can be swapped:
///
/// ```
/// use relmodel_core::NamingStrategy;
///
/// let naming = NamingStrategy {
///     join_column: |property, referenced| format!("{property}_{referenced}"),
///     ..NamingStrategy::default()
/// };
/// assert_eq!((naming.join_column)("category", "id"), "category_id");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct NamingStrategy {
    /// `(property, referenced_column) -> column` for owning-side foreign keys.
    pub join_column: fn(&str, &str) -> String,
    /// `(owner_table, property, target_table) -> table` for junction tables.
    pub junction_table: fn(&str, &str, &str) -> String,
    /// `(table, referenced_column) -> column` for junction table columns.
    pub junction_column: fn(&str, &str) -> String,
}

impl Default for NamingStrategy {
    fn default() -> Self {
        Self {
            join_column: default_join_column_name,
            junction_table: default_junction_table_name,
            junction_column: default_junction_column_name,
        }
    }
}

/// `category` + `id` -> `categoryId`.
pub fn default_join_column_name(property: &str, referenced_column: &str) -> String {
    format!("{property}{}", pascal_case(referenced_column))
}

/// `question` + `categories` + `category` -> `question_categories_category`.
pub fn default_junction_table_name(owner_table: &str, property: &str, target_table: &str) -> String {
    snake_case(&format!("{owner_table}_{property}_{target_table}"))
}

/// `question` + `id` -> `questionId`.
pub fn default_junction_column_name(table: &str, referenced_column: &str) -> String {
    camel_case(&format!("{table}_{referenced_column}"))
}

/// Name for a junction column that would collide with one already taken.
pub fn deduplicated_column_name(column: &str, index: usize) -> String {
    format!("{column}_{index}")
}

/// Upper-case the first letter of every `_`/`-`/space separated word and join them.
pub fn pascal_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for word in s.split(['_', '-', ' ']).filter(|w| !w.is_empty()) {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

pub fn camel_case(s: &str) -> String {
    let pascal = pascal_case(s);
    let mut chars = pascal.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `questionCategories` -> `question_categories`.
pub fn snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut prev_lower_or_digit = false;
    for c in s.chars() {
        if c == '-' || c == ' ' {
            out.push('_');
            prev_lower_or_digit = false;
        } else if c.is_uppercase() {
            if prev_lower_or_digit {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower_or_digit = false;
        } else {
            out.push(c);
            prev_lower_or_digit = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

fn identifier_regex() -> Option<&'static Regex> {
    static IDENT: OnceLock<Option<Regex>> = OnceLock::new();
    IDENT
        .get_or_init(|| match Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$") {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(error = %e, "Identifier pattern failed to compile");
                None
            }
        })
        .as_ref()
}

/// Whether `name` is usable as an unquoted table, column or property name.
pub fn is_valid_identifier(name: &str) -> bool {
    match identifier_regex() {
        Some(re) => re.is_match(name),
        None => {
            !name.is_empty()
                && !name.starts_with(|c: char| c.is_ascii_digit())
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
    }
}
