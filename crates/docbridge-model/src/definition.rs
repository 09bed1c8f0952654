//! Static model schema.

use crate::dates::DEFAULT_DATE_FORMAT;
use crate::events::Hooks;

/// Declared type of a model field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Document,
    Array,
}

impl FieldType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Float)
    }
}

/// How a field's values are compared for dirty checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Compared as canonical timestamps
    Date,
    /// Compared after numeric coercion, numeric strings included
    Numeric,
    /// Compared as stored; numbers still match across BSON number types
    Plain,
}

/// Schema and persistence policy of a model type.
///
/// # Example
///
/// ```ignore
/// struct BlogPost;
///
/// impl ModelDefinition for BlogPost {
///     const NAME: &'static str = "BlogPost";
///
///     fn dates() -> &'static [&'static str] {
///         &["published_at"]
///     }
/// }
///
/// assert_eq!(BlogPost::collection(), "blog_posts");
/// ```
pub trait ModelDefinition: Sized + Send + Sync + 'static {
    /// Model name in PascalCase, e.g. `"BlogPost"`
    const NAME: &'static str;

    const CREATED_AT: &'static str = "created_at";
    const UPDATED_AT: &'static str = "updated_at";

    /// Collection name (default: plural snake_case of `NAME`)
    fn collection() -> String {
        pluralize(&snake_case(Self::NAME))
    }

    fn key_name() -> &'static str {
        "id"
    }

    /// Whether the store generates the primary key
    fn incrementing() -> bool {
        true
    }

    /// Whether `created_at` / `updated_at` are maintained
    fn timestamps() -> bool {
        true
    }

    /// Fields holding dates, in addition to the timestamp fields
    fn dates() -> &'static [&'static str] {
        &[]
    }

    fn field_types() -> &'static [(&'static str, FieldType)] {
        &[]
    }

    /// chrono format used when dates are stored as strings
    fn date_format() -> &'static str {
        DEFAULT_DATE_FORMAT
    }

    /// Key other models use to reference this one, e.g. `blog_post_id`
    fn foreign_key() -> String {
        format!("{}_id", snake_case(Self::NAME))
    }

    /// Lifecycle hooks registered for every instance
    fn hooks() -> Hooks<Self> {
        Hooks::default()
    }
}

/// Every field treated as a date, timestamp fields included
pub fn date_fields<D: ModelDefinition>() -> Vec<&'static str> {
    let mut fields: Vec<&'static str> = D::dates().to_vec();
    if D::timestamps() {
        fields.push(D::CREATED_AT);
        fields.push(D::UPDATED_AT);
    }
    for (field, kind) in D::field_types() {
        if *kind == FieldType::Date {
            fields.push(*field);
        }
    }
    fields.sort_unstable();
    fields.dedup();
    fields
}

pub fn is_date_field<D: ModelDefinition>(field: &str) -> bool {
    date_fields::<D>().contains(&field)
}

pub fn field_kind<D: ModelDefinition>(field: &str) -> FieldKind {
    if is_date_field::<D>(field) {
        return FieldKind::Date;
    }
    match D::field_types().iter().find(|(name, _)| *name == field) {
        Some((_, kind)) if kind.is_numeric() => FieldKind::Numeric,
        _ => FieldKind::Plain,
    }
}

/// `BlogPost` -> `blog_post`, `HTTPRequest` -> `http_request`
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in chars.iter().enumerate() {
        if ch.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1);
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.map_or(false, |n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else if *ch == ' ' || *ch == '-' {
            if !out.ends_with('_') {
                out.push('_');
            }
        } else {
            out.push(*ch);
        }
    }
    out
}

/// Naive English plural of the last word
pub fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }
    let lower = word.to_lowercase();
    if let Some(stem) = word.strip_suffix('y') {
        let before = stem.chars().last();
        if before.map_or(false, |c| !"aeiou".contains(c.to_ascii_lowercase())) {
            return format!("{}ies", stem);
        }
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
        return format!("{}es", word);
    }
    format!("{}s", word)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BlogPost;

    impl ModelDefinition for BlogPost {
        const NAME: &'static str = "BlogPost";

        fn dates() -> &'static [&'static str] {
            &["published_at"]
        }

        fn field_types() -> &'static [(&'static str, FieldType)] {
            &[("views", FieldType::Integer), ("archived_on", FieldType::Date)]
        }
    }

    struct Category;

    impl ModelDefinition for Category {
        const NAME: &'static str = "Category";

        fn timestamps() -> bool {
            false
        }
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("BlogPost"), "blog_post");
        assert_eq!(snake_case("User"), "user");
        assert_eq!(snake_case("HTTPRequest"), "http_request");
        assert_eq!(snake_case("author"), "author");
        assert_eq!(snake_case("postAuthor"), "post_author");
    }

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize("user"), "users");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("day"), "days");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("match"), "matches");
    }

    #[test]
    fn test_defaults() {
        assert_eq!(BlogPost::collection(), "blog_posts");
        assert_eq!(Category::collection(), "categories");
        assert_eq!(BlogPost::key_name(), "id");
        assert_eq!(BlogPost::foreign_key(), "blog_post_id");
        assert!(BlogPost::incrementing());
        assert_eq!(BlogPost::date_format(), "%Y-%m-%d %H:%M:%S");
    }

    #[test]
    fn test_date_fields() {
        assert_eq!(
            date_fields::<BlogPost>(),
            vec!["archived_on", "created_at", "published_at", "updated_at"]
        );
        assert!(date_fields::<Category>().is_empty());
    }

    #[test]
    fn test_field_kind() {
        assert_eq!(field_kind::<BlogPost>("published_at"), FieldKind::Date);
        assert_eq!(field_kind::<BlogPost>("views"), FieldKind::Numeric);
        assert_eq!(field_kind::<BlogPost>("title"), FieldKind::Plain);
    }
}
