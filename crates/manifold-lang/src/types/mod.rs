//! The structural type algebra.
//!
//! # Design
//!
//! - `Type` — one enum for every type constructor; parameterized forms
//!   hold their arguments inline
//! - Equality and hashing go through the canonical rendering: `Display`
//!   is injective on type structure, and aliases compare by name, which
//!   sidesteps cycles through resolved alias slots
//! - Alias resolution lives in an interior `OnceLock` so a registered
//!   alias can be resolved once per compilation and shared
//! - Every structural walk that can cross an alias takes a
//!   [`RecursionGuard`]; re-entry terminates with the operation's
//!   coinductive default
//!
//! Submodules implement the operations: `instance` (`is_instance`),
//! `assignable` (`is_assignable`), `inference` (value typing, LUB,
//! generalization), and `parameterize` (`Type[args]` and `new`-style
//! instantiation).

mod assignable;
mod inference;
mod instance;
mod parameterize;

pub use inference::{infer, infer_detailed, least_upper_bound};
pub use parameterize::{instantiate, parameterize, CreationError};

use crate::value::{write_float, ValueRegex};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

/// A struct member: key, key optionality, and value type.
#[derive(Debug, Clone)]
pub struct StructField {
    pub key: String,
    /// True when the key was declared `Optional[...]`.
    pub optional: bool,
    pub value: Type,
}

/// A named alias with a once-resolved target type.
#[derive(Debug, Clone)]
pub struct AliasType {
    pub name: String,
    resolved: Arc<OnceLock<Type>>,
}

impl AliasType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resolved: Arc::new(OnceLock::new()),
        }
    }

    /// Set the resolved type; returns false if already resolved.
    pub fn resolve(&self, resolved: Type) -> bool {
        self.resolved.set(resolved).is_ok()
    }

    /// The resolved type, if resolution has happened.
    pub fn resolved_type(&self) -> Option<&Type> {
        self.resolved.get()
    }
}

/// Tracks in-progress alias walks so cyclic aliases terminate.
///
/// Keys are (alias name, operand identity); re-entering an active key
/// means the operation has cycled and the caller returns its coinductive
/// default (`true` for assignability, `false` otherwise).
#[derive(Debug, Default)]
pub struct RecursionGuard {
    active: HashSet<(String, usize)>,
}

impl RecursionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a walk; false means this key is already active (a cycle).
    pub fn enter(&mut self, alias: &str, operand: usize) -> bool {
        self.active.insert((alias.to_string(), operand))
    }

    pub fn leave(&mut self, alias: &str, operand: usize) {
        self.active.remove(&(alias.to_string(), operand));
    }
}

/// A type in the algebra.
#[derive(Debug, Clone)]
pub enum Type {
    Any,
    Undef,
    Default,
    Boolean,
    Integer {
        from: Option<i64>,
        to: Option<i64>,
    },
    Float {
        from: Option<f64>,
        to: Option<f64>,
    },
    /// Bounds are grapheme counts.
    String {
        from: Option<usize>,
        to: Option<usize>,
    },
    Regexp {
        pattern: Option<ValueRegex>,
    },
    Pattern(Vec<ValueRegex>),
    Enum(Vec<std::string::String>),
    Numeric,
    Scalar,
    Data,
    Collection {
        from: Option<usize>,
        to: Option<usize>,
    },
    Array {
        element: Box<Type>,
        from: Option<usize>,
        to: Option<usize>,
    },
    Hash {
        key: Box<Type>,
        value: Box<Type>,
        from: Option<usize>,
        to: Option<usize>,
    },
    Tuple {
        types: Vec<Type>,
        from: Option<usize>,
        to: Option<usize>,
    },
    Struct(Vec<StructField>),
    Variant(Vec<Type>),
    Optional(Option<Box<Type>>),
    NotUndef(Option<Box<Type>>),
    Callable {
        types: Vec<Type>,
        min: Option<usize>,
        max: Option<usize>,
        block: Option<Box<Type>>,
    },
    /// `Resource`, `Resource[Type]`, or `Resource[Type, 'title']`; the
    /// type name is stored lowercased.
    Resource {
        type_name: Option<std::string::String>,
        title: Option<std::string::String>,
    },
    Class {
        name: Option<std::string::String>,
    },
    /// The type of types; `Type[T]` when parameterized.
    Type(Option<Box<Type>>),
    Iterable(Option<Box<Type>>),
    Iterator(Option<Box<Type>>),
    Alias(AliasType),
    Runtime {
        runtime: Option<std::string::String>,
        type_name: Option<std::string::String>,
    },
    CatalogEntry,
}

impl Type {
    /// An unparameterized `Integer`.
    pub fn integer() -> Self {
        Type::Integer {
            from: None,
            to: None,
        }
    }

    /// An unparameterized `Float`.
    pub fn float() -> Self {
        Type::Float {
            from: None,
            to: None,
        }
    }

    /// An unparameterized `String`.
    pub fn string() -> Self {
        Type::String {
            from: None,
            to: None,
        }
    }

    /// An unparameterized `Array` (of `Data`).
    pub fn array() -> Self {
        Type::Array {
            element: Box::new(Type::Data),
            from: None,
            to: None,
        }
    }

    /// An unparameterized `Hash` (of `Scalar => Data`).
    pub fn hash() -> Self {
        Type::Hash {
            key: Box::new(Type::Scalar),
            value: Box::new(Type::Data),
            from: None,
            to: None,
        }
    }

    /// The built-in type for a (capitalized) name, or `None`.
    pub fn find_builtin(name: &str) -> Option<Type> {
        let t = match name {
            "Any" => Type::Any,
            "Undef" => Type::Undef,
            "Default" => Type::Default,
            "Boolean" => Type::Boolean,
            "Integer" => Type::integer(),
            "Float" => Type::float(),
            "String" => Type::string(),
            "Regexp" => Type::Regexp { pattern: None },
            "Pattern" => Type::Pattern(Vec::new()),
            "Enum" => Type::Enum(Vec::new()),
            "Numeric" => Type::Numeric,
            "Scalar" => Type::Scalar,
            "Data" => Type::Data,
            "Collection" => Type::Collection {
                from: None,
                to: None,
            },
            "Array" => Type::array(),
            "Hash" => Type::hash(),
            "Tuple" => Type::Tuple {
                types: Vec::new(),
                from: None,
                to: None,
            },
            "Struct" => Type::Struct(Vec::new()),
            "Variant" => Type::Variant(Vec::new()),
            "Optional" => Type::Optional(None),
            "NotUndef" => Type::NotUndef(None),
            "Callable" => Type::Callable {
                types: Vec::new(),
                min: None,
                max: None,
                block: None,
            },
            "Resource" => Type::Resource {
                type_name: None,
                title: None,
            },
            "Class" => Type::Class { name: None },
            "Type" => Type::Type(None),
            "Iterable" => Type::Iterable(None),
            "Iterator" => Type::Iterator(None),
            "Runtime" => Type::Runtime {
                runtime: None,
                type_name: None,
            },
            "CatalogEntry" => Type::CatalogEntry,
            _ => return None,
        };
        Some(t)
    }

    /// See through resolved aliases; unresolved aliases stay as-is.
    pub fn dereference(&self) -> &Type {
        let mut current = self;
        while let Type::Alias(alias) = current {
            match alias.resolved_type() {
                Some(resolved) => current = resolved,
                None => break,
            }
        }
        current
    }

    /// Whether the type eventually resolves to something other than a
    /// self-referential alias knot.
    pub fn is_real(&self, guard: &mut RecursionGuard) -> bool {
        match self {
            Type::Alias(alias) => {
                if !guard.enter(&alias.name, 0) {
                    return false;
                }
                let result = alias
                    .resolved_type()
                    .map(|resolved| resolved.is_real(guard))
                    .unwrap_or(false);
                guard.leave(&alias.name, 0);
                result
            }
            Type::Variant(types) => {
                if types.is_empty() {
                    return true;
                }
                let mut has_real = false;
                for t in types {
                    if t.is_real(guard) {
                        has_real = true;
                    } else if !t.references(self, guard) {
                        return false;
                    }
                }
                has_real
            }
            _ => true,
        }
    }

    /// Whether this type's alias graph reaches `other`.
    pub fn references(&self, other: &Type, guard: &mut RecursionGuard) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        match self {
            Type::Alias(alias) => {
                if !guard.enter(&alias.name, other as *const Type as usize) {
                    return false;
                }
                let result = alias
                    .resolved_type()
                    .map(|resolved| resolved.references(other, guard))
                    .unwrap_or(false);
                guard.leave(&alias.name, other as *const Type as usize);
                result
            }
            Type::Variant(types) => types.iter().any(|t| t.references(other, guard)),
            _ => false,
        }
    }

    /// Whether a value is an instance of this type.
    pub fn is_instance(&self, value: &crate::value::Value, guard: &mut RecursionGuard) -> bool {
        instance::is_instance(self, value, guard)
    }

    /// Whether every instance of `other` is an instance of this type.
    pub fn is_assignable(&self, other: &Type, guard: &mut RecursionGuard) -> bool {
        assignable::is_assignable(self, other, guard)
    }

    /// The type with value-specific parameters erased.
    pub fn generalize(&self) -> Type {
        inference::generalize(self)
    }

    /// Write the type, expanding the first level of aliases when asked.
    pub fn write(&self, f: &mut fmt::Formatter<'_>, expand: bool) -> fmt::Result {
        display::write_type(self, f, expand)
    }
}

/// Whether a (capitalized) name denotes a built-in type.
pub fn is_builtin_name(name: &str) -> bool {
    Type::find_builtin(name).is_some()
}

/// Capitalize a lowercased resource type name: `foo::bar` -> `Foo::Bar`.
pub fn capitalize_type_name(name: &str) -> std::string::String {
    name.split("::")
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => std::string::String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("::")
}

/// Parse a resource reference string like `File[/tmp/x]` into a
/// `(lowercased type name, title)` pair.
pub fn parse_resource_reference(text: &str) -> Option<(std::string::String, std::string::String)> {
    let open = text.find('[')?;
    if !text.ends_with(']') {
        return None;
    }
    let name = text[..open].trim();
    let valid = !name.is_empty()
        && name.split("::").all(|segment| {
            let mut chars = segment.chars();
            chars
                .next()
                .map(|c| c.is_ascii_alphabetic())
                .unwrap_or(false)
                && chars.all(|c| c.is_alphanumeric() || c == '_')
        });
    if !valid {
        return None;
    }
    let mut title = text[open + 1..text.len() - 1].trim();
    // Titles may be quoted in reference strings.
    if (title.starts_with('\'') && title.ends_with('\'') && title.len() >= 2)
        || (title.starts_with('"') && title.ends_with('"') && title.len() >= 2)
    {
        title = &title[1..title.len() - 1];
    }
    if title.is_empty() {
        return None;
    }
    Some((name.to_lowercase(), title.to_string()))
}

// Equality and hashing go through the canonical rendering: Display is
// deterministic and injective on type structure, and aliases render (and
// therefore compare) by name, which keeps cyclic aliases from recursing.
impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_string().hash(state);
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        display::write_type(self, f, false)
    }
}

mod display {
    use super::*;

    fn write_size(
        f: &mut fmt::Formatter<'_>,
        lead: bool,
        from: &Option<usize>,
        to: &Option<usize>,
    ) -> fmt::Result {
        if from.is_none() && to.is_none() {
            return Ok(());
        }
        if lead {
            write!(f, ", ")?;
        }
        match from {
            Some(from) => write!(f, "{}", from)?,
            None => write!(f, "default")?,
        }
        if let Some(to) = to {
            write!(f, ", {}", to)?;
        }
        Ok(())
    }

    pub(super) fn write_type(t: &Type, f: &mut fmt::Formatter<'_>, expand: bool) -> fmt::Result {
        match t {
            Type::Any => write!(f, "Any"),
            Type::Undef => write!(f, "Undef"),
            Type::Default => write!(f, "Default"),
            Type::Boolean => write!(f, "Boolean"),
            Type::Integer { from, to } => {
                if from.is_none() && to.is_none() {
                    return write!(f, "Integer");
                }
                write!(f, "Integer[")?;
                match from {
                    Some(from) => write!(f, "{}", from)?,
                    None => write!(f, "default")?,
                }
                if let Some(to) = to {
                    write!(f, ", {}", to)?;
                }
                write!(f, "]")
            }
            Type::Float { from, to } => {
                if from.is_none() && to.is_none() {
                    return write!(f, "Float");
                }
                write!(f, "Float[")?;
                match from {
                    Some(from) => write_float(f, *from)?,
                    None => write!(f, "default")?,
                }
                if let Some(to) = to {
                    write!(f, ", ")?;
                    write_float(f, *to)?;
                }
                write!(f, "]")
            }
            Type::String { from, to } => {
                if from.is_none() && to.is_none() {
                    return write!(f, "String");
                }
                write!(f, "String[")?;
                write_size(f, false, from, to)?;
                write!(f, "]")
            }
            Type::Regexp { pattern } => match pattern {
                Some(pattern) => write!(f, "Regexp[{}]", pattern),
                None => write!(f, "Regexp"),
            },
            Type::Pattern(patterns) => {
                if patterns.is_empty() {
                    return write!(f, "Pattern");
                }
                write!(f, "Pattern[")?;
                for (i, pattern) in patterns.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", pattern)?;
                }
                write!(f, "]")
            }
            Type::Enum(values) => {
                if values.is_empty() {
                    return write!(f, "Enum");
                }
                write!(f, "Enum[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{}'", value)?;
                }
                write!(f, "]")
            }
            Type::Numeric => write!(f, "Numeric"),
            Type::Scalar => write!(f, "Scalar"),
            Type::Data => write!(f, "Data"),
            Type::Collection { from, to } => {
                if from.is_none() && to.is_none() {
                    return write!(f, "Collection");
                }
                write!(f, "Collection[")?;
                write_size(f, false, from, to)?;
                write!(f, "]")
            }
            Type::Array { element, from, to } => {
                if matches!(element.as_ref(), Type::Data) && from.is_none() && to.is_none() {
                    return write!(f, "Array");
                }
                write!(f, "Array[")?;
                write_type(element, f, expand)?;
                write_size(f, true, from, to)?;
                write!(f, "]")
            }
            Type::Hash {
                key,
                value,
                from,
                to,
            } => {
                if matches!(key.as_ref(), Type::Scalar)
                    && matches!(value.as_ref(), Type::Data)
                    && from.is_none()
                    && to.is_none()
                {
                    return write!(f, "Hash");
                }
                write!(f, "Hash[")?;
                write_type(key, f, expand)?;
                write!(f, ", ")?;
                write_type(value, f, expand)?;
                write_size(f, true, from, to)?;
                write!(f, "]")
            }
            Type::Tuple { types, from, to } => {
                if types.is_empty() && from.is_none() && to.is_none() {
                    return write!(f, "Tuple");
                }
                write!(f, "Tuple[")?;
                for (i, t) in types.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write_type(t, f, expand)?;
                }
                write_size(f, !types.is_empty(), from, to)?;
                write!(f, "]")
            }
            Type::Struct(fields) => {
                if fields.is_empty() {
                    return write!(f, "Struct");
                }
                write!(f, "Struct[{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if field.optional {
                        write!(f, "Optional['{}'] => ", field.key)?;
                    } else {
                        write!(f, "'{}' => ", field.key)?;
                    }
                    write_type(&field.value, f, expand)?;
                }
                write!(f, "}}]")
            }
            Type::Variant(types) => {
                if types.is_empty() {
                    return write!(f, "Variant");
                }
                write!(f, "Variant[")?;
                for (i, t) in types.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write_type(t, f, expand)?;
                }
                write!(f, "]")
            }
            Type::Optional(inner) => match inner {
                Some(inner) => {
                    write!(f, "Optional[")?;
                    write_type(inner, f, expand)?;
                    write!(f, "]")
                }
                None => write!(f, "Optional"),
            },
            Type::NotUndef(inner) => match inner {
                Some(inner) => {
                    write!(f, "NotUndef[")?;
                    write_type(inner, f, expand)?;
                    write!(f, "]")
                }
                None => write!(f, "NotUndef"),
            },
            Type::Callable {
                types,
                min,
                max,
                block,
            } => {
                if types.is_empty() && min.is_none() && max.is_none() && block.is_none() {
                    return write!(f, "Callable");
                }
                write!(f, "Callable[")?;
                let mut first = true;
                for t in types {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write_type(t, f, expand)?;
                }
                if min.is_some() || max.is_some() {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    match min {
                        Some(min) => write!(f, "{}", min)?,
                        None => write!(f, "default")?,
                    }
                    if let Some(max) = max {
                        write!(f, ", {}", max)?;
                    }
                }
                if let Some(block) = block {
                    if !first {
                        write!(f, ", ")?;
                    }
                    write_type(block, f, expand)?;
                }
                write!(f, "]")
            }
            Type::Resource { type_name, title } => match (type_name, title) {
                (None, _) => write!(f, "Resource"),
                (Some(name), None) => write!(f, "{}", capitalize_type_name(name)),
                (Some(name), Some(title)) => {
                    write!(f, "{}[{}]", capitalize_type_name(name), title)
                }
            },
            Type::Class { name } => match name {
                Some(name) => write!(f, "Class[{}]", name),
                None => write!(f, "Class"),
            },
            Type::Type(inner) => match inner {
                Some(inner) => {
                    write!(f, "Type[")?;
                    write_type(inner, f, expand)?;
                    write!(f, "]")
                }
                None => write!(f, "Type"),
            },
            Type::Iterable(inner) => match inner {
                Some(inner) => {
                    write!(f, "Iterable[")?;
                    write_type(inner, f, expand)?;
                    write!(f, "]")
                }
                None => write!(f, "Iterable"),
            },
            Type::Iterator(inner) => match inner {
                Some(inner) => {
                    write!(f, "Iterator[")?;
                    write_type(inner, f, expand)?;
                    write!(f, "]")
                }
                None => write!(f, "Iterator"),
            },
            Type::Alias(alias) => {
                if expand {
                    if let Some(resolved) = alias.resolved_type() {
                        write!(f, "{} = ", alias.name)?;
                        // Expand only one level; nested aliases print by
                        // name.
                        return write_type(resolved, f, false);
                    }
                }
                write!(f, "{}", alias.name)
            }
            Type::Runtime { runtime, type_name } => match (runtime, type_name) {
                (None, _) => write!(f, "Runtime"),
                (Some(runtime), None) => write!(f, "Runtime['{}']", runtime),
                (Some(runtime), Some(type_name)) => {
                    write!(f, "Runtime['{}', '{}']", runtime, type_name)
                }
            },
            Type::CatalogEntry => write!(f, "CatalogEntry"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        assert_eq!(Type::integer().to_string(), "Integer");
        assert_eq!(
            Type::Integer {
                from: Some(1),
                to: Some(5)
            }
            .to_string(),
            "Integer[1, 5]"
        );
        assert_eq!(
            Type::Integer {
                from: None,
                to: Some(5)
            }
            .to_string(),
            "Integer[default, 5]"
        );
        assert_eq!(
            Type::Float {
                from: Some(2.0),
                to: Some(2.0)
            }
            .to_string(),
            "Float[2.0, 2.0]"
        );
        assert_eq!(Type::array().to_string(), "Array");
        assert_eq!(
            Type::Array {
                element: Box::new(Type::Scalar),
                from: Some(3),
                to: Some(3)
            }
            .to_string(),
            "Array[Scalar, 3, 3]"
        );
        assert_eq!(
            Type::Resource {
                type_name: Some("file".into()),
                title: Some("/tmp/x".into())
            }
            .to_string(),
            "File[/tmp/x]"
        );
        assert_eq!(
            Type::Enum(vec!["a".into(), "b".into()]).to_string(),
            "Enum['a', 'b']"
        );
    }

    #[test]
    fn equality_is_structural() {
        assert_eq!(Type::integer(), Type::integer());
        assert_ne!(
            Type::Integer {
                from: Some(0),
                to: None
            },
            Type::integer()
        );
        assert_eq!(
            Type::Array {
                element: Box::new(Type::string()),
                from: None,
                to: None
            },
            Type::Array {
                element: Box::new(Type::string()),
                from: None,
                to: None
            }
        );
    }

    #[test]
    fn aliases_compare_by_name() {
        let a = AliasType::new("MyAlias");
        let b = AliasType::new("MyAlias");
        a.resolve(Type::integer());
        assert_eq!(Type::Alias(a), Type::Alias(b));
    }

    #[test]
    fn builtin_lookup() {
        assert!(is_builtin_name("String"));
        assert!(is_builtin_name("CatalogEntry"));
        assert!(!is_builtin_name("Port"));
    }

    #[test]
    fn capitalization() {
        assert_eq!(capitalize_type_name("file"), "File");
        assert_eq!(capitalize_type_name("foo::bar_baz"), "Foo::Bar_baz");
    }

    #[test]
    fn resource_reference_parsing() {
        assert_eq!(
            parse_resource_reference("File[/tmp/x]"),
            Some(("file".to_string(), "/tmp/x".to_string()))
        );
        assert_eq!(
            parse_resource_reference("Foo::Bar['title']"),
            Some(("foo::bar".to_string(), "title".to_string()))
        );
        assert_eq!(parse_resource_reference("not a reference"), None);
        assert_eq!(parse_resource_reference("[oops]"), None);
    }

    #[test]
    fn cyclic_alias_is_not_real() {
        let alias = AliasType::new("Selfish");
        let t = Type::Alias(alias.clone());
        alias.resolve(Type::Alias(alias.clone()));
        let mut guard = RecursionGuard::new();
        assert!(!t.is_real(&mut guard));
    }

    #[test]
    fn variant_with_real_arm_is_real() {
        let alias = AliasType::new("Tree");
        let t = Type::Alias(alias.clone());
        alias.resolve(Type::Variant(vec![
            Type::integer(),
            Type::Array {
                element: Box::new(Type::Alias(alias.clone())),
                from: None,
                to: None,
            },
        ]));
        let mut guard = RecursionGuard::new();
        assert!(t.is_real(&mut guard));
    }
}
