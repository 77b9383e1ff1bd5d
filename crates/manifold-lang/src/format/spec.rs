//! Format specifications: `%<flags><width>.<precision><type>` and the
//! descriptor-hash form.

use crate::error::ConversionError;
use crate::types::{infer, Type};
use crate::value::{Value, ValueHash};

/// Container delimiters selected by a flag character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContainerStart {
    /// No flag given: the value kind's natural delimiters.
    #[default]
    Unspecified,
    /// The space flag: no delimiters at all.
    None,
    /// An explicit `[`, `{`, `<`, `(`, or `|`.
    Char(char),
}

/// A parsed format.
#[derive(Debug, Clone)]
pub struct Format {
    pub use_space: bool,
    pub alternative: bool,
    pub show_sign: bool,
    pub left_justify: bool,
    pub zero_pad: bool,
    pub container_start: ContainerStart,
    /// Minimum field width; 0 means unspecified.
    pub width: usize,
    /// Maximum precision; `None` means unspecified.
    pub precision: Option<usize>,
    /// The conversion letter.
    pub type_char: char,
    pub element_separator: String,
    pub key_value_separator: String,
    /// Per-element formats for containers.
    pub element_formats: Option<Box<super::FormatMap>>,
}

impl Default for Format {
    fn default() -> Self {
        Self {
            use_space: false,
            alternative: false,
            show_sign: false,
            left_justify: false,
            zero_pad: false,
            container_start: ContainerStart::Unspecified,
            width: 0,
            precision: None,
            type_char: 's',
            element_separator: ", ".to_string(),
            key_value_separator: " => ".to_string(),
            element_formats: None,
        }
    }
}

fn error(message: impl Into<String>) -> ConversionError {
    ConversionError::new(message)
}

impl Format {
    /// Parse a `%...` specification string.
    pub fn parse(specification: &str) -> Result<Self, ConversionError> {
        let mut format = Format::default();
        format.parse_specification(specification)?;
        Ok(format)
    }

    /// Build a format from a descriptor hash with the keys `format`,
    /// `separator`, `separator2`, and `string_formats`.
    pub fn from_hash(specification: &ValueHash) -> Result<Self, ConversionError> {
        let mut format = Format::default();
        for (key, value) in specification.iter() {
            let Some(name) = key.as_string() else {
                return Err(error(format!(
                    "expected String for hash key but found {}.",
                    infer(key)
                )));
            };
            match name {
                "format" => {
                    let text = expect_string(value, "format")?;
                    format.parse_specification(&text)?;
                }
                "separator" => {
                    format.element_separator = expect_string(value, "separator")?;
                }
                "separator2" => {
                    format.key_value_separator = expect_string(value, "separator2")?;
                }
                "string_formats" => match value.as_hash() {
                    Some(hash) => {
                        format.element_formats =
                            Some(Box::new(super::FormatMap::from_hash(hash, false)?));
                    }
                    None => {
                        return Err(error(format!(
                            "expected Hash for 'string_formats' attribute but found {}.",
                            infer(value)
                        )))
                    }
                },
                other => {
                    return Err(error(format!("unsupported format hash key '{}'.", other)));
                }
            }
        }
        Ok(format)
    }

    /// Look up the format for a container element.
    pub fn find_element_format(&self, value: &Value) -> Option<&Format> {
        self.element_formats
            .as_ref()
            .and_then(|map| map.find_format(value))
    }

    fn parse_specification(&mut self, specification: &str) -> Result<(), ConversionError> {
        let invalid = || {
            error(format!(
                "'{}' is not a valid format string in the form of '%<flags><width>.<precision><format>'.",
                specification
            ))
        };

        let rest = specification.strip_prefix('%').ok_or_else(invalid)?;
        let bytes = rest.as_bytes();
        let mut i = 0;

        // Flags.
        while i < bytes.len() {
            let c = bytes[i] as char;
            match c {
                ' ' => {
                    if self.use_space {
                        return Err(error("the '<space>' flag can only be specified once."));
                    }
                    self.use_space = true;
                    if self.container_start == ContainerStart::Unspecified {
                        self.container_start = ContainerStart::None;
                    }
                }
                '+' => {
                    if self.show_sign {
                        return Err(error("the '+' flag can only be specified once."));
                    }
                    self.show_sign = true;
                }
                '-' => {
                    if self.left_justify {
                        return Err(error("the '-' flag can only be specified once."));
                    }
                    self.left_justify = true;
                }
                '#' => {
                    if self.alternative {
                        return Err(error("the '#' flag can only be specified once."));
                    }
                    self.alternative = true;
                }
                '0' => {
                    if self.zero_pad {
                        return Err(error("the '0' flag can only be specified once."));
                    }
                    self.zero_pad = true;
                }
                '[' | '{' | '<' | '(' | '|' => {
                    if matches!(self.container_start, ContainerStart::Char(_)) {
                        return Err(error(
                            "the '[', '{', '<', '(', and '|' flags can only be specified once.",
                        ));
                    }
                    self.container_start = ContainerStart::Char(c);
                }
                _ => break,
            }
            i += 1;
        }

        // Width: a nonzero-leading digit run.
        if i < bytes.len() && bytes[i].is_ascii_digit() && bytes[i] != b'0' {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            self.width = rest[start..i]
                .parse()
                .map_err(|_| error("format width is out of range."))?;
        }

        // Precision.
        if i < bytes.len() && bytes[i] == b'.' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if start == i {
                return Err(invalid());
            }
            self.precision = Some(
                rest[start..i]
                    .parse()
                    .map_err(|_| error("format precision is out of range."))?,
            );
        }

        // Exactly one conversion letter must remain.
        let remaining = &rest[i..];
        let mut chars = remaining.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphabetic() => {
                self.type_char = c;
                Ok(())
            }
            _ => Err(invalid()),
        }
    }

    /// The close delimiter matching a container start character.
    pub fn container_end(start: char) -> char {
        match start {
            '[' => ']',
            '{' => '}',
            '<' => '>',
            '(' => ')',
            _ => start,
        }
    }
}

fn expect_string(value: &Value, attribute: &str) -> Result<String, ConversionError> {
    value
        .as_string()
        .map(|s| s.to_string())
        .ok_or_else(|| {
            error(format!(
                "expected {} for '{}' attribute but found {}.",
                Type::string(),
                attribute,
                infer(value)
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_specification() {
        let format = Format::parse("%d").unwrap();
        assert_eq!(format.type_char, 'd');
        assert_eq!(format.width, 0);
        assert_eq!(format.precision, None);
    }

    #[test]
    fn flags_width_precision() {
        let format = Format::parse("%+-08.3f").unwrap();
        assert!(format.show_sign);
        assert!(format.left_justify);
        assert!(format.zero_pad);
        assert_eq!(format.width, 8);
        assert_eq!(format.precision, Some(3));
        assert_eq!(format.type_char, 'f');
    }

    #[test]
    fn container_flags() {
        let format = Format::parse("%(a").unwrap();
        assert_eq!(format.container_start, ContainerStart::Char('('));
        let format = Format::parse("% a").unwrap();
        assert_eq!(format.container_start, ContainerStart::None);
    }

    #[test]
    fn invalid_specifications() {
        assert!(Format::parse("d").is_err());
        assert!(Format::parse("%").is_err());
        assert!(Format::parse("%5").is_err());
        assert!(Format::parse("%dd").is_err());
        assert!(Format::parse("%++d").is_err());
    }

    #[test]
    fn descriptor_hash() {
        let mut hash = ValueHash::new();
        hash.insert(Value::string("format"), Value::string("%a"));
        hash.insert(Value::string("separator"), Value::string(";"));
        let format = Format::from_hash(&hash).unwrap();
        assert_eq!(format.type_char, 'a');
        assert_eq!(format.element_separator, ";");

        let mut bad = ValueHash::new();
        bad.insert(Value::string("frmt"), Value::string("%a"));
        assert!(Format::from_hash(&bad).is_err());
    }
}
