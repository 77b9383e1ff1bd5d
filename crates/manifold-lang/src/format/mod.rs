//! Printf-style value formatting over type-keyed format maps.
//!
//! # Design
//!
//! - `Format` — one parsed `%` directive (or descriptor hash)
//! - `FormatMap` — ordered `(Type, Format)` pairs, most specific first
//! - `format_value` — renders one value through a map
//! - `sprintf` — renders a printf string with multiple directives
//!
//! Conversion letters follow the conventional tables; the documented edge
//! cases: integer `%c` converts to a Unicode code point or errors, float
//! `%g` switches to scientific form when the exponent is below -4 or at
//! least the precision, negative integers in non-decimal bases render as
//! masked two's-complement with a `..<digit>` prefix, and `%s` on
//! non-strings re-enters the formatter with `%p` (quoting when the
//! alternative flag is set).

mod map;
mod spec;

pub use map::FormatMap;
pub use spec::{ContainerStart, Format};

use crate::error::ConversionError;
use crate::value::{write_float, Value};
use std::fmt::Write;

/// Render a value using the best matching format in the map.
pub fn format_value(value: &Value, map: &FormatMap) -> Result<String, ConversionError> {
    let mut out = String::new();
    write_value(&mut out, value, map.find_format(value), false)?;
    Ok(out)
}

/// Render a printf-style format string: literal text, `%%`, and one
/// directive per argument.
pub fn sprintf(format: &str, arguments: &[Value]) -> Result<String, ConversionError> {
    let mut out = String::new();
    let mut argument_index = 0;
    let bytes = format.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'%' {
            let c = format[i..].chars().next().expect("in-bounds character");
            out.push(c);
            i += c.len_utf8();
            continue;
        }
        if bytes.get(i + 1) == Some(&b'%') {
            out.push('%');
            i += 2;
            continue;
        }
        let end = directive_end(format, i).ok_or_else(|| {
            ConversionError::new(format!(
                "'{}' contains an incomplete format directive.",
                format
            ))
        })?;
        let directive = Format::parse(&format[i..end])?;
        let Some(argument) = arguments.get(argument_index) else {
            return Err(ConversionError::new(format!(
                "expected at least {} arguments for format string '{}' but was given {}.",
                argument_index + 1,
                format,
                arguments.len()
            )));
        };
        argument_index += 1;
        write_value(&mut out, argument, Some(&directive), false)?;
        i = end;
    }
    Ok(out)
}

/// Byte offset just past the conversion letter of the directive starting
/// at `start` (which indexes a `%`).
fn directive_end(format: &str, start: usize) -> Option<usize> {
    let bytes = format.as_bytes();
    let mut i = start + 1;
    while i < bytes.len() && matches!(bytes[i], b' ' | b'+' | b'-' | b'#' | b'0' | b'[' | b'{' | b'<' | b'(' | b'|')
    {
        i += 1;
    }
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < bytes.len() && bytes[i].is_ascii_alphabetic() {
        return Some(i + 1);
    }
    None
}

struct Fx<'a> {
    format: Option<&'a Format>,
    default_programmatic: bool,
}

impl<'a> Fx<'a> {
    fn type_char(&self, natural: Option<char>) -> char {
        if let Some(format) = self.format {
            return format.type_char;
        }
        if let Some(natural) = natural {
            return natural;
        }
        if self.default_programmatic {
            'p'
        } else {
            's'
        }
    }

    fn alternative(&self) -> bool {
        self.format.map(|f| f.alternative).unwrap_or(false)
    }

    fn show_sign(&self) -> bool {
        self.format.map(|f| f.show_sign).unwrap_or(false)
    }

    fn use_space(&self) -> bool {
        self.format.map(|f| f.use_space).unwrap_or(false)
    }

    fn left_justify(&self) -> bool {
        self.format.map(|f| f.left_justify).unwrap_or(false)
    }

    fn zero_pad(&self) -> bool {
        self.format.map(|f| f.zero_pad).unwrap_or(false)
    }

    fn width(&self) -> usize {
        self.format.map(|f| f.width).unwrap_or(0)
    }

    fn precision(&self) -> Option<usize> {
        self.format.and_then(|f| f.precision)
    }

    fn unsupported(&self, type_char: char, kind: &str) -> ConversionError {
        ConversionError::new(format!(
            "unsupported format '{}' for {}.",
            type_char, kind
        ))
    }

    /// Pad a string body to the field width, truncating to the precision.
    fn pad(&self, out: &mut String, body: &str) {
        let body = match self.precision() {
            Some(precision) => {
                let end = body
                    .char_indices()
                    .nth(precision)
                    .map(|(i, _)| i)
                    .unwrap_or(body.len());
                &body[..end]
            }
            None => body,
        };
        let length = body.chars().count();
        let width = self.width();
        if width <= length {
            out.push_str(body);
            return;
        }
        let fill = if self.zero_pad() && !self.left_justify() {
            '0'
        } else {
            ' '
        };
        if self.left_justify() {
            out.push_str(body);
            for _ in 0..width - length {
                out.push(' ');
            }
        } else {
            for _ in 0..width - length {
                out.push(fill);
            }
            out.push_str(body);
        }
    }

    /// Pad a numeric body, keeping any sign ahead of zero padding.
    fn pad_number(&self, out: &mut String, sign: &str, body: &str) {
        let length = sign.chars().count() + body.chars().count();
        let width = self.width();
        if width <= length {
            out.push_str(sign);
            out.push_str(body);
            return;
        }
        if self.left_justify() {
            out.push_str(sign);
            out.push_str(body);
            for _ in 0..width - length {
                out.push(' ');
            }
        } else if self.zero_pad() {
            out.push_str(sign);
            for _ in 0..width - length {
                out.push('0');
            }
            out.push_str(body);
        } else {
            for _ in 0..width - length {
                out.push(' ');
            }
            out.push_str(sign);
            out.push_str(body);
        }
    }
}

fn write_value(
    out: &mut String,
    value: &Value,
    format: Option<&Format>,
    default_programmatic: bool,
) -> Result<(), ConversionError> {
    let fx = Fx {
        format,
        default_programmatic,
    };
    match value.dereference() {
        Value::Undef => write_undef(out, &fx),
        Value::Default => write_defaulted(out, &fx),
        Value::Boolean(b) => write_boolean(out, *b, &fx),
        Value::Integer(i) => write_integer(out, *i, &fx),
        Value::Float(f) => write_double(out, *f, &fx),
        Value::String(s) => write_string(out, s, &fx),
        Value::Regex(regex) => {
            let type_char = fx.type_char(None);
            match type_char {
                'p' => fx.pad(out, &format!("/{}/", regex.pattern())),
                's' => {
                    if fx.alternative() {
                        fx.pad(out, &format!("\"{}\"", regex.pattern()));
                    } else {
                        fx.pad(out, &format!("/{}/", regex.pattern()));
                    }
                }
                other => return Err(fx.unsupported(other, "Regexp")),
            }
            Ok(())
        }
        Value::Type(t) => {
            let type_char = fx.type_char(None);
            match type_char {
                'p' => fx.pad(out, &t.to_string()),
                's' => {
                    if fx.alternative() {
                        fx.pad(out, &format!("\"{}\"", t));
                    } else {
                        fx.pad(out, &t.to_string());
                    }
                }
                other => return Err(fx.unsupported(other, "Type")),
            }
            Ok(())
        }
        Value::Array(elements) => write_array(out, elements, &fx),
        Value::Hash(hash) => write_hash(out, hash, &fx),
        Value::Iterator(iterator) => {
            let materialized = iterator
                .to_array()
                .map_err(ConversionError::new)?;
            write_array(out, &materialized, &fx)
        }
        Value::Variable(_) => unreachable!("dereferenced"),
    }
}

fn write_undef(out: &mut String, fx: &Fx<'_>) -> Result<(), ConversionError> {
    let body = match fx.type_char(None) {
        'n' => {
            if fx.alternative() {
                "null"
            } else {
                "nil"
            }
        }
        'u' => {
            if fx.alternative() {
                "undefined"
            } else {
                "undef"
            }
        }
        'd' | 'x' | 'X' | 'o' | 'b' | 'B' | 'e' | 'E' | 'f' | 'g' | 'G' | 'a' | 'A' => "NaN",
        'v' => "n/a",
        'V' => "N/A",
        's' => {
            if fx.alternative() {
                "\"\""
            } else {
                ""
            }
        }
        'p' => {
            if fx.alternative() {
                "\"undef\""
            } else {
                "undef"
            }
        }
        other => return Err(fx.unsupported(other, "Undef")),
    };
    fx.pad(out, body);
    Ok(())
}

fn write_defaulted(out: &mut String, fx: &Fx<'_>) -> Result<(), ConversionError> {
    let body = match fx.type_char(None) {
        'd' | 's' | 'p' => {
            if fx.alternative() {
                "\"default\""
            } else {
                "default"
            }
        }
        'D' => {
            if fx.alternative() {
                "\"Default\""
            } else {
                "Default"
            }
        }
        other => return Err(fx.unsupported(other, "Default")),
    };
    fx.pad(out, body);
    Ok(())
}

fn write_boolean(out: &mut String, value: bool, fx: &Fx<'_>) -> Result<(), ConversionError> {
    let body = match fx.type_char(None) {
        't' => match (fx.alternative(), value) {
            (true, true) => "t",
            (true, false) => "f",
            (false, true) => "true",
            (false, false) => "false",
        },
        'T' => match (fx.alternative(), value) {
            (true, true) => "T",
            (true, false) => "F",
            (false, true) => "True",
            (false, false) => "False",
        },
        'y' => match (fx.alternative(), value) {
            (true, true) => "y",
            (true, false) => "n",
            (false, true) => "yes",
            (false, false) => "no",
        },
        'Y' => match (fx.alternative(), value) {
            (true, true) => "Y",
            (true, false) => "N",
            (false, true) => "Yes",
            (false, false) => "No",
        },
        'd' | 'x' | 'X' | 'o' | 'b' | 'B' => {
            return write_integer(out, if value { 1 } else { 0 }, fx)
        }
        'e' | 'E' | 'f' | 'g' | 'G' | 'a' | 'A' => {
            return write_double(out, if value { 1.0 } else { 0.0 }, fx)
        }
        's' | 'p' => {
            if value {
                "true"
            } else {
                "false"
            }
        }
        other => return Err(fx.unsupported(other, "Boolean")),
    };
    fx.pad(out, body);
    Ok(())
}

fn integer_sign(value_negative: bool, fx: &Fx<'_>) -> &'static str {
    if value_negative {
        "-"
    } else if fx.show_sign() {
        "+"
    } else if fx.use_space() {
        " "
    } else {
        ""
    }
}

fn write_integer(out: &mut String, value: i64, fx: &Fx<'_>) -> Result<(), ConversionError> {
    let type_char = fx.type_char(Some('d'));
    match type_char {
        'd' | 'p' => {
            let body = value.unsigned_abs().to_string();
            fx.pad_number(out, integer_sign(value < 0, fx), &body);
        }
        'x' | 'X' | 'o' | 'b' | 'B' => {
            let (base, prefix, upper) = match type_char {
                'x' => (16, "0x", false),
                'X' => (16, "0X", true),
                'o' => (8, "0", false),
                'b' => (2, "0b", false),
                _ => (2, "0B", false),
            };
            let mut body = String::new();
            if fx.alternative() {
                body.push_str(prefix);
            }
            if value >= 0 || fx.show_sign() {
                let digits = to_base(value.unsigned_abs() as u128, base);
                body.push_str(&if upper { digits.to_uppercase() } else { digits });
                fx.pad_number(out, integer_sign(value < 0, fx), &body);
            } else {
                // Masked two's complement: `..` stands for the infinite
                // run of leading all-ones digits.
                body.push_str("..");
                let digits = masked_complement(value, base);
                body.push_str(&if upper { digits.to_uppercase() } else { digits });
                fx.pad_number(out, "", &body);
            }
        }
        'e' | 'E' | 'f' | 'g' | 'G' | 'a' | 'A' => {
            return write_double(out, value as f64, fx);
        }
        'c' => {
            if !(0..=0x10FFFF).contains(&value) {
                return Err(ConversionError::new(format!(
                    "numeric value '{}' exceeds the range of a Unicode code point.",
                    value
                )));
            }
            let c = char::from_u32(value as u32).ok_or_else(|| {
                ConversionError::new(format!(
                    "numeric value '{}' is not a valid Unicode code point.",
                    value
                ))
            })?;
            fx.pad(out, &c.to_string());
        }
        's' => {
            let mut body = String::new();
            if fx.alternative() {
                body.push('"');
            }
            let _ = write!(body, "{}", value);
            if fx.alternative() {
                body.push('"');
            }
            fx.pad(out, &body);
        }
        other => return Err(fx.unsupported(other, "Integer")),
    }
    Ok(())
}

fn to_base(mut value: u128, base: u32) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        let digit = (value % base as u128) as u32;
        digits.push(std::char::from_digit(digit, base).expect("digit in base"));
        value /= base as u128;
    }
    digits.iter().rev().collect()
}

/// The significant digits of a negative value's infinite two's-complement
/// expansion, including one leading all-ones digit.
fn masked_complement(value: i64, base: u32) -> String {
    debug_assert!(value < 0);
    let digit_count: u32 = match base {
        2 => 64,
        8 => 22,
        16 => 16,
        _ => unreachable!("unsupported base"),
    };
    let modulus = (base as u128).pow(digit_count);
    let complement = (modulus as i128 + value as i128) as u128;
    let digits = to_base(complement, base);
    let ones = std::char::from_digit(base - 1, base).expect("all-ones digit");
    let significant = digits
        .char_indices()
        .find(|(_, c)| *c != ones)
        .map(|(i, _)| i)
        .unwrap_or(digits.len());
    // Keep one all-ones digit ahead of the first differing digit.
    let start = significant.saturating_sub(1);
    digits[start..].to_string()
}

fn requires_exponential_form(value: f64, precision: Option<usize>) -> bool {
    // The exponent is 1 + log10(|value|) truncated toward zero as a whole,
    // which differs from flooring the log for magnitudes just under 0.1.
    let exponent = if value == 0.0 {
        0
    } else {
        (1.0 + value.abs().log10()) as i64
    };
    exponent < -4
        || precision
            .map(|precision| exponent >= precision as i64)
            .unwrap_or(false)
}

fn scientific(value: f64, precision: usize, uppercase: bool) -> String {
    let rendered = format!("{:.*e}", precision, value);
    let (mantissa, exponent) = rendered
        .split_once('e')
        .expect("exponential rendering contains 'e'");
    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent),
    };
    let e = if uppercase { 'E' } else { 'e' };
    format!("{}{}{}{:0>2}", mantissa, e, sign, digits)
}

fn hex_float(value: f64, uppercase: bool) -> String {
    let rendered = if value == 0.0 {
        "0x0p+0".to_string()
    } else {
        let bits = value.to_bits();
        let exponent = ((bits >> 52) & 0x7ff) as i64;
        let mantissa = bits & 0xf_ffff_ffff_ffff;
        let mut fraction = format!("{:013x}", mantissa);
        while fraction.ends_with('0') {
            fraction.pop();
        }
        if exponent == 0 {
            // Subnormal.
            format!("0x0.{}p-1022", fraction)
        } else if fraction.is_empty() {
            format!("0x1p{:+}", exponent - 1023)
        } else {
            format!("0x1.{}p{:+}", fraction, exponent - 1023)
        }
    };
    if uppercase {
        rendered.to_uppercase()
    } else {
        rendered
    }
}

fn write_double(out: &mut String, value: f64, fx: &Fx<'_>) -> Result<(), ConversionError> {
    let type_char = fx.type_char(Some('f'));
    let sign = integer_sign(value.is_sign_negative() && value != 0.0, fx);
    match type_char {
        'd' | 'x' | 'X' | 'o' | 'b' | 'B' => {
            return write_integer(out, value as i64, fx);
        }
        'e' | 'E' => {
            let body = scientific(
                value.abs(),
                fx.precision().unwrap_or(6),
                type_char == 'E',
            );
            fx.pad_number(out, sign, &body);
        }
        'f' => {
            let body = format!("{:.*}", fx.precision().unwrap_or(6), value.abs());
            fx.pad_number(out, sign, &body);
        }
        'g' | 'G' => {
            let body = if requires_exponential_form(value, fx.precision()) {
                scientific(value.abs(), fx.precision().unwrap_or(6), type_char == 'G')
            } else {
                format!("{:.*}", fx.precision().unwrap_or(6), value.abs())
            };
            fx.pad_number(out, sign, &body);
        }
        'a' | 'A' => {
            let body = hex_float(value.abs(), type_char == 'A');
            fx.pad_number(out, sign, &body);
        }
        'p' => {
            let mut body = String::new();
            let _ = write!(body, "{}", FloatDisplay(value));
            fx.pad(out, &body);
        }
        's' => {
            let mut body = String::new();
            if fx.alternative() {
                body.push('"');
            }
            let _ = write!(body, "{}", FloatDisplay(value));
            if fx.alternative() {
                body.push('"');
            }
            fx.pad(out, &body);
        }
        other => return Err(fx.unsupported(other, "Float")),
    }
    Ok(())
}

// Adapter so `write_float` (a Formatter-based helper) renders into
// format strings.
struct FloatDisplay(f64);

impl std::fmt::Display for FloatDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write_float(f, self.0)
    }
}

/// Double-quote and escape a string (`%p` rendering).
fn quote_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' => out.push_str("\\$"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{{{:X}}}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn write_string(out: &mut String, value: &str, fx: &Fx<'_>) -> Result<(), ConversionError> {
    let quote_if_alternative = |body: String| {
        if fx.alternative() {
            quote_string(&body)
        } else {
            body
        }
    };
    let body = match fx.type_char(None) {
        's' => quote_if_alternative(value.to_string()),
        'p' => quote_string(value),
        'c' => {
            let mut chars = value.chars();
            let capitalized = match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            };
            quote_if_alternative(capitalized)
        }
        'C' => {
            // Capitalize each :: segment, the way resource type names are
            // normalized.
            let segments: Vec<String> = value
                .to_lowercase()
                .split("::")
                .map(|segment| {
                    let mut chars = segment.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars).collect(),
                        None => String::new(),
                    }
                })
                .collect();
            quote_if_alternative(segments.join("::"))
        }
        'u' => quote_if_alternative(value.to_uppercase()),
        'd' => quote_if_alternative(value.to_lowercase()),
        't' => quote_if_alternative(value.trim().to_string()),
        other => return Err(fx.unsupported(other, "String")),
    };
    fx.pad(out, &body);
    Ok(())
}

fn container_delimiters(fx: &Fx<'_>, natural: (char, char)) -> Option<(char, char)> {
    match fx.format.map(|f| f.container_start) {
        None | Some(ContainerStart::Unspecified) => Some(natural),
        Some(ContainerStart::None) => None,
        Some(ContainerStart::Char(open)) => Some((open, Format::container_end(open))),
    }
}

fn write_array(out: &mut String, elements: &[Value], fx: &Fx<'_>) -> Result<(), ConversionError> {
    match fx.type_char(Some('a')) {
        'a' | 's' | 'p' => {}
        other => return Err(fx.unsupported(other, "Array")),
    }
    let separator = fx
        .format
        .map(|f| f.element_separator.as_str())
        .unwrap_or(", ");
    let mut body = String::new();
    let delimiters = container_delimiters(fx, ('[', ']'));
    if let Some((open, _)) = delimiters {
        body.push(open);
    }
    for (i, element) in elements.iter().enumerate() {
        if i > 0 {
            body.push_str(separator);
        }
        let element_format = fx.format.and_then(|f| f.find_element_format(element));
        write_value(&mut body, element, element_format, true)?;
    }
    if let Some((_, close)) = delimiters {
        body.push(close);
    }
    fx.pad(out, &body);
    Ok(())
}

fn write_hash(
    out: &mut String,
    hash: &crate::value::ValueHash,
    fx: &Fx<'_>,
) -> Result<(), ConversionError> {
    match fx.type_char(Some('h')) {
        'h' | 'a' | 's' | 'p' => {}
        other => return Err(fx.unsupported(other, "Hash")),
    }
    let separator = fx
        .format
        .map(|f| f.element_separator.as_str())
        .unwrap_or(", ");
    let key_value_separator = fx
        .format
        .map(|f| f.key_value_separator.as_str())
        .unwrap_or(" => ");
    let mut body = String::new();
    let delimiters = container_delimiters(fx, ('{', '}'));
    if let Some((open, _)) = delimiters {
        body.push(open);
    }
    for (i, (key, value)) in hash.iter().enumerate() {
        if i > 0 {
            body.push_str(separator);
        }
        let key_format = fx.format.and_then(|f| f.find_element_format(key));
        write_value(&mut body, key, key_format, true)?;
        body.push_str(key_value_separator);
        let value_format = fx.format.and_then(|f| f.find_element_format(value));
        write_value(&mut body, value, value_format, true)?;
    }
    if let Some((_, close)) = delimiters {
        body.push(close);
    }
    fx.pad(out, &body);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueHash;

    fn render(value: &Value, specification: &str) -> String {
        let map = FormatMap::from_string(specification).expect("valid specification");
        format_value(value, &map).expect("formatting should succeed")
    }

    fn render_err(value: &Value, specification: &str) -> ConversionError {
        let map = FormatMap::from_string(specification).expect("valid specification");
        format_value(value, &map).expect_err("formatting should fail")
    }

    #[test]
    fn integer_bases() {
        assert_eq!(render(&Value::Integer(255), "%d"), "255");
        assert_eq!(render(&Value::Integer(255), "%x"), "ff");
        assert_eq!(render(&Value::Integer(255), "%X"), "FF");
        assert_eq!(render(&Value::Integer(255), "%#x"), "0xff");
        assert_eq!(render(&Value::Integer(8), "%o"), "10");
        assert_eq!(render(&Value::Integer(5), "%b"), "101");
    }

    #[test]
    fn integer_padding_and_signs() {
        assert_eq!(render(&Value::Integer(42), "%5d"), "   42");
        assert_eq!(render(&Value::Integer(42), "%-5d"), "42   ");
        assert_eq!(render(&Value::Integer(42), "%05d"), "00042");
        assert_eq!(render(&Value::Integer(-42), "%05d"), "-0042");
        assert_eq!(render(&Value::Integer(42), "%+d"), "+42");
        assert_eq!(render(&Value::Integer(42), "% d"), " 42");
    }

    #[test]
    fn negative_binary_is_masked_complement() {
        assert_eq!(render(&Value::Integer(-1), "%b"), "..1");
        assert_eq!(render(&Value::Integer(-10), "%b"), "..10110");
        assert_eq!(render(&Value::Integer(-10), "%x"), "..f6");
        assert_eq!(render(&Value::Integer(-16), "%x"), "..f0");
        assert_eq!(render(&Value::Integer(-10), "%#x"), "0x..f6");
    }

    #[test]
    fn integer_code_point() {
        assert_eq!(render(&Value::Integer(0x263A), "%c"), "\u{263A}");
        let error = render_err(&Value::Integer(0x7FFFFFFFFF), "%c");
        assert!(error.message.contains("exceeds the range"));
    }

    #[test]
    fn integer_s_reenters_with_p() {
        assert_eq!(render(&Value::Integer(7), "%s"), "7");
        assert_eq!(render(&Value::Integer(7), "%#s"), "\"7\"");
    }

    #[test]
    fn float_conversions() {
        assert_eq!(render(&Value::Float(2.5), "%f"), "2.500000");
        assert_eq!(render(&Value::Float(2.5), "%.2f"), "2.50");
        assert_eq!(render(&Value::Float(250.0), "%.2e"), "2.50e+02");
        assert_eq!(render(&Value::Float(0.000001), "%g"), "1.000000e-06");
        // 1 + log10(3e-6) truncates toward zero to -4, which is not below
        // the -4 threshold, so the form stays fixed.
        assert_eq!(render(&Value::Float(0.000003), "%g"), "0.000003");
        assert_eq!(render(&Value::Float(2.5), "%.3g"), "2.500");
        assert_eq!(render(&Value::Float(-2.5), "%.1f"), "-2.5");
    }

    #[test]
    fn float_hex_form() {
        assert_eq!(render(&Value::Float(1.0), "%a"), "0x1p+0");
        assert_eq!(render(&Value::Float(2.5), "%a"), "0x1.4p+1");
    }

    #[test]
    fn boolean_conversions() {
        assert_eq!(render(&Value::Boolean(true), "%t"), "true");
        assert_eq!(render(&Value::Boolean(true), "%#t"), "t");
        assert_eq!(render(&Value::Boolean(false), "%Y"), "No");
        assert_eq!(render(&Value::Boolean(true), "%d"), "1");
        assert_eq!(render(&Value::Boolean(false), "%s"), "false");
    }

    #[test]
    fn string_conversions() {
        assert_eq!(render(&Value::string("hello"), "%s"), "hello");
        assert_eq!(render(&Value::string("hello"), "%p"), "\"hello\"");
        assert_eq!(render(&Value::string("a\nb"), "%p"), "\"a\\nb\"");
        assert_eq!(render(&Value::string("wORLD"), "%c"), "World");
        assert_eq!(render(&Value::string("foo::bar"), "%C"), "Foo::Bar");
        assert_eq!(render(&Value::string("up"), "%u"), "UP");
        assert_eq!(render(&Value::string("DOWN"), "%d"), "down");
        assert_eq!(render(&Value::string("  x  "), "%t"), "x");
        assert_eq!(render(&Value::string("long"), "%.2s"), "lo");
        assert_eq!(render(&Value::string("hi"), "%5s"), "   hi");
    }

    #[test]
    fn undef_conversions() {
        assert_eq!(render(&Value::Undef, "%s"), "");
        assert_eq!(render(&Value::Undef, "%#s"), "\"\"");
        assert_eq!(render(&Value::Undef, "%p"), "undef");
        assert_eq!(render(&Value::Undef, "%n"), "nil");
        assert_eq!(render(&Value::Undef, "%#u"), "undefined");
        assert_eq!(render(&Value::Undef, "%d"), "NaN");
        assert_eq!(render(&Value::Undef, "%v"), "n/a");
    }

    #[test]
    fn array_rendering() {
        let array = Value::Array(vec![
            Value::Integer(1),
            Value::string("two"),
            Value::Boolean(true),
        ]);
        assert_eq!(render(&array, "%a"), "[1, \"two\", true]");
        assert_eq!(render(&array, "%(a"), "(1, \"two\", true)");
        assert_eq!(render(&array, "% a"), "1, \"two\", true");
    }

    #[test]
    fn hash_rendering() {
        let mut hash = ValueHash::new();
        hash.insert(Value::string("a"), Value::Integer(1));
        hash.insert(Value::string("b"), Value::Integer(2));
        let value = Value::Hash(hash);
        assert_eq!(render(&value, "%h"), "{\"a\" => 1, \"b\" => 2}");
    }

    #[test]
    fn unsupported_conversions_error() {
        assert!(render_err(&Value::string("x"), "%x").message.contains("unsupported"));
        assert!(render_err(&Value::Boolean(true), "%c").message.contains("unsupported"));
    }

    #[test]
    fn formatting_is_deterministic() {
        let value = Value::Array(vec![Value::Integer(-3), Value::Float(0.5)]);
        let first = render(&value, "%a");
        let second = render(&value, "%a");
        assert_eq!(first, second);
    }

    #[test]
    fn sprintf_multiple_directives() {
        let result = sprintf(
            "%s has %d items (%.1f%%)",
            &[
                Value::string("cart"),
                Value::Integer(3),
                Value::Float(99.5),
            ],
        )
        .unwrap();
        assert_eq!(result, "cart has 3 items (99.5%)");
    }

    #[test]
    fn sprintf_argument_shortfall() {
        let error = sprintf("%d %d", &[Value::Integer(1)]).expect_err("missing argument");
        assert!(error.message.contains("expected at least 2 arguments"));
    }
}
