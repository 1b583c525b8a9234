//! Introspection of bracket-style format strings (`"{name!r:>10}"`)
//!
//! The scanner follows the usual replacement-field grammar:
//! `{field_name!conversion:format_spec}`, with `{{` and `}}` as escaped braces and
//! further fields allowed inside the format spec (`"{val:{width}}"`).
//!
//! ```rust
//! use gap_bolts::bormat::{get_format_args, infer_positional_format_args, ArgType};
//!
//! assert_eq!(
//!     infer_positional_format_args("{} is {:d} years old{}"),
//!     "{0} is {1:d} years old{2}"
//! );
//!
//! let args = get_format_args("{greeting}, {0}!").unwrap();
//! assert_eq!(args.keyword, vec![("greeting".to_string(), ArgType::Str)]);
//! assert_eq!(args.positional, vec![(0, ArgType::Str)]);
//! ```

use std::{collections::HashSet, fmt};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum FormatError {
    #[error("Single '{{' encountered in format string")]
    SingleOpen,
    #[error("Single '}}' encountered in format string")]
    SingleClose,
    #[error("expected '}}' before end of string")]
    Unterminated,
    #[error("unexpected '{{' in field name")]
    OpenInFieldName,
    #[error("end of string while looking for conversion specifier")]
    MissingConversion,
    #[error("expected ':' after conversion specifier")]
    ExpectedSpecAfterConversion,
    #[error("encountered compound format arg: {0:?}")]
    CompoundArg(String),
    #[error("encountered anonymous positional argument")]
    AnonymousPositional,
    #[error("positional index out of range: {0}")]
    IndexTooLarge(String),
}

// ------------ SCANNER -------------

/// A replacement field as written, before any interpretation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawField {
    pub name: String,
    pub spec: String,
    pub conversion: Option<char>,
}

/// Literal text followed by at most one field.
///
/// An escaped brace ends its chunk: `"a{{b"` scans as `("a{", None), ("b", None)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatChunk {
    pub literal: String,
    pub field: Option<RawField>,
}

pub fn parse_format_str(fstr: &str) -> Result<Vec<FormatChunk>, FormatError> {
    let mut chunks = Vec::new();
    let mut rest = fstr;

    while !rest.is_empty() {
        let Some(idx) = rest.find(['{', '}']) else {
            chunks.push(FormatChunk {
                literal: rest.to_string(),
                field: None,
            });
            break;
        };

        let brace = rest.as_bytes()[idx];
        let after = &rest[idx + 1..];

        // escaped brace: keep one, end the chunk
        if after.as_bytes().first() == Some(&brace) {
            chunks.push(FormatChunk {
                literal: rest[..=idx].to_string(),
                field: None,
            });
            rest = &after[1..];
            continue;
        }
        if brace == b'}' {
            return Err(FormatError::SingleClose);
        }
        if after.is_empty() {
            return Err(FormatError::SingleOpen);
        }

        let end = field_end(after).ok_or(FormatError::Unterminated)?;
        chunks.push(FormatChunk {
            literal: rest[..idx].to_string(),
            field: Some(parse_field(&after[..end])?),
        });
        rest = &after[end + 1..];
    }

    Ok(chunks)
}

/// Index of the '}' closing a field whose text starts at `s`
fn field_end(s: &str) -> Option<usize> {
    let mut depth = 1usize;
    for (i, b) in s.bytes().enumerate() {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_field(field: &str) -> Result<RawField, FormatError> {
    let bytes = field.as_bytes();
    let mut i = 0;
    let mut stop = None;

    while i < bytes.len() {
        match bytes[i] {
            b'{' => return Err(FormatError::OpenInFieldName),
            // an index may contain ':' and '!'
            b'[' => {
                i = bytes[i..]
                    .iter()
                    .position(|&b| b == b']')
                    .map_or(bytes.len(), |p| i + p + 1);
                continue;
            }
            b @ (b':' | b'!') => {
                stop = Some(b);
                break;
            }
            _ => {}
        }
        i += 1;
    }

    let name = field[..i].to_string();
    let (spec, conversion) = match stop {
        None => (String::new(), None),
        Some(b':') => (field[i + 1..].to_string(), None),
        Some(_) => {
            let mut tail = field[i + 1..].chars();
            let conv = tail.next().ok_or(FormatError::MissingConversion)?;
            let spec = match tail.as_str().strip_prefix(':') {
                Some(spec) => spec,
                None if tail.as_str().is_empty() => "",
                None => return Err(FormatError::ExpectedSpecAfterConversion),
            };
            (spec.to_string(), Some(conv))
        }
    };

    Ok(RawField {
        name,
        spec,
        conversion,
    })
}

// ------------ FIELD -------------

/// Value type implied by the last character of a format spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgType {
    Int,
    Float,
    Str,
}

impl ArgType {
    /// `n` is valid for both integers and floats; it is read as [`ArgType::Int`].
    pub fn from_type_char(type_char: Option<char>) -> ArgType {
        match type_char {
            Some('b' | 'c' | 'd' | 'o' | 'x' | 'X' | 'n') => ArgType::Int,
            Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') => ArgType::Float,
            _ => ArgType::Str,
        }
    }
}

/// Rebuild the text of a field: `{name!conv:spec}`. No name means no field, so `""`.
pub fn construct_format_field_str(fname: Option<&str>, fspec: &str, conv: Option<char>) -> String {
    let Some(fname) = fname else {
        return String::new();
    };

    let mut ret = String::with_capacity(fname.len() + fspec.len() + 5);
    ret.push('{');
    ret.push_str(fname);
    if let Some(conv) = conv {
        ret.push('!');
        ret.push(conv);
    }
    if !fspec.is_empty() {
        ret.push(':');
        ret.push_str(fspec);
    }
    ret.push('}');
    ret
}

/// One replacement field and what can be read off of it.
///
/// `"{user.addr[0]!r:>10}"` has base name `user`, subpath `["addr", "0]"]` (split on
/// `.` and `[`, dropping the separators), conversion `r` and spec `>10`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatField {
    fname: String,
    base_name: String,
    subpath: Vec<String>,
    is_positional: bool,
    fspec: String,
    subfields: Vec<String>,
    type_char: Option<char>,
    arg_type: ArgType,
    conv: Option<char>,
}

impl FormatField {
    pub fn new(fname: &str, fspec: &str, conv: Option<char>) -> Result<Self, FormatError> {
        let mut field = FormatField {
            fname: String::new(),
            base_name: String::new(),
            subpath: Vec::new(),
            is_positional: true,
            fspec: String::new(),
            subfields: Vec::new(),
            type_char: None,
            arg_type: ArgType::Str,
            conv: None,
        };
        field.set_fname(fname);
        field.set_fspec(fspec)?;
        field.set_conv(conv);
        Ok(field)
    }

    pub fn set_fname(&mut self, fname: &str) {
        let mut path = fname.split(['.', '[']);
        self.base_name = path.next().unwrap_or_default().to_string();
        self.subpath = path.map(str::to_string).collect();
        self.is_positional = self.base_name.chars().all(|c| c.is_ascii_digit());
        self.fname = fname.to_string();
    }

    /// Fails if fields nested in the spec are malformed
    pub fn set_fspec(&mut self, fspec: &str) -> Result<(), FormatError> {
        self.subfields = parse_format_str(fspec)?
            .into_iter()
            .filter_map(|chunk| chunk.field.map(|f| f.name))
            .collect();
        self.type_char = fspec.chars().last();
        self.arg_type = ArgType::from_type_char(self.type_char);
        self.fspec = fspec.to_string();
        Ok(())
    }

    pub fn set_conv(&mut self, conv: Option<char>) {
        self.conv = conv;
    }

    pub fn fname(&self) -> &str {
        &self.fname
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn subpath(&self) -> &[String] {
        &self.subpath
    }

    /// Empty or all-digit base name
    pub fn is_positional(&self) -> bool {
        self.is_positional
    }

    pub fn fspec(&self) -> &str {
        &self.fspec
    }

    /// Names of the fields nested in the spec
    pub fn subfields(&self) -> &[String] {
        &self.subfields
    }

    pub fn type_char(&self) -> Option<char> {
        self.type_char
    }

    pub fn arg_type(&self) -> ArgType {
        self.arg_type
    }

    /// The conversion character as written.
    /// Conversions are recorded and written back out but never applied to values.
    pub fn conv(&self) -> Option<char> {
        self.conv
    }

    pub fn fstr(&self) -> String {
        construct_format_field_str(Some(&self.fname), &self.fspec, self.conv)
    }
}

impl TryFrom<RawField> for FormatField {
    type Error = FormatError;

    fn try_from(raw: RawField) -> Result<Self, Self::Error> {
        FormatField::new(&raw.name, &raw.spec, raw.conversion)
    }
}

impl fmt::Display for FormatField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fstr())
    }
}

// ------------ TOKENS -------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatToken {
    /// Unescaped text
    Literal(String),
    Field(FormatField),
}

impl fmt::Display for FormatToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatToken::Literal(lit) => {
                for c in lit.chars() {
                    match c {
                        '{' => f.write_str("{{")?,
                        '}' => f.write_str("}}")?,
                        c => write!(f, "{c}")?,
                    }
                }
                Ok(())
            }
            FormatToken::Field(field) => field.fmt(f),
        }
    }
}

/// Split into literal and field tokens, numbering anonymous fields first if `resolve_pos`.
pub fn tokenize_format_str(fstr: &str, resolve_pos: bool) -> Result<Vec<FormatToken>, FormatError> {
    let inferred;
    let fstr = if resolve_pos {
        inferred = infer_positional_format_args(fstr);
        inferred.as_str()
    } else {
        fstr
    };

    let mut ret = Vec::new();
    for chunk in parse_format_str(fstr)? {
        if !chunk.literal.is_empty() {
            ret.push(FormatToken::Literal(chunk.literal));
        }
        if let Some(field) = chunk.field {
            ret.push(FormatToken::Field(field.try_into()?));
        }
    }
    Ok(ret)
}

/// Format string equivalent to the one `tokens` came from
pub fn join_tokens(tokens: &[FormatToken]) -> String {
    tokens.iter().map(ToString::to_string).collect()
}

/// Literal text paired with the rebuilt text of the field after it, if any
pub fn split_format_str(fstr: &str) -> Result<Vec<(String, Option<String>)>, FormatError> {
    Ok(parse_format_str(fstr)?
        .into_iter()
        .map(|chunk| {
            let field = chunk
                .field
                .map(|f| construct_format_field_str(Some(&f.name), &f.spec, f.conversion));
            (chunk.literal, field)
        })
        .collect())
}

// ------------ ARGUMENTS -------------

/// Number anonymous fields (`{}`, `{:d}`, `{!r}`, `{.attr}`, `{[0]}`) from 0, left to right.
///
/// Escaped braces are left alone and explicitly named or numbered fields are untouched,
/// so running this on its own output changes nothing.
pub fn infer_positional_format_args(fstr: &str) -> String {
    let bytes = fstr.as_bytes();
    let mut ret = String::with_capacity(fstr.len() + 8);
    let mut max_anon = 0usize;
    let mut prev_end = 0;
    let mut i = 0;

    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'{', b'{') | (b'}', b'}') => i += 2,
            (b'{', next @ (b':' | b'!' | b'.' | b'[' | b'}')) => {
                ret.push_str(&fstr[prev_end..i]);
                ret.push('{');
                ret.push_str(&max_anon.to_string());
                ret.push(next as char);
                max_anon += 1;
                i += 2;
                prev_end = i;
            }
            _ => i += 1,
        }
    }
    ret.push_str(&fstr[prev_end..]);
    ret
}

/// Top-level arguments a format string refers to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatArgs {
    pub positional: Vec<(usize, ArgType)>,
    pub keyword: Vec<(String, ArgType)>,
}

impl FormatArgs {
    fn add(
        &mut self,
        seen: &mut HashSet<String>,
        name: &str,
        arg_type: ArgType,
    ) -> Result<(), FormatError> {
        if !seen.insert(name.to_string()) {
            return Ok(());
        }
        if !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()) {
            let idx = name
                .parse()
                .map_err(|_| FormatError::IndexTooLarge(name.to_string()))?;
            self.positional.push((idx, arg_type));
        } else {
            self.keyword.push((name.to_string(), arg_type));
        }
        Ok(())
    }
}

/// Collect the arguments referenced by `fstr`, each once, in order of first use.
///
/// Only plain names and indices are accepted: `{a.b}` and `{a[0]}` fail with
/// [`FormatError::CompoundArg`], `{}` with [`FormatError::AnonymousPositional`].
/// Fields nested in a spec are collected too, typed as [`ArgType::Str`]. Their names are
/// recorded as written, so `{v:{a.b}}` yields the keyword `a.b`; only an anonymous nested
/// field is rejected.
pub fn get_format_args(fstr: &str) -> Result<FormatArgs, FormatError> {
    let mut args = FormatArgs::default();
    let mut seen = HashSet::new();

    for chunk in parse_format_str(fstr)? {
        let Some(field) = chunk.field else {
            continue;
        };
        check_arg_name(&field.name)?;
        let arg_type = ArgType::from_type_char(field.spec.chars().last());
        args.add(&mut seen, &field.name, arg_type)?;

        for sub in parse_format_str(&field.spec)? {
            if let Some(subfield) = sub.field {
                if subfield.name.is_empty() {
                    return Err(FormatError::AnonymousPositional);
                }
                args.add(&mut seen, &subfield.name, ArgType::Str)?;
            }
        }
    }
    Ok(args)
}

fn check_arg_name(name: &str) -> Result<(), FormatError> {
    if name.contains(['.', '[']) {
        return Err(FormatError::CompoundArg(name.to_string()));
    }
    if name.is_empty() {
        return Err(FormatError::AnonymousPositional);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn raw(name: &str, spec: &str, conversion: Option<char>) -> Option<RawField> {
        Some(RawField {
            name: name.to_string(),
            spec: spec.to_string(),
            conversion,
        })
    }

    fn chunk(literal: &str, field: Option<RawField>) -> FormatChunk {
        FormatChunk {
            literal: literal.to_string(),
            field,
        }
    }

    #[test]
    fn scans_literals_and_fields() {
        assert_eq!(parse_format_str("").unwrap(), vec![]);
        assert_eq!(parse_format_str("plain").unwrap(), vec![chunk("plain", None)]);
        assert_eq!(
            parse_format_str("{greeting}, {0!r:>5}!").unwrap(),
            vec![
                chunk("", raw("greeting", "", None)),
                chunk(", ", raw("0", ">5", Some('r'))),
                chunk("!", None),
            ]
        );
    }

    #[test]
    fn escaped_braces_end_chunks() {
        assert_eq!(
            parse_format_str("a{{b}}c{d}").unwrap(),
            vec![
                chunk("a{", None),
                chunk("b}", None),
                chunk("c", raw("d", "", None)),
            ]
        );
    }

    #[test]
    fn nested_spec_and_index() {
        assert_eq!(
            parse_format_str("{val:{width}.{prec}f}").unwrap(),
            vec![chunk("", raw("val", "{width}.{prec}f", None))]
        );
        assert_eq!(
            parse_format_str("{a[x:y]!s}").unwrap(),
            vec![chunk("", raw("a[x:y]", "", Some('s')))]
        );
        assert_eq!(
            parse_format_str("{0!r}").unwrap(),
            vec![chunk("", raw("0", "", Some('r')))]
        );
    }

    #[test]
    fn scanner_errors() {
        assert_eq!(parse_format_str("a}b"), Err(FormatError::SingleClose));
        assert_eq!(parse_format_str("a{"), Err(FormatError::SingleOpen));
        assert_eq!(parse_format_str("{a"), Err(FormatError::Unterminated));
        assert_eq!(parse_format_str("{a{b}}"), Err(FormatError::OpenInFieldName));
        assert_eq!(parse_format_str("{a!}"), Err(FormatError::MissingConversion));
        assert_eq!(
            parse_format_str("{a!rs}"),
            Err(FormatError::ExpectedSpecAfterConversion)
        );
    }

    #[test]
    fn field_parts() {
        let field = FormatField::new("user.addr[0]", ">10", Some('r')).unwrap();
        assert_eq!(field.base_name(), "user");
        assert_eq!(field.subpath(), ["addr", "0]"]);
        assert!(!field.is_positional());
        assert_eq!(field.type_char(), Some('0'));
        assert_eq!(field.arg_type(), ArgType::Str);
        assert_eq!(field.to_string(), "{user.addr[0]!r:>10}");

        let field = FormatField::new("12", ".2f", None).unwrap();
        assert!(field.is_positional());
        assert_eq!(field.arg_type(), ArgType::Float);

        let field = FormatField::new("", "", None).unwrap();
        assert!(field.is_positional());
        assert_eq!(field.type_char(), None);
        assert_eq!(field.fstr(), "{}");
    }

    #[test]
    fn field_setters_recompute() {
        let mut field = FormatField::new("x", "d", None).unwrap();
        assert_eq!(field.arg_type(), ArgType::Int);

        field.set_fspec("{width}.{prec}e").unwrap();
        assert_eq!(field.subfields(), ["width", "prec"]);
        assert_eq!(field.arg_type(), ArgType::Float);

        field.set_fname("3.real");
        assert_eq!(field.base_name(), "3");
        assert!(field.is_positional());

        field.set_conv(Some('s'));
        assert_eq!(field.fstr(), "{3.real!s:{width}.{prec}e}");
        assert!(field.set_fspec("{").is_err());
    }

    #[test]
    fn type_chars() {
        assert_eq!(ArgType::from_type_char(Some('x')), ArgType::Int);
        assert_eq!(ArgType::from_type_char(Some('n')), ArgType::Int);
        assert_eq!(ArgType::from_type_char(Some('%')), ArgType::Float);
        assert_eq!(ArgType::from_type_char(Some('s')), ArgType::Str);
        assert_eq!(ArgType::from_type_char(None), ArgType::Str);
    }

    #[test]
    fn construct_field_str() {
        assert_eq!(construct_format_field_str(None, "d", Some('r')), "");
        assert_eq!(construct_format_field_str(Some("a"), "", None), "{a}");
        assert_eq!(construct_format_field_str(Some("a"), "d", Some('r')), "{a!r:d}");
    }

    #[test]
    fn field_str_round_trips() {
        for (name, spec, conv) in [
            ("name", "", None),
            ("0", ">10", Some('r')),
            ("a.b[c]", "{w}", Some('s')),
            ("x", "!:", None),
        ] {
            let fstr = construct_format_field_str(Some(name), spec, conv);
            let chunks = parse_format_str(&fstr).unwrap();
            assert_eq!(chunks, vec![chunk("", raw(name, spec, conv))]);

            let field: FormatField = chunks[0].field.clone().unwrap().try_into().unwrap();
            assert_eq!(field.fstr(), fstr);
        }
    }

    #[test]
    fn infers_positional() {
        assert_eq!(
            infer_positional_format_args("{} is {:d} years old{}"),
            "{0} is {1:d} years old{2}"
        );
        assert_eq!(
            infer_positional_format_args("{{}} {!r} {.x} {[0]} {name} {}"),
            "{{}} {0!r} {1.x} {2[0]} {name} {3}"
        );
        assert_eq!(infer_positional_format_args("no fields"), "no fields");
        assert_eq!(infer_positional_format_args("tail {"), "tail {");
    }

    #[test]
    fn inference_is_idempotent() {
        for fstr in ["{} is {:d} years old{}", "{{{}}}", "{a:{}} {}", "é{}ü{:x}"] {
            let once = infer_positional_format_args(fstr);
            assert_eq!(infer_positional_format_args(&once), once);
        }
        assert_eq!(infer_positional_format_args("é{}ü{:x}"), "é{0}ü{1:x}");
    }

    #[test]
    fn tokenizes() {
        let tokens = tokenize_format_str("Hi {}, {{x}} is {val:>{w}d}", true).unwrap();
        assert_eq!(tokens.len(), 6);
        assert_eq!(tokens[0], FormatToken::Literal("Hi ".to_string()));
        let FormatToken::Field(first) = &tokens[1] else {
            panic!("expected field, got {:?}", tokens[1]);
        };
        assert_eq!(first.fname(), "0");
        assert_eq!(tokens[2], FormatToken::Literal(", {".to_string()));
        assert_eq!(tokens[3], FormatToken::Literal("x}".to_string()));
        let FormatToken::Field(last) = &tokens[5] else {
            panic!("expected field, got {:?}", tokens[5]);
        };
        assert_eq!(last.subfields(), ["w"]);
        assert_eq!(last.arg_type(), ArgType::Int);

        assert_eq!(join_tokens(&tokens), "Hi {0}, {{x}} is {val:>{w}d}");
    }

    #[test]
    fn tokenizes_without_resolving() {
        let tokens = tokenize_format_str("{}{}", false).unwrap();
        assert_eq!(join_tokens(&tokens), "{}{}");
        assert!(tokens.iter().all(|t| matches!(t, FormatToken::Field(f) if f.is_positional())));
    }

    #[test]
    fn splits() {
        assert_eq!(
            split_format_str("a{b!r}c{{").unwrap(),
            vec![
                ("a".to_string(), Some("{b!r}".to_string())),
                ("c{".to_string(), None),
            ]
        );
    }

    #[test]
    fn referenced_args() {
        let args = get_format_args("{greeting}, {0}!").unwrap();
        assert_eq!(args.keyword, vec![("greeting".to_string(), ArgType::Str)]);
        assert_eq!(args.positional, vec![(0, ArgType::Str)]);

        let args = get_format_args("{x:d} {y:.2f} {x} {1:{width}} {1}").unwrap();
        assert_eq!(
            args.keyword,
            vec![
                ("x".to_string(), ArgType::Int),
                ("y".to_string(), ArgType::Float),
                ("width".to_string(), ArgType::Str),
            ]
        );
        assert_eq!(args.positional, vec![(1, ArgType::Str)]);
    }

    #[test]
    fn referenced_args_rejects() {
        assert_eq!(
            get_format_args("{a.b}"),
            Err(FormatError::CompoundArg("a.b".to_string()))
        );
        assert_eq!(
            get_format_args("{a[0]}"),
            Err(FormatError::CompoundArg("a[0]".to_string()))
        );
        assert_eq!(get_format_args("{}"), Err(FormatError::AnonymousPositional));
        assert_eq!(get_format_args("{a:{}}"), Err(FormatError::AnonymousPositional));
        assert_eq!(get_format_args("}"), Err(FormatError::SingleClose));
    }

    #[test]
    fn nested_names_recorded_as_written() {
        let args = get_format_args("{v:{a.b}} {w:{c[0]}>{2}}").unwrap();
        assert_eq!(
            args.keyword,
            vec![
                ("v".to_string(), ArgType::Str),
                ("a.b".to_string(), ArgType::Str),
                ("w".to_string(), ArgType::Str),
                ("c[0]".to_string(), ArgType::Str),
            ]
        );
        assert_eq!(args.positional, vec![(2, ArgType::Str)]);
    }

    #[test]
    fn oversized_index_is_positional() {
        let huge = "18446744073709551616";
        assert!(FormatField::new(huge, "", None).unwrap().is_positional());
        assert_eq!(
            get_format_args(&format!("{{{huge}}}")),
            Err(FormatError::IndexTooLarge(huge.to_string()))
        );
        assert_eq!(
            get_format_args(&format!("{{x:{{{huge}}}}}")),
            Err(FormatError::IndexTooLarge(huge.to_string()))
        );
        assert_eq!(
            get_format_args("{007}").unwrap().positional,
            vec![(7, ArgType::Str)]
        );
    }
}
