//! Parsing of the `.npy` header: a Python dict literal whose `descr` entry is
//! a (possibly nested) structured dtype.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// The subset of Python literal syntax numpy writes into headers.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Bool(bool),
    None,
    List(Vec<Literal>),
    Tuple(Vec<Literal>),
    Dict(BTreeMap<String, Literal>),
}

pub fn parse_literal(text: &str) -> Result<Literal, String> {
    let mut parser = LiteralParser {
        chars: text.as_bytes(),
        pos: 0,
    };
    let value = parser.value()?;
    parser.skip_ws();
    if parser.pos != parser.chars.len() {
        return Err(format!("trailing characters at offset {}", parser.pos));
    }
    Ok(value)
}

struct LiteralParser<'a> {
    chars: &'a [u8],
    pos: usize,
}

impl LiteralParser<'_> {
    fn skip_ws(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.chars.get(self.pos).copied()
    }

    fn expect(&mut self, c: u8) -> Result<(), String> {
        match self.peek() {
            Some(got) if got == c => {
                self.pos += 1;
                Ok(())
            }
            Some(got) => Err(format!(
                "expected '{}' at offset {}, found '{}'",
                c as char, self.pos, got as char
            )),
            None => Err(format!("expected '{}', found end of header", c as char)),
        }
    }

    fn value(&mut self) -> Result<Literal, String> {
        match self.peek() {
            Some(b'\'') | Some(b'"') => self.string().map(Literal::Str),
            Some(b'[') => self.sequence(b'[', b']').map(Literal::List),
            Some(b'(') => self.sequence(b'(', b')').map(Literal::Tuple),
            Some(b'{') => self.dict(),
            Some(c) if c == b'-' || c.is_ascii_digit() => self.int(),
            Some(c) if c.is_ascii_alphabetic() => self.word(),
            Some(c) => Err(format!("unexpected '{}' at offset {}", c as char, self.pos)),
            None => Err("unexpected end of header".to_string()),
        }
    }

    fn string(&mut self) -> Result<String, String> {
        let quote = self.chars[self.pos];
        self.pos += 1;
        let start = self.pos;
        while self.pos < self.chars.len() && self.chars[self.pos] != quote {
            self.pos += 1;
        }
        if self.pos >= self.chars.len() {
            return Err("unterminated string".to_string());
        }
        let s = String::from_utf8_lossy(&self.chars[start..self.pos]).into_owned();
        self.pos += 1;
        Ok(s)
    }

    fn int(&mut self) -> Result<Literal, String> {
        let start = self.pos;
        if self.chars[self.pos] == b'-' {
            self.pos += 1;
        }
        while self.pos < self.chars.len() && self.chars[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        // numpy writes shapes such as `(10L,)` on old Python 2 files
        if self.pos < self.chars.len() && self.chars[self.pos] == b'L' {
            self.pos += 1;
        }
        let digits = std::str::from_utf8(&self.chars[start..self.pos])
            .map_err(|e| e.to_string())?
            .trim_end_matches('L');
        digits
            .parse()
            .map(Literal::Int)
            .map_err(|e| format!("bad integer '{}': {}", digits, e))
    }

    fn word(&mut self) -> Result<Literal, String> {
        let start = self.pos;
        while self.pos < self.chars.len() && self.chars[self.pos].is_ascii_alphanumeric() {
            self.pos += 1;
        }
        match &self.chars[start..self.pos] {
            b"True" => Ok(Literal::Bool(true)),
            b"False" => Ok(Literal::Bool(false)),
            b"None" => Ok(Literal::None),
            other => Err(format!("unknown name '{}'", String::from_utf8_lossy(other))),
        }
    }

    fn sequence(&mut self, open: u8, close: u8) -> Result<Vec<Literal>, String> {
        self.expect(open)?;
        let mut items = Vec::new();
        loop {
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(items);
            }
            items.push(self.value()?);
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(c) if c == close => {}
                _ => return Err(format!("expected ',' or '{}' at offset {}", close as char, self.pos)),
            }
        }
    }

    fn dict(&mut self) -> Result<Literal, String> {
        self.expect(b'{')?;
        let mut map = BTreeMap::new();
        loop {
            if self.peek() == Some(b'}') {
                self.pos += 1;
                return Ok(Literal::Dict(map));
            }
            let key = match self.value()? {
                Literal::Str(s) => s,
                other => return Err(format!("dict key must be a string, got {:?}", other)),
            };
            self.expect(b':')?;
            let value = self.value()?;
            map.insert(key, value);
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {}
                _ => return Err(format!("expected ',' or '}}' at offset {}", self.pos)),
            }
        }
    }
}

/// Primitive element type, e.g. `<f8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scalar {
    pub big_endian: bool,
    pub kind: char,
    pub size: usize,
}

impl Scalar {
    pub fn parse(typestr: &str) -> Result<Self, String> {
        static TYPESTR: OnceLock<Regex> = OnceLock::new();
        let re = TYPESTR.get_or_init(|| Regex::new(r"^([<>|=]?)([a-zA-Z?])(\d*)$").unwrap());
        let caps = re
            .captures(typestr)
            .ok_or_else(|| format!("unsupported type string '{}'", typestr))?;

        let kind = caps[2].chars().next().unwrap_or('?');
        let count: usize = match &caps[3] {
            "" => 1,
            digits => digits.parse().map_err(|_| format!("bad size in '{}'", typestr))?,
        };
        let size = match kind {
            '?' => 1,
            'U' => 4 * count,
            'f' | 'i' | 'u' | 'b' | 'c' | 'V' | 'S' | 'a' => count,
            other => return Err(format!("unsupported type kind '{}' in '{}'", other, typestr)),
        };
        Ok(Self {
            big_endian: &caps[1] == ">",
            kind,
            size,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Dtype {
    Scalar(Scalar),
    Record(Vec<Field>),
}

/// One named member of a record, laid out at `offset` bytes into the
/// enclosing record. A non-empty `shape` makes it a fixed-size sub-array.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub dtype: Dtype,
    pub shape: Vec<usize>,
    pub offset: usize,
}

impl Field {
    /// Number of elements in the sub-array (1 for plain fields).
    pub fn count(&self) -> usize {
        self.shape.iter().product()
    }
}

impl Dtype {
    pub fn itemsize(&self) -> usize {
        match self {
            Dtype::Scalar(s) => s.size,
            Dtype::Record(fields) => fields
                .iter()
                .map(|f| f.offset + f.count() * f.dtype.itemsize())
                .max()
                .unwrap_or(0),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        match self {
            Dtype::Record(fields) => fields.iter().find(|f| f.name == name),
            Dtype::Scalar(_) => None,
        }
    }

    /// Build a dtype from the literal numpy stores under `descr`.
    pub fn from_descr(descr: &Literal) -> Result<Self, String> {
        match descr {
            Literal::Str(typestr) => Scalar::parse(typestr).map(Dtype::Scalar),
            Literal::List(items) => {
                let mut fields = Vec::with_capacity(items.len());
                let mut offset = 0;
                for item in items {
                    let field = Self::field_from_descr(item, offset)?;
                    offset = field
                        .shape
                        .iter()
                        .try_fold(field.dtype.itemsize(), |size, &dim| size.checked_mul(dim))
                        .and_then(|size| offset.checked_add(size))
                        .ok_or_else(|| format!("field '{}' overflows the record size", field.name))?;
                    fields.push(field);
                }
                Ok(Dtype::Record(fields))
            }
            other => Err(format!("unsupported descr {:?}", other)),
        }
    }

    fn field_from_descr(item: &Literal, offset: usize) -> Result<Field, String> {
        let Literal::Tuple(parts) = item else {
            return Err(format!("field descriptor must be a tuple, got {:?}", item));
        };
        let name = match parts.first() {
            Some(Literal::Str(name)) => name.clone(),
            // (title, name) pairs
            Some(Literal::Tuple(pair)) => match pair.get(1) {
                Some(Literal::Str(name)) => name.clone(),
                _ => return Err("bad titled field name".to_string()),
            },
            _ => return Err(format!("missing field name in {:?}", item)),
        };
        let dtype = parts
            .get(1)
            .ok_or_else(|| format!("missing type for field '{}'", name))
            .and_then(Self::from_descr)?;
        let shape = match parts.get(2) {
            None => Vec::new(),
            Some(Literal::Int(n)) => vec![usize::try_from(*n).map_err(|e| e.to_string())?],
            Some(Literal::Tuple(dims)) => dims
                .iter()
                .map(|d| match d {
                    Literal::Int(n) => usize::try_from(*n).map_err(|e| e.to_string()),
                    other => Err(format!("bad sub-array dimension {:?}", other)),
                })
                .collect::<Result<Vec<usize>, String>>()?,
            Some(other) => return Err(format!("bad shape for field '{}': {:?}", name, other)),
        };
        Ok(Field {
            name,
            dtype,
            shape,
            offset,
        })
    }
}

/// The three keys every `.npy` header carries.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub dtype: Dtype,
    pub fortran_order: bool,
    pub shape: Vec<usize>,
}

impl Header {
    pub fn parse(text: &str) -> Result<Self, String> {
        let Literal::Dict(dict) = parse_literal(text.trim_end_matches(['\n', ' ', '\0']))? else {
            return Err("header is not a dict".to_string());
        };
        let dtype = dict
            .get("descr")
            .ok_or("header has no 'descr'")
            .map_err(str::to_string)
            .and_then(Dtype::from_descr)?;
        let fortran_order = match dict.get("fortran_order") {
            Some(Literal::Bool(b)) => *b,
            _ => return Err("header has no boolean 'fortran_order'".to_string()),
        };
        let shape = match dict.get("shape") {
            Some(Literal::Tuple(dims)) => dims
                .iter()
                .map(|d| match d {
                    Literal::Int(n) => usize::try_from(*n).map_err(|e| e.to_string()),
                    other => Err(format!("bad dimension {:?}", other)),
                })
                .collect::<Result<Vec<usize>, String>>()?,
            _ => return Err("header has no tuple 'shape'".to_string()),
        };
        Ok(Self {
            dtype,
            fortran_order,
            shape,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literals() {
        assert_eq!(parse_literal("'abc'").unwrap(), Literal::Str("abc".into()));
        assert_eq!(parse_literal(" -12 ").unwrap(), Literal::Int(-12));
        assert_eq!(parse_literal("(3,)").unwrap(), Literal::Tuple(vec![Literal::Int(3)]));
        assert_eq!(parse_literal("()").unwrap(), Literal::Tuple(vec![]));
        assert_eq!(
            parse_literal("[True, None]").unwrap(),
            Literal::List(vec![Literal::Bool(true), Literal::None])
        );
        assert!(parse_literal("[1, 2").is_err());
        assert!(parse_literal("{'a': 1} x").is_err());
    }

    #[test]
    fn test_scalar_typestrings() {
        assert_eq!(
            Scalar::parse("<f8").unwrap(),
            Scalar { big_endian: false, kind: 'f', size: 8 }
        );
        assert_eq!(Scalar::parse("?").unwrap().size, 1);
        assert_eq!(Scalar::parse("|V4").unwrap().size, 4);
        assert_eq!(Scalar::parse("<U3").unwrap().size, 12);
        assert!(Scalar::parse(">i4").unwrap().big_endian);
        assert!(Scalar::parse("<M8[ns]").is_err());
    }

    #[test]
    fn test_nested_record_layout() {
        let header = Header::parse(
            "{'descr': [('vld', '|b1'), ('tim', '<f8'), ('tid', '<i4'), \
             ('itr', [('itr', '<i4'), ('loc', '<f8', (3,))], (4,))], \
             'fortran_order': False, 'shape': (12,), }",
        )
        .unwrap();

        assert!(!header.fortran_order);
        assert_eq!(header.shape, vec![12]);

        let tim = header.dtype.field("tim").unwrap();
        assert_eq!(tim.offset, 1);
        let itr = header.dtype.field("itr").unwrap();
        assert_eq!(itr.offset, 13);
        assert_eq!(itr.shape, vec![4]);
        assert_eq!(itr.dtype.itemsize(), 28);
        assert_eq!(itr.dtype.field("loc").unwrap().offset, 4);
        assert_eq!(header.dtype.itemsize(), 13 + 4 * 28);
    }

    #[test]
    fn test_oversized_sub_array_rejected() {
        let err = Header::parse(
            "{'descr': [('loc', '<f8', (9223372036854775807, 4))], \
             'fortran_order': False, 'shape': (1,), }",
        )
        .unwrap_err();
        assert!(err.contains("loc"), "{}", err);
    }

    #[test]
    fn test_header_requires_keys() {
        assert!(Header::parse("{'descr': '<f8', 'shape': (3,)}").is_err());
        assert!(Header::parse("[1]").is_err());
    }
}
