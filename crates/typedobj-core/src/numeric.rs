use std::cmp::Ordering;
use std::fmt;

use num_bigint::BigInt;
use num_traits::FromPrimitive;
use typedobj_canonical::Token;

/// A JSON number compared without loss of precision.
#[derive(Debug, Clone, PartialEq)]
pub enum NumericValue {
    /// Integer of any width.
    Integer(BigInt),
    /// Finite float.
    Float(f64),
}

impl NumericValue {
    /// Parses a JSON number literal or a decimal string.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.contains(['.', 'e', 'E']) {
            let value: f64 = text.parse().ok()?;
            return value.is_finite().then_some(NumericValue::Float(value));
        }
        text.parse::<BigInt>().ok().map(NumericValue::Integer)
    }

    /// Reads the number carried by a scalar token.
    pub fn from_token(token: &Token) -> Option<Self> {
        match token {
            Token::Int(v) => Some(NumericValue::Integer(BigInt::from(*v))),
            Token::BigInt(v) => Some(NumericValue::Integer(v.clone())),
            Token::Float(v) => Some(NumericValue::Float(*v)),
            _ => None,
        }
    }

    /// Total order across integers and floats.
    pub fn compare(&self, other: &NumericValue) -> Ordering {
        match (self, other) {
            (NumericValue::Integer(a), NumericValue::Integer(b)) => a.cmp(b),
            (NumericValue::Float(a), NumericValue::Float(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (NumericValue::Integer(a), NumericValue::Float(b)) => compare_int_float(a, *b),
            (NumericValue::Float(a), NumericValue::Integer(b)) => {
                compare_int_float(b, *a).reverse()
            }
        }
    }
}

// Exact: compares against floor(f) as a big integer, then the fractional part.
fn compare_int_float(int: &BigInt, float: f64) -> Ordering {
    let floor = float.floor();
    let Some(whole) = BigInt::from_f64(floor) else {
        return if float.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    };
    match int.cmp(&whole) {
        Ordering::Equal if floor < float => Ordering::Less,
        other => other,
    }
}

impl fmt::Display for NumericValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericValue::Integer(v) => write!(f, "{v}"),
            NumericValue::Float(v) => match serde_json::Number::from_f64(*v) {
                Some(n) => write!(f, "{n}"),
                None => write!(f, "{v}"),
            },
        }
    }
}
