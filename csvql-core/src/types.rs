use core::fmt;

use serde::{Deserialize, Serialize};

/// The SQL type of a value or a column.
///
/// Every [`Value`](crate::Value) carries one of these tags, even when it is
/// null (a typed null).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// No type could be inferred (yet).
    None,
    /// Boolean, `TRUE` or `FALSE`.
    Boolean,
    /// 64-bit signed integer.
    Int,
    /// 64-bit floating point number.
    Real,
    /// Character string.
    String,
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// Date and time of day.
    Timestamp,
}

impl Type {
    /// Returns true if the type is `Int` or `Real`.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Real)
    }

    /// Returns the wider of two numeric types, or `None` if either side is
    /// not numeric.
    pub fn common_numeric(lhs: Type, rhs: Type) -> Option<Type> {
        match (lhs, rhs) {
            (Type::Int, Type::Int) => Some(Type::Int),
            (Type::Int, Type::Real) | (Type::Real, Type::Int) | (Type::Real, Type::Real) => {
                Some(Type::Real)
            }
            _ => None,
        }
    }

    /// Returns true if values of the two types can be compared with the
    /// relational operators. Numeric types compare against each other, all
    /// other types only against themselves.
    pub fn comparable(lhs: Type, rhs: Type) -> bool {
        lhs == rhs || (lhs.is_numeric() && rhs.is_numeric())
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::None => "NONE",
            Self::Boolean => "BOOLEAN",
            Self::Int => "INT",
            Self::Real => "REAL",
            Self::String => "STRING",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::Timestamp => "TIMESTAMP",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_promotion() {
        assert_eq!(Type::common_numeric(Type::Int, Type::Int), Some(Type::Int));
        assert_eq!(Type::common_numeric(Type::Int, Type::Real), Some(Type::Real));
        assert_eq!(Type::common_numeric(Type::Real, Type::Real), Some(Type::Real));
        assert_eq!(Type::common_numeric(Type::String, Type::Int), None);
    }

    #[test]
    fn comparability() {
        assert!(Type::comparable(Type::Int, Type::Real));
        assert!(Type::comparable(Type::Date, Type::Date));
        assert!(!Type::comparable(Type::Date, Type::Time));
        assert!(!Type::comparable(Type::String, Type::Int));
    }
}
