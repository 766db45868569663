use std::fmt;

use crate::typing::TypeError;
use crate::units::{Dimension, UnitType};

/// The type of a value in a model.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSymbol {
    Boolean,
    Integer,
    Real,
    Void,
    String,
    Unit(UnitType),
    Vector { element: Box<TypeSymbol>, size: String },
    /// Stands in for an expression that failed to type, compatible with everything.
    Error,
}

impl TypeSymbol {
    /// A unit type, collapsed to `real` when it is dimensionless with unit scale.
    pub fn unit(unit: UnitType) -> TypeSymbol {
        if unit.is_plain_number() {
            TypeSymbol::Real
        } else {
            TypeSymbol::Unit(unit)
        }
    }

    pub fn vector(element: TypeSymbol, size: &str) -> TypeSymbol {
        TypeSymbol::Vector {
            element: Box::new(element),
            size: size.to_string(),
        }
    }

    /// The element type for vectors, the type itself otherwise.
    pub fn element(&self) -> &TypeSymbol {
        match self {
            TypeSymbol::Vector { element, .. } => element.element(),
            other => other,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.element(), TypeSymbol::Error)
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, TypeSymbol::Vector { .. })
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self.element(), TypeSymbol::Boolean | TypeSymbol::Error)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self.element(), TypeSymbol::Integer)
    }

    /// integer, real or a unit type
    pub fn is_numeric(&self) -> bool {
        matches!(
            self.element(),
            TypeSymbol::Integer | TypeSymbol::Real | TypeSymbol::Unit(_)
        )
    }

    /// integer or real (or a dimensionless unit)
    pub fn is_numeric_primitive(&self) -> bool {
        match self.element() {
            TypeSymbol::Integer | TypeSymbol::Real => true,
            TypeSymbol::Unit(unit) => unit.is_dimensionless(),
            _ => false,
        }
    }

    /// The unit of a numeric type; `integer` and `real` are dimensionless.
    pub fn as_unit(&self) -> Option<UnitType> {
        match self.element() {
            TypeSymbol::Integer | TypeSymbol::Real => Some(UnitType::dimensionless()),
            TypeSymbol::Unit(unit) => Some(unit.clone()),
            _ => None,
        }
    }

    pub fn dimension(&self) -> Option<Dimension> {
        self.as_unit().map(|unit| *unit.dimension())
    }

    /// Whether two values may be added, compared or unified. Never fails on the error sentinel.
    pub fn is_compatible(&self, other: &TypeSymbol) -> bool {
        if self.is_error() || other.is_error() {
            return true;
        }
        match (self.element(), other.element()) {
            (TypeSymbol::Boolean, TypeSymbol::Boolean)
            | (TypeSymbol::String, TypeSymbol::String)
            | (TypeSymbol::Void, TypeSymbol::Void) => true,
            (lhs, rhs) => match (lhs.dimension(), rhs.dimension()) {
                (Some(l), Some(r)) => l == r,
                _ => false,
            },
        }
    }

    /// Checks that a value of this type may be stored in a variable of type `target`.
    ///
    /// `integer` widens to `real` silently. Numbers never silently acquire a physical unit.
    pub fn check_assignable(&self, target: &TypeSymbol) -> Result<(), TypeError> {
        if self.is_error() || target.is_error() {
            return Ok(());
        }
        match (self.element(), target.element()) {
            (TypeSymbol::Integer, TypeSymbol::Integer | TypeSymbol::Real) => Ok(()),
            (TypeSymbol::Real, TypeSymbol::Real) => Ok(()),
            (TypeSymbol::Real, TypeSymbol::Integer) => Err(TypeError::IncompatibleTypes(format!(
                "Cannot assign a value of type '{}' to a variable of type '{}'.",
                self.element(),
                target.element()
            ))),
            (TypeSymbol::Integer | TypeSymbol::Real, TypeSymbol::Unit(unit))
                if !unit.is_dimensionless() =>
            {
                Err(TypeError::IncompatibleUnits(format!(
                    "Implicit cast from {} to {}.",
                    self.element(),
                    unit
                )))
            }
            (value, target_type) if value.is_numeric() && target_type.is_numeric() => {
                if value.is_compatible(target_type) {
                    Ok(())
                } else {
                    Err(TypeError::IncompatibleUnits(format!(
                        "Cannot assign a value in '{}' to a variable in '{}'.",
                        value, target_type
                    )))
                }
            }
            (value, target_type) if value == target_type => Ok(()),
            (value, target_type) => Err(TypeError::IncompatibleTypes(format!(
                "Cannot assign a value of type '{}' to a variable of type '{}'.",
                value, target_type
            ))),
        }
    }
}

impl fmt::Display for TypeSymbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TypeSymbol::Boolean => write!(f, "boolean"),
            TypeSymbol::Integer => write!(f, "integer"),
            TypeSymbol::Real => write!(f, "real"),
            TypeSymbol::Void => write!(f, "void"),
            TypeSymbol::String => write!(f, "string"),
            TypeSymbol::Unit(unit) => write!(f, "{}", unit),
            TypeSymbol::Vector { element, size } => write!(f, "{}[{}]", element, size),
            TypeSymbol::Error => write!(f, "<error>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::dimension::TIME;

    fn ms() -> TypeSymbol {
        TypeSymbol::unit(UnitType::new("ms", Dimension::base(TIME), 1e-3))
    }

    fn s() -> TypeSymbol {
        TypeSymbol::unit(UnitType::new("s", Dimension::base(TIME), 1.0))
    }

    #[test]
    fn assignability() {
        assert!(TypeSymbol::Integer.check_assignable(&TypeSymbol::Real).is_ok());
        assert!(matches!(
            TypeSymbol::Real.check_assignable(&TypeSymbol::Integer),
            Err(TypeError::IncompatibleTypes(_))
        ));
        assert!(matches!(
            TypeSymbol::Real.check_assignable(&ms()),
            Err(TypeError::IncompatibleUnits(_))
        ));
        assert!(s().check_assignable(&ms()).is_ok());
        assert!(matches!(
            ms().check_assignable(&TypeSymbol::Real),
            Err(TypeError::IncompatibleUnits(_))
        ));
        assert!(matches!(
            TypeSymbol::Boolean.check_assignable(&TypeSymbol::Real),
            Err(TypeError::IncompatibleTypes(_))
        ));
        assert!(TypeSymbol::Error.check_assignable(&ms()).is_ok());
        assert!(TypeSymbol::vector(ms(), "3").check_assignable(&s()).is_ok());
    }

    #[test]
    fn plain_numbers_collapse_to_real() {
        let ratio = TypeSymbol::unit(UnitType::new("ms", Dimension::base(TIME), 1e-3).div(
            &UnitType::new("ms", Dimension::base(TIME), 1e-3),
        ));
        assert_eq!(ratio, TypeSymbol::Real);
        assert!(ratio.is_compatible(&TypeSymbol::Integer));
        assert!(!ms().is_compatible(&TypeSymbol::Real));
        assert!(TypeSymbol::Error.is_compatible(&TypeSymbol::Boolean));
    }
}
