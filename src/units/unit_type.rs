use std::fmt;

use approx::relative_eq;
use num_rational::Rational32;

use super::Dimension;

/// A physical unit: dimension exponents plus the scale relative to the SI base units.
///
/// Two units are compatible when their dimensions agree, whatever their scales.
#[derive(Debug, Clone)]
pub struct UnitType {
    name: String,
    dimension: Dimension,
    scale: f64,
}

impl UnitType {
    pub fn new(name: &str, dimension: Dimension, scale: f64) -> Self {
        Self {
            name: name.to_string(),
            dimension,
            scale,
        }
    }

    pub fn dimensionless() -> Self {
        Self::new("1", Dimension::dimensionless(), 1.0)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> &Dimension {
        &self.dimension
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn is_dimensionless(&self) -> bool {
        self.dimension.is_dimensionless()
    }

    /// True for dimensionless units with unit scale, which behave exactly like `real`.
    pub fn is_plain_number(&self) -> bool {
        self.is_dimensionless() && relative_eq!(self.scale, 1.0)
    }

    pub fn is_compatible(&self, other: &UnitType) -> bool {
        self.dimension == other.dimension
    }

    /// Factor that converts a value in `self` into a value in `to`, if the dimensions agree.
    pub fn conversion_factor(&self, to: &UnitType) -> Option<f64> {
        if self.is_compatible(to) {
            Some(self.scale / to.scale)
        } else {
            None
        }
    }

    pub fn mul(&self, rhs: &UnitType) -> UnitType {
        let name = match (self.name.as_str(), rhs.name.as_str()) {
            ("1", other) | (other, "1") => other.to_string(),
            (lhs, rhs) => format!("{}*{}", lhs, wrap_compound(rhs)),
        };
        UnitType::new(&name, self.dimension * rhs.dimension, self.scale * rhs.scale)
    }

    pub fn div(&self, rhs: &UnitType) -> UnitType {
        let name = match rhs.name.as_str() {
            "1" => self.name.clone(),
            other => format!("{}/{}", self.name, wrap_compound(other)),
        };
        UnitType::new(&name, self.dimension / rhs.dimension, self.scale / rhs.scale)
    }

    pub fn powi(&self, exponent: i32) -> UnitType {
        self.pow(Rational32::from_integer(exponent))
    }

    pub fn pow(&self, exponent: Rational32) -> UnitType {
        let exponent_text = if exponent.is_integer() && exponent > Rational32::from_integer(0) {
            exponent.to_string()
        } else {
            format!("({})", exponent)
        };
        let name = format!("{}**{}", wrap_compound(&self.name), exponent_text);
        let scale = self.scale.powf(*exponent.numer() as f64 / *exponent.denom() as f64);
        UnitType::new(&name, self.dimension.pow(exponent), scale)
    }
}

fn wrap_compound(name: &str) -> String {
    if name.contains(['*', '/']) {
        format!("({})", name)
    } else {
        name.to_string()
    }
}

impl PartialEq for UnitType {
    fn eq(&self, other: &Self) -> bool {
        self.dimension == other.dimension
            && relative_eq!(self.scale, other.scale, max_relative = 1e-12)
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
