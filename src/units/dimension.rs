use std::fmt;
use std::ops::{Div, Mul};

use num_rational::Rational32;
use num_traits::{One, Signed, Zero};

/// SI base dimensions, in exponent-vector order.
pub const BASE_UNITS: [&str; 7] = ["m", "kg", "s", "A", "K", "mol", "cd"];

pub const LENGTH: usize = 0;
pub const MASS: usize = 1;
pub const TIME: usize = 2;
pub const CURRENT: usize = 3;
pub const TEMPERATURE: usize = 4;
pub const AMOUNT: usize = 5;
pub const LUMINOSITY: usize = 6;

/// Rational exponents over the seven SI base dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimension([Rational32; 7]);

impl Dimension {
    pub fn dimensionless() -> Self {
        Dimension([Rational32::zero(); 7])
    }

    pub fn base(index: usize) -> Self {
        let mut exponents = [Rational32::zero(); 7];
        exponents[index] = Rational32::one();
        Dimension(exponents)
    }

    pub fn from_exponents(exponents: [i32; 7]) -> Self {
        Dimension(exponents.map(Rational32::from_integer))
    }

    pub fn exponents(&self) -> &[Rational32; 7] {
        &self.0
    }

    pub fn exponent(&self, index: usize) -> Rational32 {
        self.0[index]
    }

    pub fn is_dimensionless(&self) -> bool {
        self.0.iter().all(|e| e.is_zero())
    }

    pub fn pow(&self, exponent: Rational32) -> Self {
        Dimension(self.0.map(|e| e * exponent))
    }

    pub fn powi(&self, exponent: i32) -> Self {
        self.pow(Rational32::from_integer(exponent))
    }

    pub fn recip(&self) -> Self {
        self.powi(-1)
    }
}

impl Default for Dimension {
    fn default() -> Self {
        Self::dimensionless()
    }
}

impl Mul for Dimension {
    type Output = Dimension;

    fn mul(self, rhs: Dimension) -> Dimension {
        let mut exponents = self.0;
        for (e, r) in exponents.iter_mut().zip(rhs.0.iter()) {
            *e += *r;
        }
        Dimension(exponents)
    }
}

impl Div for Dimension {
    type Output = Dimension;

    fn div(self, rhs: Dimension) -> Dimension {
        self * rhs.recip()
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_dimensionless() {
            return write!(f, "1");
        }
        let mut first = true;
        for (name, exponent) in BASE_UNITS.iter().zip(self.0.iter()) {
            if exponent.is_zero() {
                continue;
            }
            if !first {
                write!(f, "*")?;
            }
            first = false;
            if exponent.is_one() {
                write!(f, "{}", name)?;
            } else if exponent.is_integer() && exponent.is_positive() {
                write!(f, "{}**{}", name, exponent)?;
            } else {
                write!(f, "{}**({})", name, exponent)?;
            }
        }
        Ok(())
    }
}
