pub mod dimension;
pub mod unit_type;

pub use dimension::{Dimension, BASE_UNITS};
pub use unit_type::UnitType;
