use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::ast::UnitExpr;
use crate::symbols::{
    DeclSite, FunctionSymbol, ParamKind, ReturnKind, SymbolRef, TypeSymbol, VariableBlock,
    VariableSymbol,
};
use crate::units::{Dimension, UnitType};

const PREFIXES: &[(&str, f64)] = &[
    ("da", 1e1),
    ("Y", 1e24),
    ("Z", 1e21),
    ("E", 1e18),
    ("P", 1e15),
    ("T", 1e12),
    ("G", 1e9),
    ("M", 1e6),
    ("k", 1e3),
    ("h", 1e2),
    ("d", 1e-1),
    ("c", 1e-2),
    ("m", 1e-3),
    ("u", 1e-6),
    ("n", 1e-9),
    ("p", 1e-12),
    ("f", 1e-15),
    ("a", 1e-18),
    ("z", 1e-21),
    ("y", 1e-24),
];

struct NamedUnit {
    unit: UnitType,
    prefixable: bool,
}

/// Process-wide, read-only table of physical units, predefined variables and built-in functions.
///
/// Built once and shared between validation sessions through an `Arc`.
pub struct Registry {
    units: HashMap<String, NamedUnit>,
    variables: HashMap<String, VariableSymbol>,
    functions: HashMap<String, FunctionSymbol>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let mut registry = Registry {
            units: HashMap::new(),
            variables: HashMap::new(),
            functions: HashMap::new(),
        };
        registry.add_units();
        registry.add_variables();
        registry.add_functions();
        debug!(
            "Registry: {} units, {} variables, {} functions",
            registry.units.len(),
            registry.variables.len(),
            registry.functions.len()
        );
        registry
    }

    pub fn new_shared() -> Arc<Registry> {
        Arc::new(Self::new())
    }

    fn add_unit(&mut self, name: &str, exponents: [i32; 7], scale: f64, prefixable: bool) {
        let unit = UnitType::new(name, Dimension::from_exponents(exponents), scale);
        self.units
            .insert(name.to_string(), NamedUnit { unit, prefixable });
    }

    fn add_units(&mut self) {
        //                 m  kg   s   A  K mol cd
        self.add_unit("m", [1, 0, 0, 0, 0, 0, 0], 1.0, true);
        self.add_unit("g", [0, 1, 0, 0, 0, 0, 0], 1e-3, true);
        self.add_unit("s", [0, 0, 1, 0, 0, 0, 0], 1.0, true);
        self.add_unit("A", [0, 0, 0, 1, 0, 0, 0], 1.0, true);
        self.add_unit("K", [0, 0, 0, 0, 1, 0, 0], 1.0, true);
        self.add_unit("mol", [0, 0, 0, 0, 0, 1, 0], 1.0, true);
        self.add_unit("cd", [0, 0, 0, 0, 0, 0, 1], 1.0, true);

        self.add_unit("Hz", [0, 0, -1, 0, 0, 0, 0], 1.0, true);
        self.add_unit("N", [1, 1, -2, 0, 0, 0, 0], 1.0, true);
        self.add_unit("Pa", [-1, 1, -2, 0, 0, 0, 0], 1.0, true);
        self.add_unit("J", [2, 1, -2, 0, 0, 0, 0], 1.0, true);
        self.add_unit("W", [2, 1, -3, 0, 0, 0, 0], 1.0, true);
        self.add_unit("C", [0, 0, 1, 1, 0, 0, 0], 1.0, true);
        self.add_unit("V", [2, 1, -3, -1, 0, 0, 0], 1.0, true);
        self.add_unit("F", [-2, -1, 4, 2, 0, 0, 0], 1.0, true);
        self.add_unit("Ohm", [2, 1, -3, -2, 0, 0, 0], 1.0, true);
        self.add_unit("ohm", [2, 1, -3, -2, 0, 0, 0], 1.0, true);
        self.add_unit("S", [-2, -1, 3, 2, 0, 0, 0], 1.0, true);
        self.add_unit("H", [2, 1, -2, -2, 0, 0, 0], 1.0, true);
        self.add_unit("L", [3, 0, 0, 0, 0, 0, 0], 1e-3, true);
        self.add_unit("M", [-3, 0, 0, 0, 0, 1, 0], 1e3, true);

        self.add_unit("min", [0, 0, 1, 0, 0, 0, 0], 60.0, false);
        self.add_unit("h", [0, 0, 1, 0, 0, 0, 0], 3600.0, false);
    }

    fn add_variables(&mut self) {
        let ms = self.expect_unit("ms");
        for (name, ty) in [("t", TypeSymbol::unit(ms)), ("e", TypeSymbol::Real)] {
            self.variables.insert(
                name.to_string(),
                VariableSymbol::new(name, ty, VariableBlock::Predefined, DeclSite::Builtin),
            );
        }
    }

    fn add_function(&mut self, name: &str, params: Vec<ParamKind>, return_kind: ReturnKind) {
        self.functions.insert(
            name.to_string(),
            FunctionSymbol::builtin(name, params, return_kind),
        );
    }

    fn add_functions(&mut self) {
        use ParamKind::{AnyNumeric, Exact, SameAs};
        let real = || Exact(TypeSymbol::Real);
        let string = || Exact(TypeSymbol::String);
        let ms = TypeSymbol::unit(self.expect_unit("ms"));

        for name in [
            "exp", "expm1", "ln", "log", "log10", "sin", "cos", "tan", "sinh", "cosh", "tanh",
            "sqrt", "erf", "erfc",
        ] {
            self.add_function(name, vec![real()], ReturnKind::Fixed(TypeSymbol::Real));
        }
        self.add_function("pow", vec![real(), real()], ReturnKind::Fixed(TypeSymbol::Real));

        self.add_function("abs", vec![AnyNumeric], ReturnKind::SameAs(0));
        self.add_function("min", vec![AnyNumeric, SameAs(0)], ReturnKind::SameAs(0));
        self.add_function("max", vec![AnyNumeric, SameAs(0)], ReturnKind::SameAs(0));
        self.add_function(
            "clip",
            vec![AnyNumeric, SameAs(0), SameAs(0)],
            ReturnKind::SameAs(0),
        );
        self.add_function("random_normal", vec![AnyNumeric, SameAs(0)], ReturnKind::SameAs(0));
        self.add_function("random_uniform", vec![AnyNumeric, SameAs(0)], ReturnKind::SameAs(0));

        self.add_function(
            "steps",
            vec![Exact(ms.clone())],
            ReturnKind::Fixed(TypeSymbol::Integer),
        );
        self.add_function("resolution", vec![], ReturnKind::Fixed(ms));
        self.add_function("emit_spike", vec![], ReturnKind::Fixed(TypeSymbol::Void));
        self.add_function("integrate_odes", vec![], ReturnKind::Fixed(TypeSymbol::Void));
        for name in ["print", "println", "info", "warning"] {
            self.add_function(name, vec![string()], ReturnKind::Fixed(TypeSymbol::Void));
        }

        // typed as shape * buffer by the checker
        self.add_function(
            "convolve",
            vec![AnyNumeric, AnyNumeric],
            ReturnKind::Fixed(TypeSymbol::Error),
        );
    }

    fn expect_unit(&self, name: &str) -> UnitType {
        self.lookup_unit(name)
            .unwrap_or_else(|| UnitType::new(name, Dimension::dimensionless(), 1.0))
    }

    /// Looks up a unit name, trying exact names before SI-prefixed ones (`min` is minutes, not
    /// milli-inch).
    pub fn lookup_unit(&self, name: &str) -> Option<UnitType> {
        if let Some(named) = self.units.get(name) {
            return Some(named.unit.clone());
        }
        PREFIXES.iter().find_map(|(prefix, factor)| {
            let rest = name.strip_prefix(prefix)?;
            let named = self.units.get(rest).filter(|named| named.prefixable)?;
            Some(UnitType::new(
                name,
                *named.unit.dimension(),
                named.unit.scale() * factor,
            ))
        })
    }

    /// Evaluates a unit expression from a data type, failing with the first unknown unit name.
    pub fn unit_of(&self, unit: &UnitExpr) -> Result<UnitType, String> {
        match unit {
            UnitExpr::One => Ok(UnitType::dimensionless()),
            UnitExpr::Name(name) => self.lookup_unit(name).ok_or_else(|| name.clone()),
            UnitExpr::Mul(lhs, rhs) => Ok(self.unit_of(lhs)?.mul(&self.unit_of(rhs)?)),
            UnitExpr::Div(lhs, rhs) => Ok(self.unit_of(lhs)?.div(&self.unit_of(rhs)?)),
            UnitExpr::Pow(base, exponent) => Ok(self.unit_of(base)?.powi(*exponent)),
        }
    }

    pub fn second(&self) -> UnitType {
        self.expect_unit("s")
    }

    pub fn variable(&self, name: &str) -> Option<&VariableSymbol> {
        self.variables.get(name)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionSymbol> {
        self.functions.get(name)
    }

    pub fn resolve(&self, name: &str) -> Option<SymbolRef<'_>> {
        if let Some(var) = self.variables.get(name) {
            return Some(SymbolRef::Variable(var));
        }
        if let Some(func) = self.functions.get(name) {
            return Some(SymbolRef::Function(func));
        }
        self.lookup_unit(name).map(SymbolRef::Type)
    }
}

/// Scale factors of the simulator's internal unit system (ms, mV, pA, pF, nS) relative to SI.
pub fn internal_unit_factor(dimension: &Dimension) -> f64 {
    // internal mass unit is 1e-24 kg so that mV * pA = (1e-3 V)(1e-12 A) lines up with ms
    let base_scales: [f64; 7] = [1.0, 1e-24, 1e-3, 1e-12, 1.0, 1.0, 1.0];
    base_scales
        .iter()
        .zip(dimension.exponents().iter())
        .map(|(scale, exponent)| {
            let exponent = *exponent.numer() as f64 / *exponent.denom() as f64;
            scale.powf(exponent)
        })
        .product()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn prefixed_units() {
        let registry = Registry::new();
        let mv = registry.lookup_unit("mV").unwrap();
        assert_relative_eq!(mv.scale(), 1e-3);
        assert!(mv.is_compatible(&registry.lookup_unit("V").unwrap()));
        let kg = registry.lookup_unit("kg").unwrap();
        assert_relative_eq!(kg.scale(), 1.0);
        assert_relative_eq!(registry.lookup_unit("dam").unwrap().scale(), 10.0);
        assert_relative_eq!(registry.lookup_unit("min").unwrap().scale(), 60.0);
        assert_relative_eq!(registry.lookup_unit("GOhm").unwrap().scale(), 1e9);
        assert!(registry.lookup_unit("kmin").is_none());
        assert!(registry.lookup_unit("foo").is_none());
    }

    #[test]
    fn unit_expressions() {
        let registry = Registry::new();
        let rate = registry
            .unit_of(&UnitExpr::Div(
                Box::new(UnitExpr::Name("nS".to_string())),
                Box::new(UnitExpr::Name("ms".to_string())),
            ))
            .unwrap();
        assert_relative_eq!(rate.scale(), 1e-6);
        assert_eq!(
            registry.unit_of(&UnitExpr::Name("parsec".to_string())),
            Err("parsec".to_string())
        );
    }

    #[test]
    fn internal_units_are_consistent() {
        let registry = Registry::new();
        for name in ["ms", "mV", "pA", "pF", "nS"] {
            let unit = registry.lookup_unit(name).unwrap();
            assert_relative_eq!(
                unit.scale() / internal_unit_factor(unit.dimension()),
                1.0,
                max_relative = 1e-9
            );
        }
    }

    #[test]
    fn builtins_resolve() {
        let registry = Registry::new();
        assert!(registry.resolve("t").unwrap().as_variable().is_some());
        assert!(registry.resolve("exp").unwrap().as_function().is_some());
        assert!(matches!(registry.resolve("mV"), Some(SymbolRef::Type(_))));
        assert!(registry.resolve("nonexistent").is_none());
    }
}
