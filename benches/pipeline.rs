use divan::Bencher;
use nestml::odes::{DividedDifferences, LinearSystem, PropagatorDeriver, StateEquation, SymExpr};
use nestml::parser::parse_nestml_string;
use nestml::registry::Registry;
use nestml::{validate_model, CompilerOptions};

fn main() {
    divan::main();
}

const MODELS: &[(&str, &str)] = &[
    ("iaf_psc_alpha", include_str!("../tests/models/iaf_psc_alpha.nestml")),
    ("iaf_psc_exp", include_str!("../tests/models/iaf_psc_exp.nestml")),
    ("izhikevich", include_str!("../tests/models/izhikevich.nestml")),
];

fn model_text(name: &str) -> &'static str {
    MODELS
        .iter()
        .find(|(model, _)| *model == name)
        .map(|(_, text)| *text)
        .unwrap()
}

#[divan::bench(args = ["iaf_psc_alpha", "iaf_psc_exp", "izhikevich"])]
fn parse(bencher: Bencher, name: &str) {
    let text = model_text(name);
    bencher.bench_local(|| parse_nestml_string(text).unwrap());
}

#[divan::bench(args = ["iaf_psc_alpha", "iaf_psc_exp", "izhikevich"])]
fn validate(bencher: Bencher, name: &str) {
    let model = parse_nestml_string(model_text(name)).unwrap().remove(0);
    let registry = Registry::new_shared();
    let options = CompilerOptions::default();
    bencher
        .with_inputs(|| model.clone())
        .bench_local_values(|model| validate_model(model, registry.clone(), &options).is_ok());
}

/// A chain of `n` exponential filters, `x_i' = (x_{i-1} - x_i) / tau_i`.
fn filter_chain(n: usize) -> LinearSystem {
    let equations: Vec<StateEquation> = (0..n)
        .map(|i| {
            let x = SymExpr::sym(&format!("x{}", i));
            let input = if i == 0 {
                SymExpr::sym("I")
            } else {
                SymExpr::sym(&format!("x{}", i - 1))
            };
            StateEquation {
                name: format!("x{}", i),
                rhs: (input - x) / SymExpr::sym(&format!("tau{}", i)),
                initial_value: None,
            }
        })
        .collect();
    LinearSystem::from_equations(&equations, "__h", "t").unwrap()
}

#[divan::bench(consts = [1, 2, 4, 8])]
fn propagator<const N: usize>(bencher: Bencher) {
    let system = filter_chain(N);
    bencher.bench_local(|| DividedDifferences.derive_propagator(&system).unwrap());
}
