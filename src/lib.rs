extern crate pest;
#[macro_use]
extern crate pest_derive;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::info;
use rayon::prelude::*;

pub mod ast;
pub mod cocos;
pub mod error;
pub mod odes;
pub mod options;
pub mod parser;
pub mod registry;
pub mod symbols;
pub mod typing;
pub mod units;

use ast::Model;
use cocos::{CheckContext, ContextConditions};
use error::Diagnostics;
use odes::{OdeClassifier, SolverPlan};
use parser::parse_nestml_string;
use registry::Registry;
use symbols::SymbolTable;
use typing::{TypeChecker, TypeTable};

pub use error::{Diagnostic, ErrorCode, Severity};
pub use options::{CompilerOptions, IntegrationMethod};

/// A model that passed every check, ready for a code generator.
pub struct ValidatedModel {
    pub model: Model,
    pub symbols: SymbolTable,
    pub types: TypeTable,
    pub plan: SolverPlan,
    pub warnings: Diagnostics,
}

/// Runs the whole front end over one model: symbol table, type inference, context conditions
/// and ODE classification. Every phase runs even if an earlier one found errors; any
/// error-severity diagnostic makes the result an `Err` with all of them.
pub fn validate_model(
    mut model: Model,
    registry: Arc<Registry>,
    options: &CompilerOptions,
) -> Result<ValidatedModel, Diagnostics> {
    let mut symbols = SymbolTable::build(&mut model, registry);
    info!(
        "Built symbol table for '{}' with {} scopes",
        model.name,
        symbols.num_scopes()
    );
    let mut types = TypeChecker::check_model(&model, &symbols);
    info!("Inferred {} expression types in '{}'", types.len(), model.name);

    let mut diagnostics = Diagnostics::new();
    let ctx = CheckContext::new(&model, &symbols, &types);
    diagnostics.extend(ContextConditions::default().run(&ctx));

    let (plan, found) = OdeClassifier::new(options).classify(&model, &symbols);
    diagnostics.extend(found);

    if !diagnostics.has_errors() && options.inject_propagators {
        let found = plan.inject_propagators(&mut model, &mut symbols);
        diagnostics.extend(found);
        types = TypeChecker::check_model(&model, &symbols);
    }

    if diagnostics.has_errors() {
        info!(
            "'{}' failed validation with {} errors",
            model.name,
            diagnostics.errors().count()
        );
        return Err(diagnostics);
    }
    Ok(ValidatedModel {
        model,
        symbols,
        types,
        plan,
        warnings: diagnostics,
    })
}

/// Validates independent models in parallel. Results keep the order of `models`.
pub fn validate_models(
    models: Vec<Model>,
    registry: Arc<Registry>,
    options: &CompilerOptions,
) -> Vec<Result<ValidatedModel, Diagnostics>> {
    models
        .into_par_iter()
        .map(|model| validate_model(model, registry.clone(), options))
        .collect()
}

/// Parses `text` and validates its models, or only the one called `model_name`. Diagnostics
/// are rendered against `text`.
pub fn check_string(
    text: &str,
    model_name: Option<&str>,
    options: &CompilerOptions,
) -> Result<Vec<ValidatedModel>> {
    let models = parse_nestml_string(text).map_err(|e| anyhow!(e.to_string()))?;
    let models: Vec<Model> = match model_name {
        Some(name) => {
            let found: Vec<Model> = models.into_iter().filter(|m| m.name == name).collect();
            if found.is_empty() {
                return Err(anyhow!("Model '{}' not found", name));
            }
            found
        }
        None => models,
    };

    let names: Vec<String> = models.iter().map(|m| m.name.clone()).collect();
    let mut validated = Vec::new();
    let mut failures = String::new();
    for (result, name) in validate_models(models, Registry::new_shared(), options)
        .into_iter()
        .zip(names)
    {
        match result {
            Ok(model) => validated.push(model),
            Err(diagnostics) => {
                failures.push_str(&format!(
                    "Errors in '{}':{}",
                    name,
                    diagnostics.as_error_message(text)
                ));
            }
        }
    }
    if failures.is_empty() {
        Ok(validated)
    } else {
        Err(anyhow!(failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! count {
        () => (0usize);
        ( $x:tt $($xs:tt)* ) => (1usize + count!($($xs)*));
    }

    macro_rules! full_model_tests {
        ($($name:ident: $text:literal [$($error:literal,)*],)*) => {
        $(
            #[test]
            fn $name() {
                let _ = env_logger::builder().is_test(true).try_init();
                let model_text = $text;
                let model = parse_nestml_string(model_text).unwrap().remove(0);
                match validate_model(model, Registry::new_shared(), &CompilerOptions::default()) {
                    Ok(validated) => {
                        if (count!($($error)*) != 0) {
                            panic!("Should have failed: {}", validated.plan)
                        }
                    }
                    Err(e) => {
                        if (count!($($error)*) == 0) {
                            panic!("Should have succeeded: {}", e.as_error_message(model_text))
                        } else {
                            $(
                                if !e.has_error_contains($error) {
                                    panic!(
                                        "Expected error '{}' not found in '{}'",
                                        $error,
                                        e.as_error_message(model_text)
                                    );
                                }
                            )*
                        }
                    }
                };
            }
        )*
        }
    }

    full_model_tests! (
        passive_membrane: "
neuron passive:
    state:
        V_m mV = -70 mV
    end
    parameters:
        tau_m ms = 10 ms
        E_L mV = -70 mV
    end
    equations:
        V_m' = -(V_m - E_L) / tau_m
    end
end
" [],
        undefined_parameter: "
neuron undefined:
    state:
        V_m mV = 0 mV
    end
    equations:
        V_m' = -V_m / tau_x
    end
end
" ["tau_x",],
        duplicate_state: "
neuron duplicate:
    state:
        V_m mV = 0 mV
        V_m mV = 1 mV
    end
    parameters:
        tau_m ms = 10 ms
    end
    equations:
        V_m' = -V_m / tau_m
    end
end
" ["defined multiple times",],
        units_do_not_add: "
neuron units:
    state:
        V_m mV = 0 mV
    end
    parameters:
        tau_m ms = 10 ms
    end
    equations:
        V_m' = -V_m / tau_m + 1 pA
    end
end
" ["Incompatible units in '+'",],
        condition_is_a_voltage: "
neuron condition:
    state:
        V_m mV = 0 mV
    end
    update:
        if V_m:
            V_m = 1 mV
        end
    end
end
" ["must be boolean",],
        state_without_equation: "
neuron missing:
    state:
        V_m mV = 0 mV
        w mV = 0 mV
    end
    parameters:
        tau_m ms = 10 ms
    end
    equations:
        V_m' = (w - V_m) / tau_m
    end
end
" ["has no differential equation",],
        shape_on_a_current_buffer: "
neuron current_shape:
    state:
        V_m mV = 0 mV
    end
    parameters:
        tau_m ms = 10 ms
        tau_syn ms = 2 ms
        C_m pF = 250 pF
    end
    equations:
        shape g_in = exp(-t / tau_syn)
        V_m' = -V_m / tau_m + convolve(g_in, I_stim) / C_m
    end
    input:
        I_stim pA <- current
    end
end
" ["not a spike input buffer",],
    );

    const ALPHA: &str = "
neuron alpha_psc:
    state:
        V_m mV = -70 mV
    end
    parameters:
        tau_m ms = 10 ms
        tau_syn ms = 2 ms
        C_m pF = 250 pF
        E_L mV = -70 mV
    end
    equations:
        shape I_shape = (e / tau_syn) * t * exp(-t / tau_syn)
        function I_syn pA = convolve(I_shape, spikes) * 1 pA
        V_m' = -(V_m - E_L) / tau_m + I_syn / C_m
    end
    input:
        spikes real <- spike
    end
    output: spike
end
";

    #[test]
    fn propagators_are_injected() {
        let _ = env_logger::builder().is_test(true).try_init();
        let model = parse_nestml_string(ALPHA).unwrap().remove(0);
        let validated =
            validate_model(model, Registry::new_shared(), &CompilerOptions::default()).unwrap();
        assert_eq!(validated.plan.exact().count(), 1);
        assert!(validated.symbols.variable("__h").is_some());
        assert!(validated.symbols.variable("__P__V_m__V_m").is_some());
        assert!(validated.symbols.variable("__P__V_m__1").is_some());
        let internals: Vec<String> = validated
            .model
            .declarations_of(ast::VarBlockKind::Internals)
            .map(|decl| decl.names[0].name.clone())
            .collect();
        assert_eq!(internals[0], "__h");
        assert!(validated.warnings.is_empty());
    }

    #[test]
    fn injection_can_be_disabled() {
        let model = parse_nestml_string(ALPHA).unwrap().remove(0);
        let options = CompilerOptions {
            inject_propagators: false,
            ..CompilerOptions::default()
        };
        let validated = validate_model(model, Registry::new_shared(), &options).unwrap();
        assert!(validated.symbols.variable("__h").is_none());
        assert_eq!(validated.model.declarations_of(ast::VarBlockKind::Internals).count(), 0);
    }

    #[test]
    fn models_are_checked_independently() {
        let text = format!(
            "{}
neuron broken:
    state:
        V_m mV = 0 mV
    end
    equations:
        V_m' = -V_m / tau_x
    end
end
",
            ALPHA
        );
        let models = parse_nestml_string(&text).unwrap();
        let results = validate_models(models, Registry::new_shared(), &CompilerOptions::default());
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());

        let err = check_string(&text, None, &CompilerOptions::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("Errors in 'broken'"));
        let only_alpha = check_string(&text, Some("alpha_psc"), &CompilerOptions::default());
        assert_eq!(only_alpha.unwrap().len(), 1);
        assert!(check_string(&text, Some("other"), &CompilerOptions::default()).is_err());
    }
}
