//! Turns a declared experiment into the ordered sequence of concrete runs.
//!
//! Generation happens in three phases:
//! 1. expand every list argument into a cross product (declaration order,
//!    last-declared argument varies fastest);
//! 2. drop combinations rejected by the experiment's filter;
//! 3. resolve arguments in declaration order, then render the remaining
//!    blobs against the fully resolved mapping.

use std::path::Path;

use serde_json::Value;

use crate::bindings::Bindings;
use crate::blob::{has_placeholders, substitute};
use crate::error::SpecError;
use crate::experiment::{ArgumentValue, Experiment};
use crate::plan::Run;

pub fn generate(experiment: &Experiment, workdir: &Path) -> Result<Vec<Run>, SpecError> {
    let mut combinations = expand(&experiment.arguments);
    if let Some(filter) = &experiment.options.combinations_filter {
        let mut kept = Vec::with_capacity(combinations.len());
        for combo in combinations {
            if filter(&combo)? {
                kept.push(combo);
            }
        }
        combinations = kept;
    }

    let mut runs = Vec::with_capacity(combinations.len());
    for combo in &combinations {
        let args = resolve_arguments(&experiment.arguments, combo)?;
        runs.push(Run::build(experiment, args, workdir)?);
    }
    Ok(runs)
}

/// Cross product of all list arguments.
///
/// Literals are copied into every combination unevaluated, so a filter sees a
/// template such as `out_[[a]].txt` verbatim. Computed arguments stay pending
/// until [`resolve_arguments`].
pub fn expand(arguments: &[(String, ArgumentValue)]) -> Vec<Bindings> {
    let mut combos = vec![Bindings::new()];
    for (name, value) in arguments {
        match value {
            ArgumentValue::List(items) => {
                let mut next = Vec::with_capacity(combos.len() * items.len());
                for combo in &combos {
                    for item in items {
                        let mut c = combo.clone();
                        c.insert(name.as_str(), item.clone());
                        next.push(c);
                    }
                }
                combos = next;
            }
            ArgumentValue::Literal(v) => {
                combos.iter_mut().for_each(|c| c.insert(name.as_str(), v.clone()));
            }
            ArgumentValue::Computed(_) => {
                combos.iter_mut().for_each(|c| c.mark_pending(name));
            }
        }
    }
    combos
}

/// Resolves every argument of one combination in declaration order.
///
/// Each argument only sees the ones declared before it; reading a later one
/// fails with [`SpecError::Unresolved`]. Computed values keep their native
/// type; only string values with placeholders are substituted.
pub fn resolve_arguments(
    arguments: &[(String, ArgumentValue)],
    combo: &Bindings,
) -> Result<Bindings, SpecError> {
    let mut resolved = Bindings::new();
    for (name, _) in arguments {
        resolved.mark_pending(name);
    }
    for (name, value) in arguments {
        let raw = match value {
            ArgumentValue::Computed(f) => f(&resolved)?,
            ArgumentValue::Literal(v) => combo.lookup(name).cloned().unwrap_or_else(|| v.clone()),
            ArgumentValue::List(_) => combo.get(name)?.clone(),
        };
        let value = match raw {
            Value::String(s) if has_placeholders(&s) => Value::String(substitute(&s, &resolved)?),
            other => other,
        };
        resolved.insert(name.as_str(), value);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn workdir() -> PathBuf {
        PathBuf::from("/tmp/sweep_resolve")
    }

    #[test]
    fn cross_product_varies_last_argument_fastest() {
        let exp = Experiment::new("e", "touch output/a=[[a]]_b=[[b]]_c=[[c]].txt")
            .arg("a", ArgumentValue::list([1, 2]))
            .arg("b", ArgumentValue::list([1, 2, 3]))
            .arg("c", ArgumentValue::literal(0));
        let runs = generate(&exp, &workdir()).expect("generate");
        let commands: Vec<&str> = runs.iter().map(|r| r.command.as_str()).collect();
        assert_eq!(
            commands,
            vec![
                "touch output/a=1_b=1_c=0.txt",
                "touch output/a=1_b=2_c=0.txt",
                "touch output/a=1_b=3_c=0.txt",
                "touch output/a=2_b=1_c=0.txt",
                "touch output/a=2_b=2_c=0.txt",
                "touch output/a=2_b=3_c=0.txt",
            ]
        );
    }

    #[test]
    fn count_is_product_minus_filtered() {
        let exp = Experiment::new("e", "echo [[a]] [[b]] [[c]]")
            .arg("a", ArgumentValue::list(0..5))
            .arg("b", ArgumentValue::list(0..5))
            .arg("c", ArgumentValue::list(0..5))
            .combinations_filter(|args| Ok(args.i64("a")? + args.i64("b")? + args.i64("c")? == 4));
        let runs = generate(&exp, &workdir()).expect("generate");
        let rejected = (0..5)
            .flat_map(|a| (0..5).flat_map(move |b| (0..5).map(move |c| a + b + c)))
            .filter(|s| *s != 4)
            .count();
        assert_eq!(runs.len(), 125 - rejected);
        assert_eq!(runs.len(), 15);
    }

    #[test]
    fn empty_list_yields_no_runs() {
        let exp = Experiment::new("e", "echo [[a]]")
            .arg("a", ArgumentValue::list([1, 2]))
            .arg("b", ArgumentValue::List(vec![]));
        assert!(generate(&exp, &workdir()).expect("generate").is_empty());
    }

    #[test]
    fn no_arguments_yields_one_run() {
        let exp = Experiment::new("e", "true");
        assert_eq!(generate(&exp, &workdir()).expect("generate").len(), 1);
    }

    #[test]
    fn literal_template_is_resolved_not_expanded() {
        let exp = Experiment::new("e", "touch [[file]]")
            .arg("a", ArgumentValue::list([1, 2]))
            .arg("file", ArgumentValue::literal("output/a=[[a]].txt"))
            .creates_file("[[file]]");
        let runs = generate(&exp, &workdir()).expect("generate");
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[1].command, "touch output/a=2.txt");
        assert_eq!(
            runs[1].creates_file.as_deref(),
            Some(workdir().join("output/a=2.txt").as_path())
        );
    }

    #[test]
    fn computed_arguments_keep_native_values() {
        let triples: Vec<Value> = (0..3)
            .flat_map(|a| (0..3).map(move |b| json!({"a": a, "b": b})))
            .filter(|t| t["a"].as_i64().unwrap_or(0) + t["b"].as_i64().unwrap_or(0) == 2)
            .collect();
        let exp = Experiment::new("e", "echo $(([[a]] * [[a]] + [[b]] * [[b]]))")
            .arg("triple", ArgumentValue::List(triples))
            .arg("a", ArgumentValue::computed(|args| Ok(args.get("triple")?["a"].clone())))
            .arg("b", ArgumentValue::computed(|args| Ok(args.get("triple")?["b"].clone())))
            .stdout_file("output/sos_[[a]]_[[b]].txt");
        let runs = generate(&exp, &workdir()).expect("generate");
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].command, "echo $((0 * 0 + 2 * 2))");
        assert_eq!(runs[0].args.i64("a").expect("native int"), 0);
    }

    #[test]
    fn forward_reference_from_computed_argument_fails() {
        let exp = Experiment::new("e", "echo [[a]]")
            .arg("a", ArgumentValue::computed(|args| Ok(args.i64("b")? + 1)))
            .arg("b", ArgumentValue::list([1, 2]));
        let err = generate(&exp, &workdir()).expect_err("forward reference");
        assert_eq!(
            err,
            SpecError::Unresolved {
                name: "b".to_string()
            }
        );
    }

    #[test]
    fn forward_reference_from_literal_template_fails() {
        let exp = Experiment::new("e", "echo [[a]]")
            .arg("a", ArgumentValue::literal("x[[b]]"))
            .arg("b", ArgumentValue::list([1]));
        assert!(matches!(
            generate(&exp, &workdir()),
            Err(SpecError::ForwardPlaceholder { .. })
        ));
    }

    #[test]
    fn filter_does_not_see_computed_values() {
        let exp = Experiment::new("e", "echo [[a]] [[c]]")
            .arg("a", ArgumentValue::list([1, 2]))
            .arg("c", ArgumentValue::computed(|args| Ok(args.i64("a")? * 10)))
            .combinations_filter(|args| Ok(args.i64("c")? > 10));
        assert_eq!(
            generate(&exp, &workdir()).expect_err("computed is pending in filter"),
            SpecError::Unresolved {
                name: "c".to_string()
            }
        );
    }

    #[test]
    fn filter_sees_literal_template_unevaluated() {
        let exp = Experiment::new("e", "touch [[file]]")
            .arg("a", ArgumentValue::list([1, 2, 3]))
            .arg("file", ArgumentValue::literal("out_[[a]].txt"))
            .combinations_filter(|args| {
                Ok(args.str("file")? == "out_[[a]].txt" && args.i64("a")? != 2)
            });
        let runs = generate(&exp, &workdir()).expect("generate");
        let commands: Vec<&str> = runs.iter().map(|r| r.command.as_str()).collect();
        assert_eq!(commands, vec!["touch out_1.txt", "touch out_3.txt"]);
        assert_eq!(runs[1].args.str("file").expect("resolved"), "out_3.txt");
    }

    #[test]
    fn filter_error_aborts_generation() {
        let exp = Experiment::new("e", "echo [[a]]")
            .arg("a", ArgumentValue::list([1, 2]))
            .combinations_filter(|_| Err(SpecError::raised("boom")));
        assert_eq!(
            generate(&exp, &workdir()).expect_err("filter raised"),
            SpecError::Raised("boom".to_string())
        );
    }

    #[test]
    fn computed_name_and_output_file() {
        let exp = Experiment::new("calculate_[[op_name]]", "echo $(([[a]] [[operator]] [[b]]))")
            .arg("a", ArgumentValue::list([1]))
            .arg("b", ArgumentValue::list([3]))
            .arg("operator", ArgumentValue::list(["+", "*"]))
            .arg(
                "op_name",
                ArgumentValue::computed(|args| {
                    Ok(match args.str("operator")? {
                        "+" => "sum",
                        _ => "prod",
                    })
                }),
            )
            .stdout_file(crate::blob::Blob::computed(|args: &Bindings| {
                Ok(format!("output/{}.txt", args.str("op_name")?))
            }));
        let runs = generate(&exp, &workdir()).expect("generate");
        let names: Vec<&str> = runs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["calculate_sum", "calculate_prod"]);
        assert_eq!(runs[1].command, "echo $((1 * 3))");
        assert_eq!(
            runs[1].stdout_file.as_deref(),
            Some(workdir().join("output/prod.txt").as_path())
        );
    }
}
