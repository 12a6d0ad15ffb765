//! AST to bytecode generation.
//!
//! The walk is a pair of borrows, `(&mut State, &Expr)`, dispatching over
//! the AST with exhaustive matches: `expr` lowers value-producing nodes,
//! `stmt` handles declarations and module-level statements, `types`
//! evaluates type expressions and drives the generic machinery.

pub mod expr;
pub mod stmt;
pub mod types;

pub use expr::generate_expr;

use crate::errors::Result;
use crate::language::State;
use crate::parser::ast::Expr;

/// Generate bytecode for a whole program into `state`.
pub fn generate(state: &mut State, exprs: &[Expr]) -> Result<()> {
    stmt::generate_program(state, exprs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::symbol::FunctionId;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::target::Target;

    fn lower(input: &str) -> Result<State> {
        let mut state = State::new(Target::new("x86_64-unknown-linux-gnu"));
        let source = state.sources.insert("test.qr", input);

        let tokens = Lexer::new(input, source).lex()?;
        let ast = Parser::new(tokens).parse()?;
        generate(&mut state, &ast)?;

        Ok(state)
    }

    #[test]
    fn test_every_block_ends_with_a_terminator() {
        let state = lower(
            "func main() -> i32 {
                let mut total = 0;
                let mut i = 0;
                while i < 10 {
                    if i == 5 {
                        break;
                    }
                    total = total + i;
                    i = i + 1;
                }
                return total;
            }",
        )
        .unwrap();

        for function in &state.functions {
            for &block in &function.blocks {
                let block = state.generator.block(block);
                assert!(
                    block.is_terminated(),
                    "block '{}' is not terminated",
                    block.name
                );
                assert!(block.instructions.last().unwrap().is_terminator());
            }
        }
    }

    #[test]
    fn test_constant_bounds_check() {
        let error = lower(
            "func main() {
                let a: [i32; 3] = [1, 2, 3];
                let x = a[5];
            }",
        )
        .unwrap_err();

        assert!(error.message().contains("out of bounds"));
        // The span points at the index expression itself.
        assert_eq!(error.span().len(), 1);
    }

    #[test]
    fn test_break_outside_loop_is_rejected() {
        let error = lower("func main() { break; }").unwrap_err();
        assert!(error.message().contains("'break' outside of a loop"));
    }

    #[test]
    fn test_missing_return_is_rejected() {
        let error = lower("func f() -> i32 { let x = 1; }").unwrap_err();
        assert!(error.message().contains("does not return a value"));
    }

    #[test]
    fn test_immutable_assignment_is_rejected() {
        let error = lower(
            "func main() {
                let x = 1;
                x = 2;
            }",
        )
        .unwrap_err();

        assert!(error.message().contains("immutable variable 'x'"));
    }

    #[test]
    fn test_static_assert_failure_carries_message() {
        let error = lower("static_assert(1 == 2, \"bad\");").unwrap_err();
        assert!(error.message().ends_with("bad"));
    }

    #[test]
    fn test_generic_alias_memoizes_instantiations() {
        let mut state = lower(
            "type Pair<T> = (T, T);
             func main() {
                let a: Pair<i32> = (1, 2);
                let b: Pair<i32> = (3, 4);
                let c: Pair<f64> = (1.0, 2.0);
             }",
        )
        .unwrap();

        let i32 = state.types.i32();
        let f64 = state.types.f64();

        let alias = state
            .aliases
            .iter_mut()
            .find(|alias| alias.name == "Pair")
            .unwrap();

        let int_pair = *alias.cache.get(&vec![i32]).unwrap();
        let float_pair = *alias.cache.get(&vec![f64]).unwrap();

        assert_eq!(alias.cache.len(), 2);
        assert_ne!(int_pair, float_pair);
        assert_eq!(int_pair, state.types.tuple_of(vec![i32, i32]));
    }

    #[test]
    fn test_type_mismatch_reports_both_types() {
        let error = lower(
            "func main() {
                let x: i32 = 1.5;
            }",
        )
        .unwrap_err();

        assert!(error.message().contains("i32"));
        assert!(error.message().contains("f64"));
    }

    #[test]
    fn test_enum_variants_are_enum_typed_constants() {
        let state = lower(
            "enum Color { Red, Green = 5, Blue, }
             func main() -> i32 {
                 let c = Color::Blue as i32;
                 return c;
             }",
        )
        .unwrap();

        let color = state
            .enums
            .iter()
            .find(|enumeration| enumeration.name == "Color")
            .unwrap();

        let Some(crate::language::Symbol::Variable(blue)) =
            state.scopes.resolve_local(color.scope, "Blue")
        else {
            panic!("expected a variant constant");
        };

        assert_eq!(blue.type_id, color.type_id);
        let constant = state.constants.get(blue.initializer.unwrap());
        assert_eq!(constant.kind, crate::language::ConstantKind::Int(6));
    }

    #[test]
    fn test_function_specialization_is_cached() {
        let state = lower(
            "func identity<T>(value: T) -> T {
                 return value;
             }

             func main() -> i32 {
                 let a = identity(1);
                 let b = identity(2);
                 let c = identity(1.5);
                 return a + b;
             }",
        )
        .unwrap();

        let template = state
            .functions
            .iter()
            .position(|function| function.name == "identity" && function.is_generic())
            .map(|index| FunctionId(index as u32))
            .unwrap();

        let specializations = &state.function(template).specializations;
        assert_eq!(specializations.len(), 2);

        let names: Vec<&str> = state
            .functions
            .iter()
            .filter(|function| function.name.starts_with("identity<"))
            .map(|function| function.name.as_str())
            .collect();
        assert!(names.contains(&"identity<i32>"));
        assert!(names.contains(&"identity<f64>"));
    }
}
