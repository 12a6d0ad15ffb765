//! End-to-end pipeline tests: source text in, LLVM IR text (or a
//! diagnostic) out. Everything runs in-process; no external tools.

use std::fs;
use std::path::PathBuf;

use inkwell::context::Context;

use quartz_lib::bytecode::PassManager;
use quartz_lib::codegen::LlvmCodegen;
use quartz_lib::errors::Error;
use quartz_lib::irgen;
use quartz_lib::language::State;
use quartz_lib::lexer::Lexer;
use quartz_lib::parser::Parser;
use quartz_lib::target::Target;

fn compile(input: &str) -> Result<String, Error> {
    let mut state = State::new(Target::host());
    let source = state.sources.insert("test.qr", input);

    let tokens = Lexer::new(input, source).lex()?;
    let ast = Parser::new(tokens).parse()?;
    irgen::generate(&mut state, &ast)?;
    PassManager::default_passes().run(&mut state);

    let context = Context::create();
    let mut codegen = LlvmCodegen::new(&context, "test");
    codegen.generate(&state)?;

    Ok(codegen.module().print_to_string().to_string())
}

fn compile_file(path: &std::path::Path) -> Result<String, Error> {
    let input = fs::read_to_string(path).unwrap();

    let mut state = State::new(Target::host());
    state.root_dir = path.parent().map(|parent| parent.to_path_buf());
    let source = state.sources.insert(path.to_string_lossy(), input.clone());

    let tokens = Lexer::new(&input, source).lex()?;
    let ast = Parser::new(tokens).parse()?;
    irgen::generate(&mut state, &ast)?;
    PassManager::default_passes().run(&mut state);

    let context = Context::create();
    let mut codegen = LlvmCodegen::new(&context, "test");
    codegen.generate(&state)?;

    Ok(codegen.module().print_to_string().to_string())
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("quartz-e2e-{name}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_cast_chain_lowers_to_trunc_and_sext() {
    let ir = compile(
        "func narrow(x: i32) -> i32 {
            return x as i8 as i32;
        }

        func main() -> i32 {
            return narrow(300);
        }",
    )
    .unwrap();

    assert!(ir.contains("trunc"), "missing trunc in:\n{ir}");
    assert!(ir.contains("sext"), "missing sext in:\n{ir}");
}

#[test]
fn test_constant_cast_chain_compiles() {
    let ir = compile(
        "func main() -> i32 {
            return 300 as i8 as i32;
        }",
    )
    .unwrap();

    assert!(ir.contains("define i32 @main"));
}

#[test]
fn test_dead_functions_are_eliminated() {
    let ir = compile(
        "func unused() {
        }

        func main() {
        }",
    )
    .unwrap();

    assert!(ir.contains("@main"));
    assert!(!ir.contains("@unused"), "unused survived in:\n{ir}");
}

#[test]
fn test_transitively_dead_functions_are_eliminated() {
    let ir = compile(
        "func helper() -> i32 {
            return 1;
        }

        func orphan() -> i32 {
            return helper();
        }

        func main() -> i32 {
            return 0;
        }",
    )
    .unwrap();

    assert!(!ir.contains("@orphan"));
    assert!(!ir.contains("@helper"));
}

#[test]
fn test_recursion_reachable_from_main_survives() {
    let ir = compile(
        "func odd(n: i32) -> bool {
            if n == 0 {
                return false;
            }
            return even(n - 1);
        }

        func even(n: i32) -> bool {
            if n == 0 {
                return true;
            }
            return odd(n - 1);
        }

        func main() -> i32 {
            if even(10) {
                return 1;
            }
            return 0;
        }",
    )
    .unwrap();

    assert!(ir.contains("@odd"));
    assert!(ir.contains("@even"));
}

#[test]
fn test_generic_alias_shares_one_instantiation() {
    let ir = compile(
        "type Pair<T> = (T, T);

        func main() -> i32 {
            let a: Pair<i32> = (1, 2);
            let b: Pair<i32> = (3, 4);
            return 0;
        }",
    )
    .unwrap();

    assert!(ir.contains("{ i32, i32 }"));
}

#[test]
fn test_structs_methods_and_enums() {
    let ir = compile(
        "struct Point {
            pub x: i32,
            pub y: i32,
        }

        impl Point {
            func manhattan(self) -> i32 {
                return self.x + self.y;
            }
        }

        enum Direction {
            North,
            South = 5,
        }

        func main() -> i32 {
            let p = Point(x: 3, y: 4);
            let d = Direction::South;

            return match d as i32 {
                5 => p.manhattan(),
                _ => 0,
            };
        }",
    )
    .unwrap();

    assert!(ir.contains("%Point = type { i32, i32 }"));
    assert!(ir.contains("@main"));
    assert!(ir.contains("Point::manhattan"));
}

#[test]
fn test_extern_varargs_and_strings() {
    let ir = compile(
        "extern \"C\" func printf(fmt: cstr, ...args) -> i32;

        func main() -> i32 {
            printf(\"%d plus %d\\n\", 1, 2);
            return 0;
        }",
    )
    .unwrap();

    assert!(ir.contains("declare i32 @printf(ptr, ...)"));
    assert!(ir.contains("%d plus %d"));
}

#[test]
fn test_globals_get_constant_initializers() {
    let ir = compile(
        "let mut counter: i64 = 40 + 2;

        func main() -> i64 {
            counter = counter + 1;
            return counter;
        }",
    )
    .unwrap();

    assert!(ir.contains("@counter = global i64 42"));
}

#[test]
fn test_while_loop_and_pointers() {
    let ir = compile(
        "func sum(values: *i32, count: i32) -> i32 {
            let mut total = 0;
            let mut i = 0;
            while i < count {
                total = total + values[i];
                i = i + 1;
            }
            return total;
        }

        func main() -> i32 {
            let values: [i32; 3] = [1, 2, 3];
            return sum(&values as *i32, 3);
        }",
    )
    .unwrap();

    assert!(ir.contains("getelementptr"));
    assert!(ir.contains("br i1"));
}

#[test]
fn test_static_assert_failure() {
    let error = compile("static_assert(1 == 2, \"bad\");").unwrap_err();
    assert!(error.message().ends_with("bad"));
}

#[test]
fn test_out_of_bounds_constant_index() {
    let error = compile(
        "func main() {
            let a: [i32; 3] = [1, 2, 3];
            let x = a[5];
        }",
    )
    .unwrap_err();

    assert!(error.message().contains("out of bounds"));
}

#[test]
fn test_import_cycle_is_reported() {
    let dir = scratch_dir("cycle");
    fs::write(dir.join("a.qr"), "import b;\nfunc main() {}\n").unwrap();
    fs::write(dir.join("b.qr"), "import a;\n").unwrap();

    let error = compile_file(&dir.join("a.qr")).unwrap_err();
    assert!(
        error.message().contains("circular"),
        "unexpected message: {}",
        error.message()
    );
}

#[test]
fn test_import_shares_public_symbols() {
    let dir = scratch_dir("shared");
    fs::write(
        dir.join("math.qr"),
        "pub func double(x: i32) -> i32 {
            return x * 2;
        }",
    )
    .unwrap();
    fs::write(
        dir.join("main.qr"),
        "import math;

        func main() -> i32 {
            return math::double(21);
        }",
    )
    .unwrap();

    let ir = compile_file(&dir.join("main.qr")).unwrap();
    assert!(ir.contains("math::double"));
}

#[test]
fn test_private_imports_are_rejected() {
    let dir = scratch_dir("private");
    fs::write(dir.join("secret.qr"), "func hidden() {}\n").unwrap();
    fs::write(
        dir.join("main.qr"),
        "import secret;

        func main() {
            secret::hidden();
        }",
    )
    .unwrap();

    let error = compile_file(&dir.join("main.qr")).unwrap_err();
    assert!(error.message().contains("private"));
}

#[test]
fn test_generic_function_specialization_in_ir() {
    let ir = compile(
        "func max<T>(a: T, b: T) -> T {
            return a > b ? a : b;
        }

        func main() -> i32 {
            return max(1, 2);
        }",
    )
    .unwrap();

    assert!(ir.contains("max<i32>"));
}

#[test]
fn test_ternary_and_match_expression_values() {
    let ir = compile(
        "func pick(flag: bool) -> i32 {
            let value = flag ? 10 : 20;
            return match value {
                10 => 1,
                20 => 2,
                _ => 0,
            };
        }

        func main() -> i32 {
            return pick(true);
        }",
    )
    .unwrap();

    assert!(ir.contains("@main"));
    assert!(ir.contains("pick"));
}

#[test]
fn test_tuple_destructuring_with_rest() {
    let ir = compile(
        "func main() -> i32 {
            let quad = (1, 2, 3, 4);
            let (first, *middle, last) = quad;
            let (a, b) = middle;
            return first + a + b + last;
        }",
    )
    .unwrap();

    assert!(ir.contains("@main"));
}
