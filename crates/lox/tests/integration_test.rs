use lox_core::InterpretError;
use lox_vm::{compile, disassemble, interpret_with_output, Op};

/// Run a program, returning captured stdout on success.
fn run(source: &str) -> Result<String, InterpretError> {
    let mut out = Vec::new();
    interpret_with_output(source, &mut out)?;
    Ok(String::from_utf8(out).expect("valid utf-8 output"))
}

/// Run a program expected to fail, returning (exit code, rendered error,
/// captured stdout).
fn run_err(source: &str) -> (i32, String, String) {
    let mut out = Vec::new();
    let err = interpret_with_output(source, &mut out).expect_err("program should fail");
    (
        err.exit_code(),
        err.to_string(),
        String::from_utf8(out).expect("valid utf-8 output"),
    )
}

#[test]
fn test_scenario_numeric_addition() {
    assert_eq!(run("print 1 + 2;").unwrap(), "3\n");
}

#[test]
fn test_scenario_string_concatenation() {
    assert_eq!(run("print \"ab\" + \"cd\";").unwrap(), "abcd\n");
}

#[test]
fn test_scenario_global_assignment() {
    assert_eq!(run("var x = 10; x = x + 5; print x;").unwrap(), "15\n");
}

#[test]
fn test_scenario_undefined_variable() {
    let (code, message, stdout) = run_err("print y;");
    assert_eq!(code, 70);
    assert!(message.contains("Undefined variable 'y'."));
    assert!(message.contains("[line 1]"));
    assert!(stdout.is_empty());
}

#[test]
fn test_scenario_type_mismatch() {
    let (code, message, _) = run_err("print 1 + \"x\";");
    assert_eq!(code, 70);
    assert!(message.contains("[line 1]"));
    assert!(message.contains("Operands must be two numbers or two strings."));
}

#[test]
fn test_scenario_missing_semicolon() {
    let (code, message, stdout) = run_err("var a = 1 a = 2;");
    assert_eq!(code, 65);
    assert!(message.contains("Expect ';' after variable declaration."));
    assert!(stdout.is_empty(), "a flagged compile must not execute");
}

#[test]
fn test_scenario_chunk_shape() {
    use lox_vm::opcodes::op;

    let chunk = compile("1+2;").unwrap();
    assert_eq!(
        chunk.code,
        vec![
            op::CONSTANT_8,
            0,
            op::CONSTANT_8,
            1,
            op::ADD,
            op::POP,
            op::RETURN,
        ]
    );
    for offset in 0..chunk.code.len() {
        assert_eq!(chunk.line_for_offset(offset), 1);
    }
}

#[test]
fn test_scenario_disassembly() {
    let chunk = compile("1+2;").unwrap();
    let listing = disassemble(&chunk, "scenario");
    assert!(listing.starts_with("== scenario ==\n"));
    assert!(listing.contains("CONSTANT_8"));
    assert!(listing.contains("ADD"));
    assert!(listing.contains("RETURN"));
    assert_eq!(listing, disassemble(&chunk, "scenario"));
}

#[test]
fn test_multiline_program() {
    let source = "var a = 1;\nvar b = 2;\nprint a + b;\nprint a - b;\n";
    assert_eq!(run(source).unwrap(), "3\n-1\n");
}

#[test]
fn test_logical_operators_end_to_end() {
    assert_eq!(
        run("print nil or \"fallback\"; print 1 and 2;").unwrap(),
        "fallback\n2\n"
    );
}

#[test]
fn test_all_compile_errors_reported_before_exit() {
    let (code, message, _) = run_err("print ;\nprint ;");
    assert_eq!(code, 65);
    assert_eq!(message.matches("Expect expression.").count(), 2);
}

#[test]
fn test_wide_constant_pool_program_runs() {
    // 300 distinct literals pushes constant indices past the 8-bit form.
    let mut source = String::new();
    for i in 0..300 {
        source.push_str(&format!("var v{i} = {i};\n"));
    }
    source.push_str("print v299;\n");
    assert_eq!(run(&source).unwrap(), "299\n");

    let chunk = compile(&source).unwrap();
    let mut reader = chunk.reader();
    let mut saw_wide = false;
    while let Some((_, decoded, _)) = reader.next_op() {
        let op = decoded.expect("well-formed chunk");
        if op.operand_width() > 0 {
            reader.read_index(op.operand_width());
        }
        if matches!(op, Op::Constant16 | Op::DefGlobal16 | Op::GetGlobal16) {
            saw_wide = true;
        }
    }
    assert!(saw_wide);
}

#[test]
fn test_return_ends_script_cleanly() {
    assert_eq!(run("print \"before\"; return; print \"after\";").unwrap(), "before\n");
}
