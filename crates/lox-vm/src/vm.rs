use std::fmt::Write as _;
use std::io::{self, Write};
use std::rc::Rc;

use hashbrown::HashMap;
use lox_core::{InterpretError, LoxError, Value};

use crate::chunk::Chunk;
use crate::compiler;
use crate::disasm;
use crate::opcodes::op;

/// Capacity of the value stack; pushing past it is a runtime error.
pub const STACK_MAX: usize = 256;

/// The bytecode virtual machine: a value stack, a globals table, and a
/// dispatch loop over one chunk at a time. `PRINT` output goes to the
/// injected writer; diagnostics and tracing go to stderr.
pub struct Vm<W: Write> {
    stack: Vec<Value>,
    globals: HashMap<Rc<str>, Value>,
    stdout: W,
    trace: bool,
}

impl Vm<io::Stdout> {
    pub fn new() -> Self {
        Vm::with_output(io::stdout())
    }
}

impl Default for Vm<io::Stdout> {
    fn default() -> Self {
        Vm::new()
    }
}

impl<W: Write> Vm<W> {
    pub fn with_output(stdout: W) -> Self {
        Vm {
            stack: Vec::with_capacity(STACK_MAX),
            globals: HashMap::new(),
            stdout,
            trace: false,
        }
    }

    /// Dump the stack and each instruction to stderr before executing it.
    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    /// Execute a chunk to completion. On a runtime error the stack is
    /// unwound and the error carries the source line of the faulting
    /// instruction; the globals table survives for the next run.
    pub fn run(&mut self, chunk: &Chunk) -> Result<(), LoxError> {
        let result = self.exec(chunk);
        if result.is_err() {
            self.stack.clear();
        }
        result
    }

    fn exec(&mut self, chunk: &Chunk) -> Result<(), LoxError> {
        let code = chunk.code.as_slice();
        let mut ip = 0usize;

        macro_rules! read_u8 {
            () => {{
                let v = code[ip];
                ip += 1;
                v
            }};
        }
        macro_rules! read_u16 {
            () => {{
                let v = u16::from_le_bytes([code[ip], code[ip + 1]]);
                ip += 2;
                v
            }};
        }
        macro_rules! read_u24 {
            () => {{
                let v = u32::from_le_bytes([code[ip], code[ip + 1], code[ip + 2], 0]);
                ip += 3;
                v
            }};
        }
        // Pop two numbers, push the result of `$op` wrapped in `$variant`.
        macro_rules! binary_number {
            ($variant:ident, $op:tt, $at:expr) => {{
                let b = self.pop(chunk, $at)?;
                let a = self.pop(chunk, $at)?;
                match (&a, &b) {
                    (Value::Number(x), Value::Number(y)) => {
                        self.push(Value::$variant(x $op y), chunk, $at)?;
                    }
                    _ => return Err(self.error(chunk, $at, "Operands must be numbers.")),
                }
            }};
        }

        while ip < code.len() {
            let at = ip;
            if self.trace {
                self.trace_instruction(chunk, at);
            }
            let opcode = read_u8!();
            match opcode {
                op::NOP => {}

                op::CONSTANT_8 => {
                    let idx = read_u8!() as usize;
                    self.push(chunk.constants[idx].clone(), chunk, at)?;
                }
                op::CONSTANT_16 => {
                    let idx = read_u16!() as usize;
                    self.push(chunk.constants[idx].clone(), chunk, at)?;
                }
                op::CONSTANT_24 => {
                    let idx = read_u24!() as usize;
                    self.push(chunk.constants[idx].clone(), chunk, at)?;
                }

                op::NDF_GLOBAL_8 => {
                    let idx = read_u8!() as usize;
                    self.define_global(chunk, idx, Value::Nil);
                }
                op::NDF_GLOBAL_16 => {
                    let idx = read_u16!() as usize;
                    self.define_global(chunk, idx, Value::Nil);
                }
                op::NDF_GLOBAL_24 => {
                    let idx = read_u24!() as usize;
                    self.define_global(chunk, idx, Value::Nil);
                }

                op::DEF_GLOBAL_8 => {
                    let idx = read_u8!() as usize;
                    let value = self.pop(chunk, at)?;
                    self.define_global(chunk, idx, value);
                }
                op::DEF_GLOBAL_16 => {
                    let idx = read_u16!() as usize;
                    let value = self.pop(chunk, at)?;
                    self.define_global(chunk, idx, value);
                }
                op::DEF_GLOBAL_24 => {
                    let idx = read_u24!() as usize;
                    let value = self.pop(chunk, at)?;
                    self.define_global(chunk, idx, value);
                }

                op::GET_GLOBAL_8 => {
                    let idx = read_u8!() as usize;
                    self.get_global(chunk, at, idx)?;
                }
                op::GET_GLOBAL_16 => {
                    let idx = read_u16!() as usize;
                    self.get_global(chunk, at, idx)?;
                }
                op::GET_GLOBAL_24 => {
                    let idx = read_u24!() as usize;
                    self.get_global(chunk, at, idx)?;
                }

                op::SET_GLOBAL_8 => {
                    let idx = read_u8!() as usize;
                    self.set_global(chunk, at, idx)?;
                }
                op::SET_GLOBAL_16 => {
                    let idx = read_u16!() as usize;
                    self.set_global(chunk, at, idx)?;
                }
                op::SET_GLOBAL_24 => {
                    let idx = read_u24!() as usize;
                    self.set_global(chunk, at, idx)?;
                }

                op::NIL => self.push(Value::Nil, chunk, at)?,
                op::TRUE => self.push(Value::Bool(true), chunk, at)?,
                op::FALSE => self.push(Value::Bool(false), chunk, at)?,

                op::EQUAL => {
                    let b = self.pop(chunk, at)?;
                    let a = self.pop(chunk, at)?;
                    self.push(Value::Bool(a == b), chunk, at)?;
                }
                op::NOT_EQUAL => {
                    let b = self.pop(chunk, at)?;
                    let a = self.pop(chunk, at)?;
                    self.push(Value::Bool(a != b), chunk, at)?;
                }
                op::LESS => binary_number!(Bool, <, at),
                op::LESS_EQUAL => binary_number!(Bool, <=, at),
                op::GREATER => binary_number!(Bool, >, at),
                op::GREATER_EQUAL => binary_number!(Bool, >=, at),

                op::ADD => {
                    let b = self.pop(chunk, at)?;
                    let a = self.pop(chunk, at)?;
                    match (&a, &b) {
                        (Value::Number(x), Value::Number(y)) => {
                            self.push(Value::Number(x + y), chunk, at)?;
                        }
                        (Value::String(x), Value::String(y)) => {
                            let mut joined = String::with_capacity(x.len() + y.len());
                            joined.push_str(x);
                            joined.push_str(y);
                            self.push(Value::string(joined), chunk, at)?;
                        }
                        _ => {
                            return Err(self.error(
                                chunk,
                                at,
                                "Operands must be two numbers or two strings.",
                            ));
                        }
                    }
                }
                op::SUBTRACT => binary_number!(Number, -, at),
                op::MULTIPLY => binary_number!(Number, *, at),
                op::DIVIDE => binary_number!(Number, /, at),

                op::NEGATE => {
                    let a = self.pop(chunk, at)?;
                    match a {
                        Value::Number(n) => self.push(Value::Number(-n), chunk, at)?,
                        _ => return Err(self.error(chunk, at, "Operand must be a number.")),
                    }
                }
                op::NOT => {
                    let a = self.pop(chunk, at)?;
                    self.push(Value::Bool(!a.is_truthy()), chunk, at)?;
                }

                op::PRINT => {
                    let value = self.pop(chunk, at)?;
                    let _ = writeln!(self.stdout, "{value}");
                }
                op::POP => {
                    self.pop(chunk, at)?;
                }
                op::RETURN => return Ok(()),

                op::JUMP => {
                    let offset = read_u16!() as usize;
                    ip += offset;
                }
                op::JUMP_IF_FALSE => {
                    let offset = read_u16!() as usize;
                    if !self.peek(chunk, at)?.is_truthy() {
                        ip += offset;
                    }
                }
                op::JUMP_IF_TRUE => {
                    let offset = read_u16!() as usize;
                    if self.peek(chunk, at)?.is_truthy() {
                        ip += offset;
                    }
                }

                _ => {
                    return Err(self.error(chunk, at, format!("Unknown opcode {opcode}.")));
                }
            }
        }

        // Every compiled chunk ends in RETURN; running off the end means a
        // malformed chunk, but it is not a crash.
        Ok(())
    }

    // ── Stack & globals helpers ──────────────────────────────────────

    fn push(&mut self, value: Value, chunk: &Chunk, at: usize) -> Result<(), LoxError> {
        if self.stack.len() >= STACK_MAX {
            return Err(self.error(chunk, at, "Stack overflow."));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self, chunk: &Chunk, at: usize) -> Result<Value, LoxError> {
        match self.stack.pop() {
            Some(value) => Ok(value),
            None => Err(self.error(chunk, at, "Stack underflow.")),
        }
    }

    fn peek(&self, chunk: &Chunk, at: usize) -> Result<&Value, LoxError> {
        match self.stack.last() {
            Some(value) => Ok(value),
            None => Err(LoxError::runtime(
                chunk.line_for_offset(at),
                "Stack underflow.",
            )),
        }
    }

    /// Name lookup for the global opcodes: the operand indexes a string
    /// constant. A non-string there is a compiler bug, so `as_string`
    /// panicking is the right response.
    fn global_name(chunk: &Chunk, idx: usize) -> &Rc<str> {
        chunk.constants[idx].as_string()
    }

    fn define_global(&mut self, chunk: &Chunk, idx: usize, value: Value) {
        let name = Self::global_name(chunk, idx).clone();
        self.globals.insert(name, value);
    }

    fn get_global(&mut self, chunk: &Chunk, at: usize, idx: usize) -> Result<(), LoxError> {
        let name = Self::global_name(chunk, idx);
        match self.globals.get(name.as_ref()) {
            Some(value) => {
                let value = value.clone();
                self.push(value, chunk, at)
            }
            None => Err(self.error(chunk, at, format!("Undefined variable '{name}'."))),
        }
    }

    /// Assignment requires the name to exist already; it never defines.
    /// The assigned value stays on the stack (assignment is an expression).
    fn set_global(&mut self, chunk: &Chunk, at: usize, idx: usize) -> Result<(), LoxError> {
        let name = Self::global_name(chunk, idx);
        let value = self.peek(chunk, at)?.clone();
        if let Some(slot) = self.globals.get_mut(name.as_ref()) {
            *slot = value;
            return Ok(());
        }
        Err(self.error(chunk, at, format!("Undefined variable '{name}'.")))
    }

    fn error(&self, chunk: &Chunk, at: usize, message: impl Into<String>) -> LoxError {
        LoxError::runtime(chunk.line_for_offset(at), message)
    }

    fn trace_instruction(&self, chunk: &Chunk, offset: usize) {
        let mut stack_repr = String::from("          ");
        for value in &self.stack {
            let _ = write!(stack_repr, "[ {value} ]");
        }
        eprintln!("{stack_repr}");
        eprintln!("{}", disasm::disassemble_instruction(chunk, offset));
    }
}

/// Compile and execute a source string with a fresh VM writing to stdout.
/// The returned error distinguishes the driver's two failure exit paths.
pub fn interpret(source: &str, trace: bool) -> Result<(), InterpretError> {
    let chunk = compiler::compile(source).map_err(InterpretError::Compile)?;
    let mut vm = Vm::new();
    vm.set_trace(trace);
    vm.run(&chunk).map_err(InterpretError::Runtime)
}

/// Same as [`interpret`], capturing PRINT output in the given writer.
pub fn interpret_with_output<W: Write>(source: &str, stdout: W) -> Result<(), InterpretError> {
    let chunk = compiler::compile(source).map_err(InterpretError::Compile)?;
    let mut vm = Vm::with_output(stdout);
    vm.run(&chunk).map_err(InterpretError::Runtime)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> Result<String, InterpretError> {
        let mut out = Vec::new();
        interpret_with_output(source, &mut out)?;
        Ok(String::from_utf8(out).expect("valid utf-8 output"))
    }

    fn runtime_message(source: &str) -> String {
        match run(source).unwrap_err() {
            InterpretError::Runtime(err) => err.to_string(),
            other => panic!("expected runtime error, got {other:?}"),
        }
    }

    #[test]
    fn test_print_arithmetic() {
        assert_eq!(run("print 1 + 2;").unwrap(), "3\n");
        assert_eq!(run("print 10 - 4 - 3;").unwrap(), "3\n");
        assert_eq!(run("print 2 * 3 + 4;").unwrap(), "10\n");
        assert_eq!(run("print 1 + 2 * 3;").unwrap(), "7\n");
        assert_eq!(run("print 7 / 2;").unwrap(), "3.5\n");
    }

    #[test]
    fn test_print_negation_and_not() {
        assert_eq!(run("print -5;").unwrap(), "-5\n");
        assert_eq!(run("print --5;").unwrap(), "5\n");
        assert_eq!(run("print !true;").unwrap(), "false\n");
        assert_eq!(run("print !nil;").unwrap(), "true\n");
        assert_eq!(run("print !0;").unwrap(), "false\n");
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(run("print \"ab\" + \"cd\";").unwrap(), "abcd\n");
        assert_eq!(run("print \"\" + \"x\";").unwrap(), "x\n");
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(run("print 1 < 2;").unwrap(), "true\n");
        assert_eq!(run("print 2 <= 2;").unwrap(), "true\n");
        assert_eq!(run("print 1 > 2;").unwrap(), "false\n");
        assert_eq!(run("print 2 >= 3;").unwrap(), "false\n");
    }

    #[test]
    fn test_equality() {
        assert_eq!(run("print 1 == 1;").unwrap(), "true\n");
        assert_eq!(run("print 1 != 2;").unwrap(), "true\n");
        assert_eq!(run("print \"a\" == \"a\";").unwrap(), "true\n");
        assert_eq!(run("print nil == nil;").unwrap(), "true\n");
        assert_eq!(run("print nil == false;").unwrap(), "false\n");
        assert_eq!(run("print 1 == \"1\";").unwrap(), "false\n");
    }

    #[test]
    fn test_globals_define_and_read() {
        assert_eq!(run("var x = 10; print x;").unwrap(), "10\n");
        assert_eq!(run("var x; print x;").unwrap(), "nil\n");
    }

    #[test]
    fn test_globals_assignment() {
        assert_eq!(run("var x = 10; x = x + 5; print x;").unwrap(), "15\n");
        // Assignment is an expression and leaves the value on the stack.
        assert_eq!(run("var x = 1; print x = 2;").unwrap(), "2\n");
    }

    #[test]
    fn test_global_redefinition_overwrites() {
        assert_eq!(run("var x = 1; var x = 2; print x;").unwrap(), "2\n");
        assert_eq!(run("var x = 1; var x; print x;").unwrap(), "nil\n");
    }

    #[test]
    fn test_undefined_variable_get() {
        let message = runtime_message("print y;");
        assert_eq!(message, "[line 1] Error: Undefined variable 'y'.");
    }

    #[test]
    fn test_undefined_variable_set() {
        let message = runtime_message("y = 1;");
        assert!(message.contains("Undefined variable 'y'."));
    }

    #[test]
    fn test_set_does_not_define() {
        // The failed assignment must not create the variable either.
        let mut out = Vec::new();
        let chunk = compiler::compile("y = 1;").unwrap();
        let mut vm = Vm::with_output(&mut out);
        assert!(vm.run(&chunk).is_err());
        let chunk = compiler::compile("print y;").unwrap();
        assert!(vm.run(&chunk).is_err());
    }

    #[test]
    fn test_type_errors() {
        assert!(runtime_message("print 1 + \"x\";")
            .contains("Operands must be two numbers or two strings."));
        assert!(runtime_message("print \"a\" - 1;").contains("Operands must be numbers."));
        assert!(runtime_message("print 1 < \"b\";").contains("Operands must be numbers."));
        assert!(runtime_message("print -\"a\";").contains("Operand must be a number."));
    }

    #[test]
    fn test_runtime_error_reports_line() {
        let message = runtime_message("var a = 1;\nvar b = \"s\";\nprint a + b;");
        assert!(message.starts_with("[line 3]"));
    }

    #[test]
    fn test_and_short_circuits() {
        assert_eq!(run("print false and 1;").unwrap(), "false\n");
        assert_eq!(run("print nil and 1;").unwrap(), "nil\n");
        assert_eq!(run("print true and 2;").unwrap(), "2\n");
        // The right operand must not run when skipped: `missing` is
        // undefined, so reaching it would be a runtime error.
        assert_eq!(run("print false and missing;").unwrap(), "false\n");
    }

    #[test]
    fn test_or_short_circuits() {
        assert_eq!(run("print 1 or 2;").unwrap(), "1\n");
        assert_eq!(run("print false or 2;").unwrap(), "2\n");
        assert_eq!(run("print nil or false;").unwrap(), "false\n");
        assert_eq!(run("print 1 or missing;").unwrap(), "1\n");
    }

    #[test]
    fn test_logical_operators_mix() {
        assert_eq!(run("print 1 and 2 or 3;").unwrap(), "2\n");
        assert_eq!(run("print false and 2 or 3;").unwrap(), "3\n");
    }

    #[test]
    fn test_return_stops_execution() {
        assert_eq!(run("print 1; return; print 2;").unwrap(), "1\n");
    }

    #[test]
    fn test_stack_overflow_is_an_error_not_a_crash() {
        // Right-nested additions keep every pending operand on the stack.
        let mut source = String::from("print 1");
        for _ in 0..STACK_MAX {
            source.push_str(" + (1");
        }
        for _ in 0..STACK_MAX {
            source.push(')');
        }
        source.push(';');
        let message = runtime_message(&source);
        assert!(message.contains("Stack overflow."));
    }

    #[test]
    fn test_globals_persist_across_runs() {
        let mut out = Vec::new();
        let mut vm = Vm::with_output(&mut out);
        let chunk = compiler::compile("var counter = 41;").unwrap();
        vm.run(&chunk).unwrap();
        let chunk = compiler::compile("print counter + 1;").unwrap();
        vm.run(&chunk).unwrap();
        drop(vm);
        assert_eq!(String::from_utf8(out).unwrap(), "42\n");
    }

    #[test]
    fn test_compile_error_prevents_execution() {
        let mut out = Vec::new();
        let result = interpret_with_output("print 1; print ;", &mut out);
        assert!(matches!(result, Err(InterpretError::Compile(_))));
        // Nothing ran, so nothing was printed.
        assert!(out.is_empty());
    }

    #[test]
    fn test_number_formatting_through_print() {
        assert_eq!(run("print 0.5 + 0.5;").unwrap(), "1\n");
        assert_eq!(run("print 1 / 3;").unwrap(), "0.3333333333333333\n");
    }
}
