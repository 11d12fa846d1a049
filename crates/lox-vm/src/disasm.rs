use std::fmt::Write;

use crate::chunk::{Chunk, Reader};
use crate::opcodes::Op;

fn op_name(op: Op) -> &'static str {
    match op {
        Op::Nop => "NOP",
        Op::Constant8 => "CONSTANT_8",
        Op::Constant16 => "CONSTANT_16",
        Op::Constant24 => "CONSTANT_24",
        Op::NdfGlobal8 => "NDF_GLOBAL_8",
        Op::NdfGlobal16 => "NDF_GLOBAL_16",
        Op::NdfGlobal24 => "NDF_GLOBAL_24",
        Op::DefGlobal8 => "DEF_GLOBAL_8",
        Op::DefGlobal16 => "DEF_GLOBAL_16",
        Op::DefGlobal24 => "DEF_GLOBAL_24",
        Op::GetGlobal8 => "GET_GLOBAL_8",
        Op::GetGlobal16 => "GET_GLOBAL_16",
        Op::GetGlobal24 => "GET_GLOBAL_24",
        Op::SetGlobal8 => "SET_GLOBAL_8",
        Op::SetGlobal16 => "SET_GLOBAL_16",
        Op::SetGlobal24 => "SET_GLOBAL_24",
        Op::Nil => "NIL",
        Op::True => "TRUE",
        Op::False => "FALSE",
        Op::Equal => "EQUAL",
        Op::NotEqual => "NOT_EQUAL",
        Op::Less => "LESS",
        Op::LessEqual => "LESS_EQUAL",
        Op::Greater => "GREATER",
        Op::GreaterEqual => "GREATER_EQUAL",
        Op::Add => "ADD",
        Op::Subtract => "SUBTRACT",
        Op::Multiply => "MULTIPLY",
        Op::Divide => "DIVIDE",
        Op::Negate => "NEGATE",
        Op::Not => "NOT",
        Op::Print => "PRINT",
        Op::Pop => "POP",
        Op::Return => "RETURN",
        Op::Jump => "JUMP",
        Op::JumpIfFalse => "JUMP_IF_FALSE",
        Op::JumpIfTrue => "JUMP_IF_TRUE",
    }
}

/// Render the instruction body (mnemonic + operands) under the reader's
/// cursor, consuming its operand bytes. Assumes `op` was just read.
fn write_body(out: &mut String, chunk: &Chunk, reader: &mut Reader<'_>, op: Op) {
    if op.reads_constant() {
        let idx = reader.read_index(op.operand_width());
        let value = &chunk.constants[idx as usize];
        let _ = write!(out, "{:<16} {idx:<4} '{value}'", op_name(op));
    } else if matches!(op, Op::Jump | Op::JumpIfFalse | Op::JumpIfTrue) {
        let offset = reader.read_u16();
        let target = reader.offset() + offset as usize;
        let _ = write!(out, "{:<16} {offset:<4} ; -> {target:04}", op_name(op));
    } else {
        let _ = write!(out, "{}", op_name(op));
    }
}

/// Produce a human-readable listing of a whole chunk.
///
/// One line per instruction: zero-padded offset, the source line (or `|`
/// when unchanged from the previous instruction), the mnemonic, and for
/// constant-bearing instructions the operand index plus the constant value.
/// Purely a function of the chunk contents.
pub fn disassemble(chunk: &Chunk, name: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {name} ==");

    let mut reader = chunk.reader();
    let mut prev_line = None;
    while let Some((offset, decoded, line)) = reader.next_op() {
        let _ = write!(out, "{offset:04} ");
        if prev_line == Some(line) {
            out.push_str("   | ");
        } else {
            let _ = write!(out, "{line:4} ");
        }
        prev_line = Some(line);

        match decoded {
            Ok(op) => write_body(&mut out, chunk, &mut reader, op),
            Err(byte) => {
                let _ = write!(out, "UNKNOWN({byte:#04x})");
            }
        }
        out.push('\n');
    }
    out
}

/// Disassemble the single instruction at `offset` (used by VM tracing).
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> String {
    let mut out = String::new();
    let mut reader = Reader::at(chunk, offset);
    if let Some((at, decoded, line)) = reader.next_op() {
        let _ = write!(out, "{at:04} {line:4} ");
        match decoded {
            Ok(op) => write_body(&mut out, chunk, &mut reader, op),
            Err(byte) => {
                let _ = write!(out, "UNKNOWN({byte:#04x})");
            }
        }
    }
    out
}
