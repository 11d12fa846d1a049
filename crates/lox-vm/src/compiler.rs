use lox_core::{LoxError, Value};
use lox_scanner::{Scanner, Token, TokenKind};

use crate::chunk::Chunk;
use crate::opcodes::Op;

/// Operator precedence levels, lowest to highest. Each level binds tighter
/// than the one before it; the parser climbs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < <= > >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Primary,
}

impl Precedence {
    /// The next-tighter level; used to make binary operators left-associative.
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary | Precedence::Primary => Precedence::Primary,
        }
    }
}

/// Compile a whole program into one chunk.
///
/// Scan and parse errors do not abort the pass: the compiler recovers at
/// statement boundaries and keeps going, so the caller sees every error at
/// once. Any error means the chunk must not be executed, so it is withheld.
pub fn compile(source: &str) -> Result<Chunk, Vec<LoxError>> {
    let mut compiler = Compiler::new(source);
    compiler.run();
    if compiler.errors.is_empty() {
        Ok(compiler.chunk)
    } else {
        Err(compiler.errors)
    }
}

/// Single-pass compiler: a scanner and a bytecode emitter sharing one
/// forward cursor over the source. No AST is built; expressions emit as
/// they parse, Pratt-style.
struct Compiler<'src> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    chunk: Chunk,
    errors: Vec<LoxError>,
    panic_mode: bool,
}

impl<'src> Compiler<'src> {
    fn new(source: &'src str) -> Self {
        let placeholder = Token {
            kind: TokenKind::Eof,
            lexeme: "",
            line: 1,
        };
        Compiler {
            scanner: Scanner::new(source),
            current: placeholder,
            previous: placeholder,
            chunk: Chunk::new(),
            errors: Vec::new(),
            panic_mode: false,
        }
    }

    fn run(&mut self) {
        self.advance();
        while !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.emit_op(Op::Return);
    }

    // ── Token plumbing ───────────────────────────────────────────────

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.next_token();
            match self.current.kind {
                TokenKind::Error(message) => self.error_at_current(message),
                _ => break,
            }
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    // ── Error reporting & recovery ───────────────────────────────────

    fn error_at_current(&mut self, message: &str) {
        let token = self.current;
        self.error_at(token, message);
    }

    fn error(&mut self, message: &str) {
        let token = self.previous;
        self.error_at(token, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        // Panic mode suppresses the error cascade that follows the first
        // mistake; synchronize() clears it at the next statement boundary.
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let location = match token.kind {
            TokenKind::Eof => " at end".to_string(),
            TokenKind::Error(_) => String::new(),
            _ => format!(" at '{}'", token.lexeme),
        };
        self.errors.push(LoxError::compile(token.line, location, message));
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while !self.check(TokenKind::Eof) {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Var | TokenKind::Print | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }

    // ── Statements ───────────────────────────────────────────────────

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn var_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect variable name.");
        let name = self.previous;
        let initialized = self.match_token(TokenKind::Equal);
        if initialized {
            self.expression();
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );
        let base = if initialized {
            Op::DefGlobal8
        } else {
            Op::NdfGlobal8
        };
        let idx = self.identifier_constant(name);
        self.chunk.write_indexed(base, idx, name.line);
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else {
            self.expression_statement();
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(Op::Print);
    }

    fn return_statement(&mut self) {
        // Top-level return ends the script; with functions absent it takes
        // no operand.
        self.consume(TokenKind::Semicolon, "Expect ';' after return.");
        self.emit_op(Op::Return);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(Op::Pop);
    }

    // ── Expressions (Pratt) ──────────────────────────────────────────

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        if !self.prefix(self.previous.kind, can_assign) {
            self.error("Expect expression.");
            return;
        }
        while precedence <= Self::infix_precedence(self.current.kind) {
            self.advance();
            self.infix(self.previous.kind);
        }
        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    /// Dispatch the prefix position. Returns false when the token cannot
    /// start an expression.
    fn prefix(&mut self, kind: TokenKind, can_assign: bool) -> bool {
        match kind {
            TokenKind::LeftParen => self.grouping(),
            TokenKind::Minus | TokenKind::Bang => self.unary(),
            TokenKind::Number => self.number(),
            TokenKind::String => self.string(),
            TokenKind::Nil | TokenKind::True | TokenKind::False => self.literal(),
            TokenKind::Identifier => self.variable(can_assign),
            _ => return false,
        }
        true
    }

    fn infix(&mut self, kind: TokenKind) {
        match kind {
            TokenKind::And => self.and_(),
            TokenKind::Or => self.or_(),
            _ => self.binary(kind),
        }
    }

    fn infix_precedence(kind: TokenKind) -> Precedence {
        match kind {
            TokenKind::Or => Precedence::Or,
            TokenKind::And => Precedence::And,
            TokenKind::EqualEqual | TokenKind::BangEqual => Precedence::Equality,
            TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual => Precedence::Comparison,
            TokenKind::Plus | TokenKind::Minus => Precedence::Term,
            TokenKind::Star | TokenKind::Slash => Precedence::Factor,
            _ => Precedence::None,
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self) {
        let operator = self.previous.kind;
        let line = self.previous.line;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Minus => self.chunk.write_op(Op::Negate, line),
            TokenKind::Bang => self.chunk.write_op(Op::Not, line),
            _ => unreachable!("unary dispatched on non-unary token"),
        }
    }

    fn binary(&mut self, operator: TokenKind) {
        let line = self.previous.line;
        self.parse_precedence(Self::infix_precedence(operator).next());
        let op = match operator {
            TokenKind::Plus => Op::Add,
            TokenKind::Minus => Op::Subtract,
            TokenKind::Star => Op::Multiply,
            TokenKind::Slash => Op::Divide,
            TokenKind::EqualEqual => Op::Equal,
            TokenKind::BangEqual => Op::NotEqual,
            TokenKind::Less => Op::Less,
            TokenKind::LessEqual => Op::LessEqual,
            TokenKind::Greater => Op::Greater,
            TokenKind::GreaterEqual => Op::GreaterEqual,
            _ => unreachable!("binary dispatched on non-binary token"),
        };
        self.chunk.write_op(op, line);
    }

    fn number(&mut self) {
        match self.previous.lexeme.parse::<f64>() {
            Ok(n) => self.emit_constant(Value::Number(n)),
            Err(_) => self.error("Invalid number literal."),
        }
    }

    fn string(&mut self) {
        let lexeme = self.previous.lexeme;
        // Trim the surrounding quotes; Lox strings have no escapes.
        let content = &lexeme[1..lexeme.len() - 1];
        self.emit_constant(Value::string(content));
    }

    fn literal(&mut self) {
        let op = match self.previous.kind {
            TokenKind::Nil => Op::Nil,
            TokenKind::True => Op::True,
            TokenKind::False => Op::False,
            _ => unreachable!("literal dispatched on non-literal token"),
        };
        self.emit_op(op);
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous;
        let idx = self.identifier_constant(name);
        if can_assign && self.match_token(TokenKind::Equal) {
            // Right-associative: the whole assignment level re-parses, so
            // `a = b = c` nests to the right. The assigned value stays on
            // the stack; assignment is itself an expression.
            self.expression();
            self.chunk.write_indexed(Op::SetGlobal8, idx, name.line);
        } else {
            self.chunk.write_indexed(Op::GetGlobal8, idx, name.line);
        }
    }

    /// `a and b`: if `a` is falsy it is the result and `b` never runs.
    fn and_(&mut self) {
        let line = self.previous.line;
        let end = self.emit_jump(Op::JumpIfFalse, line);
        self.chunk.write_op(Op::Pop, line);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end);
    }

    /// `a or b`: if `a` is truthy it is the result and `b` never runs.
    fn or_(&mut self) {
        let line = self.previous.line;
        let end = self.emit_jump(Op::JumpIfTrue, line);
        self.chunk.write_op(Op::Pop, line);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end);
    }

    // ── Emission helpers ─────────────────────────────────────────────

    fn emit_op(&mut self, op: Op) {
        let line = self.previous.line;
        self.chunk.write_op(op, line);
    }

    fn emit_constant(&mut self, value: Value) {
        let line = self.previous.line;
        match self.chunk.add_constant(value) {
            Some(idx) => self.chunk.write_indexed(Op::Constant8, idx, line),
            None => self.error("Too many constants in one chunk."),
        }
    }

    /// Intern an identifier's name in the constant pool, returning its index.
    fn identifier_constant(&mut self, name: Token<'src>) -> u32 {
        match self.chunk.add_constant(Value::string(name.lexeme)) {
            Some(idx) => idx,
            None => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    /// Emit a jump with a placeholder offset, returning the operand's
    /// position for `patch_jump`.
    fn emit_jump(&mut self, op: Op, line: u32) -> usize {
        self.chunk.write_op(op, line);
        self.chunk.write_byte(0xff, line);
        self.chunk.write_byte(0xff, line);
        self.chunk.code.len() - 2
    }

    /// Backpatch the operand at `at` with the forward distance from the end
    /// of the jump instruction to the current position.
    fn patch_jump(&mut self, at: usize) {
        let distance = self.chunk.code.len() - at - 2;
        if distance > u16::MAX as usize {
            self.error("Too much code to jump over.");
            return;
        }
        let bytes = (distance as u16).to_le_bytes();
        self.chunk.code[at] = bytes[0];
        self.chunk.code[at + 1] = bytes[1];
    }
}
