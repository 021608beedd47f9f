//! Structural parse of a step body.
//!
//! This is not a full C# parser. It recovers exactly what the step protocol
//! needs: directives and imports, declarations, the kind of every top-level
//! statement, every call site with its loop nesting, and simple assignments.

use serde::Serialize;

use super::lexer::{lex, Directive, Hole, Spanned, Token};

/// Modifiers that may precede a declaration.
const MODIFIERS: &[&str] = &[
    "public", "private", "protected", "internal", "static", "sealed", "abstract", "partial",
    "readonly", "unsafe", "async", "virtual", "override", "extern", "const", "volatile",
    "required", "file",
];

/// Keywords that introduce a type or namespace declaration.
const TYPE_KEYWORDS: &[&str] = &[
    "class", "struct", "interface", "enum", "record", "delegate", "namespace",
];

/// Keywords that can never start a type in a declaration.
const NON_TYPE_KEYWORDS: &[&str] = &[
    "return", "new", "await", "throw", "if", "else", "for", "foreach", "while", "do", "switch",
    "case", "default", "break", "continue", "goto", "yield", "using", "lock", "try", "catch",
    "finally", "checked", "unchecked", "fixed", "typeof", "sizeof", "nameof", "this", "base",
    "true", "false", "null", "is", "as", "in", "out", "stackalloc", "when",
];

/// Keywords followed by parentheses that are not calls.
const NON_CALL_KEYWORDS: &[&str] = &[
    "if", "while", "for", "foreach", "switch", "catch", "using", "lock", "fixed", "nameof",
    "typeof", "sizeof", "default", "checked", "unchecked", "when", "return", "this", "base",
    "await", "throw", "new",
];

/// What kind of declaration was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclarationKind {
    /// `class`, `struct`, `interface`, `enum`, `record` or `delegate`.
    Type(String),
    Namespace,
    /// Method, local function or property.
    Member,
}

/// A declaration the step protocol forbids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Declaration {
    pub kind: DeclarationKind,
    pub name: String,
    pub line: usize,
}

/// An import-style directive: `using X;`, `global using`, `extern alias`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Import {
    pub text: String,
    pub line: usize,
}

/// Classification of a top-level statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Executable,
    /// Simple field-style declaration such as `var x = Foo();`.
    Field,
    Import,
    Declaration,
}

/// A top-level statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub kind: StatementKind,
    pub line: usize,
}

/// A call argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Argument {
    /// A string literal, or a `+` concatenation of string literals.
    /// Interpolated strings with holes are never literals.
    Literal(String),
    /// Anything else, rendered back to approximate source.
    Expression(String),
}

impl Argument {
    /// Returns the literal value, if the argument is a constant string.
    pub fn literal(&self) -> Option<&str> {
        match self {
            Argument::Literal(value) => Some(value),
            Argument::Expression(_) => None,
        }
    }

    /// Renders the argument as source text.
    pub fn render(&self) -> String {
        match self {
            Argument::Literal(value) => format!("{:?}", value),
            Argument::Expression(text) => text.clone(),
        }
    }
}

/// One call expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSite {
    pub name: String,
    /// Dotted receiver chain, e.g. `File` for `File.Delete(...)`.
    pub receiver: Option<String>,
    pub arguments: Vec<Argument>,
    pub line: usize,
    /// True if the call sits lexically inside a loop header or body.
    pub in_loop: bool,
}

impl CallSite {
    /// Returns `Receiver.Name`, or just the name without a receiver.
    pub fn qualified_name(&self) -> String {
        match &self.receiver {
            Some(receiver) => format!("{}.{}", receiver, self.name),
            None => self.name.clone(),
        }
    }

    /// Returns the first argument if it is a string literal.
    pub fn first_literal(&self) -> Option<&str> {
        self.arguments.first().and_then(Argument::literal)
    }
}

/// An assignment of a value to a simple name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub target: String,
    /// Set when the value is a string literal or literal concatenation.
    pub literal: Option<String>,
    pub line: usize,
}

/// Parsed view of a step body.
#[derive(Debug, Clone, Default)]
pub struct ScriptSyntax {
    pub directives: Vec<Directive>,
    pub imports: Vec<Import>,
    pub declarations: Vec<Declaration>,
    /// Top-level statements only.
    pub statements: Vec<Statement>,
    pub calls: Vec<CallSite>,
    pub assignments: Vec<Assignment>,
    /// Lexical diagnostics; informational only.
    pub diagnostics: Vec<String>,
}

impl ScriptSyntax {
    /// Returns true if at least one top-level statement is executable.
    pub fn has_executable_statement(&self) -> bool {
        self.statements
            .iter()
            .any(|s| s.kind == StatementKind::Executable)
    }
}

/// Parses a step body.
pub fn parse(source: &str) -> ScriptSyntax {
    let lexed = lex(source);
    let mut parser = Parser {
        tokens: &lexed.tokens,
        out: ScriptSyntax {
            directives: lexed.directives.clone(),
            diagnostics: lexed.diagnostics.clone(),
            ..Default::default()
        },
    };
    parser.program();
    parser.out
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    out: ScriptSyntax,
}

impl<'a> Parser<'a> {
    fn tok(&self, pos: usize) -> Option<&'a Token> {
        self.tokens.get(pos).map(|t| &t.token)
    }

    fn line(&self, pos: usize) -> usize {
        self.tokens
            .get(pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |t| t.line)
    }

    fn is_punct(&self, pos: usize, c: char) -> bool {
        self.tok(pos).is_some_and(|t| t.is_punct(c))
    }

    fn is_ident(&self, pos: usize, word: &str) -> bool {
        self.tok(pos).is_some_and(|t| t.is_ident(word))
    }

    fn program(&mut self) {
        let mut pos = 0;
        while pos < self.tokens.len() {
            let line = self.line(pos);
            let (next, kind) = self.statement(pos, 0);
            if let Some(kind) = kind {
                self.out.statements.push(Statement { kind, line });
            }
            pos = next.max(pos + 1);
        }
    }

    /// Parses one statement starting at `pos`, returning the position after it.
    fn statement(&mut self, pos: usize, loops: usize) -> (usize, Option<StatementKind>) {
        let Some(token) = self.tok(pos) else {
            return (pos, None);
        };

        match token {
            Token::Punct(';') | Token::Punct('}') => (pos + 1, None),
            Token::Punct('{') => (self.block(pos, loops), Some(StatementKind::Executable)),
            Token::Ident(word) => {
                let word = word.clone();
                self.keyword_statement(&word, pos, loops)
            }
            _ => (
                self.expression_statement(pos, loops),
                Some(StatementKind::Executable),
            ),
        }
    }

    fn keyword_statement(
        &mut self,
        word: &str,
        pos: usize,
        loops: usize,
    ) -> (usize, Option<StatementKind>) {
        let executable = Some(StatementKind::Executable);
        match word {
            "using" => self.using(pos, loops),
            "global" if self.is_ident(pos + 1, "using") => self.import(pos),
            "extern" if self.is_ident(pos + 1, "alias") => self.import(pos),
            "for" | "foreach" | "while" => {
                let body = self.header(pos + 1, loops + 1);
                (self.statement(body, loops + 1).0, executable)
            }
            "do" => {
                let mut end = self.statement(pos + 1, loops + 1).0;
                if self.is_ident(end, "while") {
                    end = self.header(end + 1, loops + 1);
                    if self.is_punct(end, ';') {
                        end += 1;
                    }
                }
                (end, executable)
            }
            "if" | "switch" | "lock" | "fixed" => {
                let body = self.header(pos + 1, loops);
                let mut end = self.statement(body, loops).0;
                if word == "if" && self.is_ident(end, "else") {
                    end = self.statement(end + 1, loops).0;
                }
                (end, executable)
            }
            "else" | "checked" | "unchecked" | "unsafe" if self.is_punct(pos + 1, '{') => {
                (self.statement(pos + 1, loops).0, executable)
            }
            "try" => (self.try_statement(pos, loops), executable),
            "case" => (self.case_label(pos, loops), None),
            "default" if self.is_punct(pos + 1, ':') => (pos + 2, None),
            "return" | "throw" | "break" | "continue" | "goto" | "yield" | "await" => {
                (self.expression_statement(pos, loops), executable)
            }
            _ if self.is_punct(pos + 1, ':') => (pos + 2, None),
            _ => self.declaration_or_expression(pos, loops),
        }
    }

    fn using(&mut self, pos: usize, loops: usize) -> (usize, Option<StatementKind>) {
        if self.is_punct(pos + 1, '(') {
            let body = self.header(pos + 1, loops);
            return (self.statement(body, loops).0, Some(StatementKind::Executable));
        }
        if self.is_ident(pos + 1, "static") || self.looks_like_import(pos + 1) {
            return self.import(pos);
        }
        // `using var x = ...;` is a declaration with a disposal scope.
        self.declaration_or_expression(pos + 1, loops)
    }

    /// `using A.B.C;` or `using Alias = A.B<C>;`
    fn looks_like_import(&self, start: usize) -> bool {
        let mut pos = start;
        let mut saw_ident = false;
        while let Some(token) = self.tok(pos) {
            match token {
                Token::Punct(';') => return saw_ident,
                Token::Ident(name) if name == "var" && pos == start => return false,
                Token::Ident(_) => saw_ident = true,
                Token::Punct('.' | '=' | '<' | '>' | ',') | Token::Op("::") => {}
                _ => return false,
            }
            pos += 1;
        }
        false
    }

    fn import(&mut self, pos: usize) -> (usize, Option<StatementKind>) {
        let end = self.statement_end(pos);
        let text = self.render(pos, end);
        self.out.imports.push(Import {
            text,
            line: self.line(pos),
        });
        (end, Some(StatementKind::Import))
    }

    fn try_statement(&mut self, pos: usize, loops: usize) -> usize {
        let mut end = self.statement(pos + 1, loops).0;
        loop {
            if self.is_ident(end, "catch") {
                end += 1;
                if self.is_punct(end, '(') {
                    end = self.header(end, loops);
                }
                if self.is_ident(end, "when") {
                    end = self.header(end + 1, loops);
                }
                end = self.statement(end, loops).0;
            } else if self.is_ident(end, "finally") {
                end = self.statement(end + 1, loops).0;
            } else {
                return end;
            }
        }
    }

    fn case_label(&mut self, pos: usize, loops: usize) -> usize {
        let mut p = pos + 1;
        while let Some(token) = self.tok(p) {
            match token {
                Token::Punct(':') => {
                    self.scan_calls(pos + 1, p, loops);
                    return p + 1;
                }
                Token::Punct('(' | '[' | '{') => p = self.matching(p) + 1,
                Token::Punct(';' | '}') => break,
                _ => p += 1,
            }
        }
        self.expression_statement(pos, loops)
    }

    /// Parses a parenthesized header at `pos`, scanning it for calls.
    fn header(&mut self, pos: usize, loops: usize) -> usize {
        if !self.is_punct(pos, '(') {
            return pos;
        }
        let close = self.matching(pos);
        self.scan_calls(pos + 1, close, loops);
        (close + 1).min(self.tokens.len())
    }

    fn block(&mut self, open: usize, loops: usize) -> usize {
        let close = self.matching(open);
        self.block_contents(open + 1, close, loops);
        (close + 1).min(self.tokens.len())
    }

    fn block_contents(&mut self, start: usize, end: usize, loops: usize) {
        let mut pos = start;
        while pos < end {
            let (next, _) = self.statement(pos, loops);
            if next > end {
                break;
            }
            pos = next.max(pos + 1);
        }
    }

    fn declaration_or_expression(
        &mut self,
        pos: usize,
        loops: usize,
    ) -> (usize, Option<StatementKind>) {
        let mut p = pos;
        while self
            .tok(p)
            .and_then(Token::ident)
            .is_some_and(|w| MODIFIERS.contains(&w))
        {
            p += 1;
        }

        if let Some(keyword) = self.tok(p).and_then(Token::ident) {
            if TYPE_KEYWORDS.contains(&keyword) {
                return (self.type_declaration(p), Some(StatementKind::Declaration));
            }
        }

        if let Some(after_type) = self.type_expr(p) {
            if let Some(name) = self.tok(after_type).and_then(Token::ident) {
                if !NON_TYPE_KEYWORDS.contains(&name) {
                    let name = name.to_string();
                    if let Some(result) = self.declarator(pos, after_type, name, loops) {
                        return result;
                    }
                }
            }
        }

        (
            self.expression_statement(pos, loops),
            Some(StatementKind::Executable),
        )
    }

    /// Handles `Type name ...` once the type and name are known.
    fn declarator(
        &mut self,
        start: usize,
        name_pos: usize,
        name: String,
        loops: usize,
    ) -> Option<(usize, Option<StatementKind>)> {
        let next = name_pos + 1;
        let line = self.line(name_pos);
        let member = |parser: &mut Self, end: usize| {
            parser.out.declarations.push(Declaration {
                kind: DeclarationKind::Member,
                name: name.clone(),
                line,
            });
            Some((end, Some(StatementKind::Declaration)))
        };

        match self.tok(next)? {
            Token::Punct('(') => {
                let close = self.matching(next);
                let mut body = close + 1;
                if self.is_ident(body, "where") {
                    while self.tok(body).is_some_and(|t| !t.is_punct('{') && !t.is_op("=>")) {
                        body += 1;
                    }
                }
                if self.is_punct(body, '{') {
                    let end = self.block(body, loops);
                    member(self, end)
                } else if self.tok(body).is_some_and(|t| t.is_op("=>")) {
                    let end = self.expression_statement(body + 1, loops);
                    member(self, end)
                } else {
                    None
                }
            }
            Token::Punct('{') => {
                let mut end = (self.matching(next) + 1).min(self.tokens.len());
                if self.is_punct(end, '=') {
                    end = self.statement_end(end);
                }
                member(self, end)
            }
            Token::Op("=>") => {
                let end = self.expression_statement(next + 1, loops);
                member(self, end)
            }
            Token::Punct('=' | ';' | ',') => {
                if self.is_punct(next, '=') {
                    self.record_assignment(&name, next + 1, line);
                }
                let end = self.statement_end(start);
                self.scan_calls(next, end, loops);
                Some((end, Some(StatementKind::Field)))
            }
            _ => None,
        }
    }

    fn type_declaration(&mut self, keyword_pos: usize) -> usize {
        let keyword = self
            .tok(keyword_pos)
            .and_then(Token::ident)
            .unwrap_or_default()
            .to_string();
        let mut name_pos = keyword_pos + 1;
        if keyword == "record" && (self.is_ident(name_pos, "struct") || self.is_ident(name_pos, "class")) {
            name_pos += 1;
        }
        if keyword == "delegate" {
            name_pos = self.type_expr(name_pos).unwrap_or(name_pos);
        }

        let mut name = String::new();
        let mut p = name_pos;
        while let Some(token) = self.tok(p) {
            match token {
                Token::Ident(part) => name.push_str(part),
                Token::Punct('.') if keyword == "namespace" => name.push('.'),
                _ => break,
            }
            p += 1;
            if keyword != "namespace" {
                break;
            }
        }

        let kind = if keyword == "namespace" {
            DeclarationKind::Namespace
        } else {
            DeclarationKind::Type(keyword)
        };
        self.out.declarations.push(Declaration {
            kind,
            name,
            line: self.line(keyword_pos),
        });

        let mut p = name_pos;
        while let Some(token) = self.tok(p) {
            match token {
                Token::Punct('(' | '[') => p = self.matching(p) + 1,
                Token::Punct('{') => return (self.matching(p) + 1).min(self.tokens.len()),
                Token::Punct(';') => return p + 1,
                _ => p += 1,
            }
        }
        self.tokens.len()
    }

    /// Parses a type at `pos`, returning the position after it.
    fn type_expr(&self, pos: usize) -> Option<usize> {
        let first = self.tok(pos)?.ident()?;
        if NON_TYPE_KEYWORDS.contains(&first) || TYPE_KEYWORDS.contains(&first) {
            return None;
        }
        let mut p = pos + 1;
        while self
            .tok(p)
            .is_some_and(|t| t.is_punct('.') || t.is_op("::"))
            && self.tok(p + 1).and_then(Token::ident).is_some()
        {
            p += 2;
        }
        if self.is_punct(p, '<') {
            p = self.generic_args(p)?;
        }
        loop {
            if self.is_punct(p, '?') || self.is_punct(p, '*') {
                p += 1;
            } else if self.is_punct(p, '[') {
                let mut q = p + 1;
                while self.is_punct(q, ',') {
                    q += 1;
                }
                if !self.is_punct(q, ']') {
                    break;
                }
                p = q + 1;
            } else {
                break;
            }
        }
        Some(p)
    }

    /// Skips a generic argument list starting at `<`, if it looks like one.
    fn generic_args(&self, open: usize) -> Option<usize> {
        let mut depth = 0usize;
        let mut p = open;
        while let Some(token) = self.tok(p) {
            match token {
                Token::Punct('<') => depth += 1,
                Token::Punct('>') => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(p + 1);
                    }
                }
                Token::Ident(_) | Token::Punct('.' | ',' | '?' | '[' | ']' | '(' | ')') => {}
                _ => return None,
            }
            p += 1;
        }
        None
    }

    fn expression_statement(&mut self, pos: usize, loops: usize) -> usize {
        let end = self.statement_end(pos);
        if self.tok(pos).and_then(Token::ident).is_some() && self.is_punct(pos + 1, '=') {
            let target = self
                .tok(pos)
                .and_then(Token::ident)
                .unwrap_or_default()
                .to_string();
            self.record_assignment(&target, pos + 2, self.line(pos));
        }
        self.scan_calls(pos, end, loops);
        end
    }

    fn record_assignment(&mut self, target: &str, value_pos: usize, line: usize) {
        let end = self.statement_end(value_pos);
        let literal = self.literal_concat(value_pos, end);
        self.out.assignments.push(Assignment {
            target: target.to_string(),
            literal,
            line,
        });
    }

    /// Returns the concatenated value if `start..end` is `"a" + "b" + ...`.
    fn literal_concat(&self, start: usize, end: usize) -> Option<String> {
        let mut value = String::new();
        let mut expect_literal = true;
        let mut any = false;
        for token in self.tokens[start.min(end)..end].iter().map(|t| &t.token) {
            match token {
                Token::Str(part) if expect_literal => {
                    value.push_str(part);
                    expect_literal = false;
                    any = true;
                }
                Token::Punct('+') if !expect_literal => expect_literal = true,
                Token::Punct(';') => break,
                _ => return None,
            }
        }
        (any && !expect_literal).then_some(value)
    }

    /// Position just after the terminating `;`, or at an unmatched closer.
    fn statement_end(&self, pos: usize) -> usize {
        let mut depth = 0usize;
        let mut p = pos;
        while let Some(token) = self.tok(p) {
            match token {
                Token::Punct('(' | '[' | '{') => depth += 1,
                Token::Punct(')' | ']' | '}') => {
                    if depth == 0 {
                        return p;
                    }
                    depth -= 1;
                }
                Token::Punct(';') if depth == 0 => return p + 1,
                _ => {}
            }
            p += 1;
        }
        self.tokens.len()
    }

    /// Index of the closer matching the opener at `open`, or the end of input.
    fn matching(&self, open: usize) -> usize {
        let mut depth = 0usize;
        let mut p = open;
        while let Some(token) = self.tok(p) {
            match token {
                Token::Punct('(' | '[' | '{') => depth += 1,
                Token::Punct(')' | ']' | '}') => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return p;
                    }
                }
                _ => {}
            }
            p += 1;
        }
        self.tokens.len()
    }

    /// Records every call in `start..end`, descending into lambda blocks and
    /// interpolation holes.
    fn scan_calls(&mut self, start: usize, end: usize, loops: usize) {
        let end = end.min(self.tokens.len());
        let mut i = start;
        while i < end {
            if let Some(Token::Interpolated { holes, .. }) = self.tok(i) {
                for hole in holes {
                    self.scan_hole(hole, loops);
                }
            }

            if self.tok(i).is_some_and(|t| t.is_op("=>")) && self.is_punct(i + 1, '{') {
                let close = self.matching(i + 1);
                self.block_contents(i + 2, close, loops);
                i = close + 1;
                continue;
            }

            if let Some(name) = self.tok(i).and_then(Token::ident) {
                if !NON_CALL_KEYWORDS.contains(&name) && !self.preceded_by_new(i) {
                    let mut open = i + 1;
                    if self.is_punct(open, '<') {
                        open = self.generic_args(open).unwrap_or(open);
                    }
                    if self.is_punct(open, '(') {
                        let call = self.call_site(i, open, loops > 0);
                        self.out.calls.push(call);
                    }
                }
            }
            i += 1;
        }
    }

    /// Calls inside a hole belong to the enclosing statement and loop.
    fn scan_hole(&mut self, hole: &Hole, loops: usize) {
        let lexed = lex(&hole.source);
        let mut inner = Parser {
            tokens: &lexed.tokens,
            out: ScriptSyntax::default(),
        };
        inner.scan_calls(0, lexed.tokens.len(), loops);
        for mut call in inner.out.calls {
            call.line += hole.line - 1;
            self.out.calls.push(call);
        }
    }

    fn preceded_by_new(&self, pos: usize) -> bool {
        let mut p = pos;
        while p >= 2
            && self
                .tok(p - 1)
                .is_some_and(|t| t.is_punct('.') || t.is_op("::"))
            && self.tok(p - 2).and_then(Token::ident).is_some()
        {
            p -= 2;
        }
        p >= 1 && self.is_ident(p - 1, "new")
    }

    fn call_site(&self, name_pos: usize, open: usize, in_loop: bool) -> CallSite {
        let name = self
            .tok(name_pos)
            .and_then(Token::ident)
            .unwrap_or_default()
            .to_string();

        let mut parts = Vec::new();
        let mut p = name_pos;
        while p >= 2
            && self
                .tok(p - 1)
                .is_some_and(|t| t.is_punct('.') || t.is_op("?."))
        {
            match self.tok(p - 2).and_then(Token::ident) {
                Some(part) => {
                    parts.push(part.to_string());
                    p -= 2;
                }
                None => break,
            }
        }
        parts.reverse();
        let receiver = (!parts.is_empty()).then(|| parts.join("."));

        let close = self.matching(open);
        let mut arguments = Vec::new();
        let mut arg_start = open + 1;
        let mut depth = 0usize;
        for p in open + 1..close {
            match &self.tokens[p].token {
                Token::Punct('(' | '[' | '{') => depth += 1,
                Token::Punct(')' | ']' | '}') => depth = depth.saturating_sub(1),
                Token::Punct(',') if depth == 0 => {
                    arguments.push(self.argument(arg_start, p));
                    arg_start = p + 1;
                }
                _ => {}
            }
        }
        if arg_start < close {
            arguments.push(self.argument(arg_start, close));
        }

        CallSite {
            name,
            receiver,
            arguments,
            line: self.line(name_pos),
            in_loop,
        }
    }

    fn argument(&self, start: usize, end: usize) -> Argument {
        let mut start = start;
        if self.tok(start).and_then(Token::ident).is_some() && self.is_punct(start + 1, ':') {
            start += 2;
        }
        match self.literal_concat(start, end) {
            Some(value) => Argument::Literal(value),
            None => Argument::Expression(self.render(start, end)),
        }
    }

    fn render(&self, start: usize, end: usize) -> String {
        let mut text = String::new();
        let mut prev_word = false;
        for token in self.tokens[start.min(end)..end.min(self.tokens.len())]
            .iter()
            .map(|t| &t.token)
        {
            let word = matches!(
                token,
                Token::Ident(_) | Token::Number | Token::Str(_) | Token::Interpolated { .. }
            );
            if word && prev_word {
                text.push(' ');
            }
            text.push_str(&token.render());
            if token.is_punct(',') {
                text.push(' ');
            }
            prev_word = word;
        }
        text.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_names(syntax: &ScriptSyntax) -> Vec<String> {
        syntax.calls.iter().map(CallSite::qualified_name).collect()
    }

    #[test]
    fn expression_statement_is_executable() {
        let syntax = parse(r#"WriteFile("a.txt", "x");"#);
        assert!(syntax.has_executable_statement());
        assert_eq!(call_names(&syntax), vec!["WriteFile"]);
        assert_eq!(
            syntax.calls[0].arguments,
            vec![
                Argument::Literal("a.txt".to_string()),
                Argument::Literal("x".to_string())
            ]
        );
    }

    #[test]
    fn field_declaration_is_not_executable() {
        let syntax = parse(r#"var listing = Shell("ls");"#);
        assert!(!syntax.has_executable_statement());
        assert_eq!(syntax.statements[0].kind, StatementKind::Field);
        assert_eq!(call_names(&syntax), vec!["Shell"]);
    }

    #[test]
    fn receivers_are_recorded() {
        let syntax = parse(r#"System.IO.File.Delete("x"); sdk?.Shell("ls");"#);
        assert_eq!(call_names(&syntax), vec!["System.IO.File.Delete", "sdk.Shell"]);
    }

    #[test]
    fn constructors_are_not_calls() {
        let syntax = parse(r#"var sb = new System.Text.StringBuilder("x"); sb.Append("y");"#);
        assert_eq!(call_names(&syntax), vec!["sb.Append"]);
    }

    #[test]
    fn loop_bodies_and_headers_mark_calls() {
        let source = r#"
foreach (var f in ListFiles("src")) { WriteFile(f, "x"); }
for (var i = 0; i < 3; i++) DeleteFile("a");
do { Touch(); } while (Check());
Complete();
"#;
        let syntax = parse(source);
        let in_loop: Vec<_> = syntax
            .calls
            .iter()
            .map(|c| (c.name.as_str(), c.in_loop))
            .collect();
        assert_eq!(
            in_loop,
            vec![
                ("ListFiles", true),
                ("WriteFile", true),
                ("DeleteFile", true),
                ("Touch", true),
                ("Check", true),
                ("Complete", false),
            ]
        );
    }

    #[test]
    fn lambda_blocks_are_parsed_as_statements() {
        let syntax = parse("Run(() => { while (true) { WriteFile(\"a\", \"b\"); } });");
        let write = syntax.calls.iter().find(|c| c.name == "WriteFile").unwrap();
        assert!(write.in_loop);
    }

    #[test]
    fn type_and_member_declarations_are_found() {
        let source = r#"
class Helper { void Go() {} }
namespace Foo.Bar;
static int Add(int a, int b) => a + b;
string Name { get; set; }
void Touch() { WriteFile("a", "b"); }
record Point(int X, int Y);
"#;
        let syntax = parse(source);
        let kinds: Vec<_> = syntax
            .declarations
            .iter()
            .map(|d| (d.kind.clone(), d.name.as_str()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (DeclarationKind::Type("class".to_string()), "Helper"),
                (DeclarationKind::Namespace, "Foo.Bar"),
                (DeclarationKind::Member, "Add"),
                (DeclarationKind::Member, "Name"),
                (DeclarationKind::Member, "Touch"),
                (DeclarationKind::Type("record".to_string()), "Point"),
            ]
        );
        assert!(call_names(&syntax).contains(&"WriteFile".to_string()));
    }

    #[test]
    fn using_directives_versus_using_statements() {
        let source = r#"
using System.IO;
using static System.Math;
using Json = System.Text.Json;
using (var s = Open()) { Read(s); }
using var t = Open();
"#;
        let syntax = parse(source);
        assert_eq!(syntax.imports.len(), 3);
        assert_eq!(syntax.imports[0].text, "using System.IO;");
        assert!(call_names(&syntax).contains(&"Read".to_string()));
        assert!(syntax.declarations.is_empty());
    }

    #[test]
    fn assignments_capture_literal_values() {
        let syntax = parse("var stepPlan = \"Add \" + \"tests\";\nplan = Compute();\n");
        assert_eq!(syntax.assignments[0].target, "stepPlan");
        assert_eq!(syntax.assignments[0].literal.as_deref(), Some("Add tests"));
        assert_eq!(syntax.assignments[1].literal, None);
    }

    #[test]
    fn unterminated_literal_still_yields_the_call() {
        let syntax = parse("WriteFile(\"notes.txt\", \"hello);");
        assert_eq!(call_names(&syntax), vec!["WriteFile"]);
        assert!(syntax.has_executable_statement());
        assert_eq!(syntax.diagnostics.len(), 1);
    }

    #[test]
    fn calls_inside_interpolation_holes_are_recorded() {
        let source = "for (;;) {\n  WriteFile(\"a.txt\", $\"x{\n DeleteFile(\"b.txt\")}\");\n}";
        let syntax = parse(source);
        let calls: Vec<_> = syntax
            .calls
            .iter()
            .map(|c| (c.name.as_str(), c.line, c.in_loop))
            .collect();
        assert_eq!(calls, vec![("WriteFile", 2, true), ("DeleteFile", 3, true)]);
        assert_eq!(
            syntax.calls[0].arguments[1],
            Argument::Expression("$\"x{\\n DeleteFile(\\\"b.txt\\\")}\"".to_string())
        );
    }

    #[test]
    fn interpolated_arguments_are_not_literals() {
        let syntax = parse(r#"Shell($"git status {"&& rm -rf src"}"); Shell($"ls {{x}}");"#);
        assert_eq!(syntax.calls[0].first_literal(), None);
        assert_eq!(syntax.calls[1].first_literal(), Some("ls {x}"));
    }

    #[test]
    fn if_else_and_try_catch_are_executable() {
        let syntax = parse(
            "if (FileExists(\"a\")) { DeleteFile(\"a\"); } else { Complete(); }\ntry { Shell(\"ls\"); } catch (Exception e) { Log(e); }",
        );
        assert_eq!(syntax.statements.len(), 2);
        assert!(syntax
            .statements
            .iter()
            .all(|s| s.kind == StatementKind::Executable));
        assert_eq!(
            call_names(&syntax),
            vec!["FileExists", "DeleteFile", "Complete", "Shell", "Log"]
        );
    }
}
