//! Tolerant lexer for C# script step bodies.
//!
//! The lexer never fails. Unterminated literals and comments are reported as
//! diagnostics and the token stream continues; the runtime inside the sandbox
//! is what turns those into a failed turn.

use serde::Serialize;

/// Two-character operators kept as a single token.
const OPERATORS: &[&str] = &[
    "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "+=", "-=", "*=", "/=", "%=", "++", "--",
    "::", "?.",
];

/// A lexical token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Identifier or keyword. Verbatim identifiers keep their `@` prefix.
    Ident(String),
    /// String literal with its decoded contents.
    Str(String),
    /// Interpolated string with at least one hole. `text` keeps each hole's
    /// source between braces.
    Interpolated { text: String, holes: Vec<Hole> },
    /// Character literal.
    Char,
    /// Numeric literal.
    Number,
    /// Single punctuation character.
    Punct(char),
    /// Multi-character operator.
    Op(&'static str),
}

impl Token {
    /// Returns true if this is the given punctuation character.
    pub fn is_punct(&self, c: char) -> bool {
        matches!(self, Token::Punct(p) if *p == c)
    }

    /// Returns true if this is the given operator.
    pub fn is_op(&self, op: &str) -> bool {
        matches!(self, Token::Op(o) if *o == op)
    }

    /// Returns the identifier text, if this is an identifier.
    pub fn ident(&self) -> Option<&str> {
        match self {
            Token::Ident(name) => Some(name),
            _ => None,
        }
    }

    /// Returns true if this is the given identifier or keyword.
    pub fn is_ident(&self, word: &str) -> bool {
        self.ident() == Some(word)
    }

    /// Renders the token back to approximate source text.
    pub fn render(&self) -> String {
        match self {
            Token::Ident(name) => name.clone(),
            Token::Str(value) => format!("{:?}", value),
            Token::Interpolated { text, .. } => format!("${:?}", text),
            Token::Char => "'?'".to_string(),
            Token::Number => "0".to_string(),
            Token::Punct(c) => c.to_string(),
            Token::Op(op) => (*op).to_string(),
        }
    }
}

/// Source of one interpolation hole, e.g. `name` in `$"hi {name}"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hole {
    pub source: String,
    /// Line the hole starts on.
    pub line: usize,
}

/// A token with the 1-based line it starts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
}

/// A preprocessor directive line such as `#r "nuget: Foo"` or `#nullable enable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Directive {
    pub text: String,
    pub line: usize,
}

/// Output of lexing one step body.
#[derive(Debug, Clone, Default)]
pub struct Lexed {
    pub tokens: Vec<Spanned>,
    pub directives: Vec<Directive>,
    /// Non-fatal lexical problems (unterminated literals or comments).
    pub diagnostics: Vec<String>,
}

/// Lexes a step body.
pub fn lex(source: &str) -> Lexed {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    at_line_start: bool,
    out: Lexed,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            at_line_start: true,
            out: Lexed::default(),
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn push(&mut self, token: Token, line: usize) {
        self.out.tokens.push(Spanned { token, line });
        self.at_line_start = false;
    }

    fn run(mut self) -> Lexed {
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                self.bump();
                self.at_line_start = true;
                continue;
            }
            if c.is_whitespace() {
                self.bump();
                continue;
            }

            let line = self.line;
            match c {
                '#' if self.at_line_start => self.directive(),
                '/' if self.peek(1) == Some('/') => self.line_comment(),
                '/' if self.peek(1) == Some('*') => self.block_comment(),
                '"' => {
                    let (value, holes) = self.string_literal(false, 0);
                    self.push(string_token(value, holes), line);
                }
                '\'' => {
                    self.char_literal();
                    self.push(Token::Char, line);
                }
                '@' | '$' if self.starts_prefixed_string() => {
                    let (verbatim, dollars) = self.string_prefix();
                    let (value, holes) = self.string_literal(verbatim, dollars);
                    self.push(string_token(value, holes), line);
                }
                '@' if self.peek(1).is_some_and(is_ident_start) => {
                    self.bump();
                    let name = format!("@{}", self.identifier());
                    self.push(Token::Ident(name), line);
                }
                c if is_ident_start(c) => {
                    let name = self.identifier();
                    self.push(Token::Ident(name), line);
                }
                c if c.is_ascii_digit() => {
                    self.number();
                    self.push(Token::Number, line);
                }
                _ => {
                    let token = self.punctuation();
                    self.push(token, line);
                }
            }
        }
        self.out
    }

    fn directive(&mut self) {
        let line = self.line;
        let mut text = String::new();
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                break;
            }
            text.push(c);
            self.bump();
        }
        self.out.directives.push(Directive {
            text: text.trim_end().to_string(),
            line,
        });
    }

    fn line_comment(&mut self) {
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn block_comment(&mut self) {
        let line = self.line;
        self.bump();
        self.bump();
        loop {
            match self.bump() {
                Some('*') if self.peek(0) == Some('/') => {
                    self.bump();
                    return;
                }
                Some(_) => {}
                None => {
                    self.out
                        .diagnostics
                        .push(format!("line {}: unterminated block comment", line));
                    return;
                }
            }
        }
    }

    fn starts_prefixed_string(&self) -> bool {
        let mut offset = 0;
        while let Some(c) = self.peek(offset) {
            match c {
                '@' | '$' if offset < 4 => offset += 1,
                '"' => return offset > 0,
                _ => return false,
            }
        }
        false
    }

    /// Consumes `@` and `$` prefixes, returning the verbatim flag and the `$` count.
    fn string_prefix(&mut self) -> (bool, usize) {
        let (mut verbatim, mut dollars) = (false, 0);
        while let Some(c) = self.peek(0) {
            match c {
                '@' => verbatim = true,
                '$' => dollars += 1,
                _ => break,
            }
            self.bump();
        }
        (verbatim, dollars)
    }

    /// Lexes a string literal starting at the opening quote. `dollars` is the
    /// number of `$` prefixes; zero means no interpolation.
    fn string_literal(&mut self, verbatim: bool, dollars: usize) -> (String, Vec<Hole>) {
        let mut quotes = 0;
        while self.peek(quotes) == Some('"') {
            quotes += 1;
        }
        if quotes >= 3 {
            return self.raw_string(quotes, dollars);
        }

        let line = self.line;
        self.bump();
        let mut value = String::new();
        let mut holes = Vec::new();
        loop {
            let Some(c) = self.peek(0) else {
                self.unterminated(line);
                return (value, holes);
            };

            match c {
                '\n' if !verbatim => {
                    self.unterminated(line);
                    return (value, holes);
                }
                '"' if verbatim && self.peek(1) == Some('"') => {
                    self.bump();
                    self.bump();
                    value.push('"');
                }
                '"' => {
                    self.bump();
                    return (value, holes);
                }
                '\\' if !verbatim => {
                    self.bump();
                    match self.bump() {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some('r') => value.push('\r'),
                        Some('0') => value.push('\0'),
                        Some('\n') | None => {
                            self.unterminated(line);
                            return (value, holes);
                        }
                        Some(other) => value.push(other),
                    }
                }
                '{' | '}' if dollars > 0 && self.peek(1) == Some(c) => {
                    self.bump();
                    self.bump();
                    value.push(c);
                }
                '{' if dollars > 0 => {
                    self.bump();
                    let Some(hole) = self.hole(1) else {
                        self.unterminated(line);
                        return (value, holes);
                    };
                    push_hole(&mut value, &mut holes, hole);
                }
                _ => {
                    self.bump();
                    value.push(c);
                }
            }
        }
    }

    fn raw_string(&mut self, quotes: usize, dollars: usize) -> (String, Vec<Hole>) {
        let line = self.line;
        for _ in 0..quotes {
            self.bump();
        }
        let mut value = String::new();
        let mut holes = Vec::new();
        loop {
            let run = (0..).take_while(|i| self.peek(*i) == Some('"')).count();
            if run >= quotes {
                for _ in 0..quotes {
                    self.bump();
                }
                return (value.trim_matches('\n').to_string(), holes);
            }

            // A run of at least `dollars` braces opens a hole; extra braces are content.
            let braces = (0..).take_while(|i| self.peek(*i) == Some('{')).count();
            if dollars > 0 && braces >= dollars {
                for _ in 0..braces {
                    self.bump();
                }
                value.extend(std::iter::repeat('{').take(braces - dollars));
                let Some(hole) = self.hole(dollars) else {
                    self.unterminated(line);
                    return (value, holes);
                };
                push_hole(&mut value, &mut holes, hole);
                continue;
            }

            match self.bump() {
                Some(c) => value.push(c),
                None => {
                    self.unterminated(line);
                    return (value, holes);
                }
            }
        }
    }

    /// Lexes an interpolation hole just after its opening braces, consuming
    /// `braces` closing braces. Returns `None` at end of input.
    fn hole(&mut self, braces: usize) -> Option<Hole> {
        let line = self.line;
        let mut source = String::new();
        let mut depth = 0usize;
        loop {
            let start = self.pos;
            match self.peek(0)? {
                '"' => {
                    self.string_literal(false, 0);
                }
                '@' | '$' if self.starts_prefixed_string() => {
                    let (verbatim, dollars) = self.string_prefix();
                    self.string_literal(verbatim, dollars);
                }
                '\'' => self.char_literal(),
                '{' => {
                    depth += 1;
                    self.bump();
                }
                '}' if depth == 0 => {
                    for _ in 0..braces {
                        if self.peek(0) == Some('}') {
                            self.bump();
                        }
                    }
                    return Some(Hole { source, line });
                }
                '}' => {
                    depth -= 1;
                    self.bump();
                }
                _ => {
                    self.bump();
                }
            }
            source.extend(&self.chars[start..self.pos]);
        }
    }

    fn char_literal(&mut self) {
        let line = self.line;
        self.bump();
        loop {
            match self.peek(0) {
                Some('\\') => {
                    self.bump();
                    self.bump();
                }
                Some('\'') => {
                    self.bump();
                    return;
                }
                Some('\n') | None => {
                    self.out
                        .diagnostics
                        .push(format!("line {}: unterminated character literal", line));
                    return;
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
    }

    fn unterminated(&mut self, line: usize) {
        self.out
            .diagnostics
            .push(format!("line {}: unterminated string literal", line));
    }

    fn identifier(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek(0) {
            if !is_ident_continue(c) {
                break;
            }
            name.push(c);
            self.bump();
        }
        name
    }

    fn number(&mut self) {
        while let Some(c) = self.peek(0) {
            let fraction = c == '.' && self.peek(1).is_some_and(|n| n.is_ascii_digit());
            if !(c.is_ascii_alphanumeric() || c == '_' || fraction) {
                break;
            }
            self.bump();
        }
    }

    fn punctuation(&mut self) -> Token {
        if let (Some(a), Some(b)) = (self.peek(0), self.peek(1)) {
            let pair: String = [a, b].iter().collect();
            if let Some(op) = OPERATORS.iter().find(|op| **op == pair) {
                self.bump();
                self.bump();
                return Token::Op(*op);
            }
        }
        let c = self.bump().unwrap_or(' ');
        Token::Punct(c)
    }
}

fn string_token(value: String, holes: Vec<Hole>) -> Token {
    if holes.is_empty() {
        Token::Str(value)
    } else {
        Token::Interpolated { text: value, holes }
    }
}

fn push_hole(value: &mut String, holes: &mut Vec<Hole>, hole: Hole) {
    value.push('{');
    value.push_str(&hole.source);
    value.push('}');
    holes.push(hole);
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        lex(source).tokens.into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn lexes_call_with_string_arguments() {
        let tokens = kinds(r#"WriteFile("a.txt", "hi\n");"#);
        assert_eq!(
            tokens,
            vec![
                Token::Ident("WriteFile".to_string()),
                Token::Punct('('),
                Token::Str("a.txt".to_string()),
                Token::Punct(','),
                Token::Str("hi\n".to_string()),
                Token::Punct(')'),
                Token::Punct(';'),
            ]
        );
    }

    #[test]
    fn verbatim_strings_span_lines_and_unescape_quotes() {
        let tokens = kinds("var s = @\"line one\nsay \"\"hi\"\"\";");
        assert!(tokens.contains(&Token::Str("line one\nsay \"hi\"".to_string())));
    }

    #[test]
    fn raw_strings_keep_inner_quotes() {
        let tokens = kinds("var s = \"\"\"\n{ \"a\": 1 }\n\"\"\";");
        assert!(tokens.contains(&Token::Str("{ \"a\": 1 }".to_string())));
    }

    #[test]
    fn interpolated_strings_keep_hole_source() {
        let lexed = lex(r#"Shell($"grep {Quote("x")} src");"#);
        assert!(lexed.diagnostics.is_empty());
        assert_eq!(
            lexed.tokens[2].token,
            Token::Interpolated {
                text: r#"grep {Quote("x")} src"#.to_string(),
                holes: vec![Hole {
                    source: r#"Quote("x")"#.to_string(),
                    line: 1,
                }],
            }
        );
        assert_eq!(lexed.tokens.len(), 5);
    }

    #[test]
    fn interpolated_strings_without_holes_are_plain() {
        let tokens = kinds(r#"Shell($"git status {{x}}");"#);
        assert_eq!(tokens[2], Token::Str("git status {x}".to_string()));
    }

    #[test]
    fn raw_interpolated_strings_record_holes() {
        let tokens = kinds("var s = $$\"\"\"{ \"a\": {{Read()}} }\"\"\";");
        let Token::Interpolated { holes, .. } = &tokens[3] else {
            panic!("expected an interpolated string, got {:?}", tokens[3]);
        };
        assert_eq!(holes.len(), 1);
        assert_eq!(holes[0].source, "Read()");
    }

    #[test]
    fn unterminated_string_is_a_diagnostic_not_a_failure() {
        let lexed = lex("WriteFile(\"a.txt\", \"hello);\nComplete();");
        assert_eq!(lexed.diagnostics.len(), 1);
        assert!(lexed.diagnostics[0].contains("unterminated string"));
        assert!(lexed.tokens.iter().any(|t| t.token.is_ident("Complete")));
    }

    #[test]
    fn directives_are_collected_at_line_start_only() {
        let lexed = lex("#r \"nuget: Foo, 1.0\"\nvar x = 1; // #load nope\n  #load \"b.csx\"");
        let texts: Vec<_> = lexed.directives.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["#r \"nuget: Foo, 1.0\"", "#load \"b.csx\""]);
        assert_eq!(lexed.directives[1].line, 3);
    }

    #[test]
    fn comments_are_skipped() {
        let tokens = kinds("/* WriteFile(\"x\") */ // DeleteFile(\"y\")\nComplete();");
        assert_eq!(tokens[0], Token::Ident("Complete".to_string()));
    }

    #[test]
    fn two_character_operators_are_single_tokens() {
        let tokens = kinds("x => x == 1");
        assert!(tokens[1].is_op("=>"));
        assert!(tokens[3].is_op("=="));
    }
}
