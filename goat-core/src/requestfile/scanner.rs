//! Character level tokenizer for requestfiles.
//!
//! The scanner produces tokens lazily. It keeps track of the current line and column so that
//! the parser can attach positions to errors. Raw content (block bodies, header values, section
//! names) is read by the parser directly through the character level primitives.

/// Returned by [`Scanner::read`] once the input is exhausted.
pub(crate) const EOF: char = '\0';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Illegal,
    Eof,
    Whitespace,
    LineFeed,

    Ident,
    Parameter,

    Comment,
    Section,
    LogSection,
    Delimiter,
    BlockStart,
    BlockEnd,
    GroupStart,
    GroupEnd,
    Colon,
    Comma,
    Assignment,
    FileDescriptor,
    Raw,

    String,
    Integer,
    Float,

    Use,
    Execute,
    Return,
    As,
}

/// Zero based location in the source text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub literal: String,
    pub pos: Position,
}

impl Token {
    fn new(kind: TokenKind, literal: impl Into<String>, pos: Position) -> Token {
        Token {
            kind,
            literal: literal.into(),
            pos,
        }
    }
}

pub struct Scanner {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Scanner {
    pub fn new(input: &str) -> Scanner {
        Scanner {
            chars: input.chars().collect(),
            pos: 0,
            line: 0,
            column: 0,
        }
    }

    pub fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    pub fn at_eof(&self) -> bool {
        self.pos >= self.chars.len()
    }

    /// Reports whether the unread input starts with `prefix` without consuming anything.
    pub fn starts_with(&self, prefix: &str) -> bool {
        let mut idx = self.pos;
        for c in prefix.chars() {
            if self.chars.get(idx) != Some(&c) {
                return false;
            }
            idx += 1;
        }
        true
    }

    /// Reads the next character. Reading past the end yields [`EOF`] and still advances the
    /// cursor so that every read can be undone by exactly one [`Scanner::unread`].
    pub fn read(&mut self) -> char {
        let c = self.chars.get(self.pos).copied().unwrap_or(EOF);
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        c
    }

    pub fn unread(&mut self) {
        if self.pos == 0 {
            return;
        }
        self.pos -= 1;
        if self.chars.get(self.pos) == Some(&'\n') {
            self.line -= 1;
            self.column = self.chars[..self.pos]
                .iter()
                .rev()
                .take_while(|c| **c != '\n')
                .count();
        } else {
            self.column = self.column.saturating_sub(1);
        }
    }

    pub fn scan(&mut self) -> Token {
        let pos = self.position();
        let c = self.read();

        if is_whitespace(c) {
            self.unread();
            return self.scan_whitespace(pos);
        }
        if c.is_ascii_alphabetic() {
            self.unread();
            return self.scan_ident(pos);
        }
        if c.is_ascii_digit() {
            self.unread();
            let (kind, literal) = self.scan_number();
            return Token::new(kind, literal, pos);
        }

        let kind = match c {
            '/' => return self.scan_comment(pos),
            '"' | '\'' => {
                self.unread();
                let (kind, literal) = self.scan_string();
                return Token::new(kind, literal, pos);
            }
            '-' => return self.scan_dash(pos),
            '#' => return self.scan_section(pos),
            '{' => return self.scan_curly_brace(pos),
            '[' => TokenKind::BlockStart,
            ']' => TokenKind::BlockEnd,
            '(' => TokenKind::GroupStart,
            ')' => TokenKind::GroupEnd,
            ':' => TokenKind::Colon,
            ',' => TokenKind::Comma,
            '=' => TokenKind::Assignment,
            '@' => TokenKind::FileDescriptor,
            '$' => TokenKind::Raw,
            '\n' => TokenKind::LineFeed,
            EOF => TokenKind::Eof,
            other => return Token::new(TokenKind::Illegal, other.to_string(), pos),
        };

        Token::new(kind, "", pos)
    }

    /// Reads up to and including the next line feed and returns the trimmed text before it.
    pub fn read_to_lf(&mut self) -> String {
        let mut out = String::new();
        loop {
            match self.read() {
                '\n' => break,
                EOF => {
                    self.unread();
                    break;
                }
                c => out.push(c),
            }
        }
        out.trim().to_string()
    }

    /// Like [`Scanner::read_to_lf`] but leaves the text untrimmed.
    pub fn scan_until_lf(&mut self) -> String {
        let mut out = String::new();
        loop {
            match self.read() {
                '\n' => break,
                EOF => {
                    self.unread();
                    break;
                }
                c => out.push(c),
            }
        }
        out
    }

    /// Reads one full line including its terminating line feed, if any.
    pub fn read_line(&mut self) -> String {
        let mut out = String::new();
        loop {
            match self.read() {
                EOF => {
                    self.unread();
                    break;
                }
                '\n' => {
                    out.push('\n');
                    break;
                }
                c => out.push(c),
            }
        }
        out
    }

    /// Scans an optionally quoted string. Leading whitespace is skipped. An unquoted string
    /// ends at the first whitespace, a quoted one at its closing quote. Hitting the end of the
    /// line inside quotes yields an illegal token.
    pub fn scan_string(&mut self) -> (TokenKind, String) {
        let mut out = String::new();
        let mut wrapper: Option<char> = None;
        let mut in_string = false;

        loop {
            let c = self.read();

            if c == EOF || c == '\n' {
                self.unread();
                if in_string && wrapper.is_some() {
                    return (TokenKind::Illegal, out);
                }
                break;
            }

            if in_string {
                if is_whitespace(c) && wrapper.is_none() {
                    break;
                }
                if Some(c) == wrapper {
                    break;
                }
                out.push(c);
            } else {
                if is_whitespace(c) {
                    continue;
                }
                if c == '"' || c == '\'' {
                    wrapper = Some(c);
                } else {
                    out.push(c);
                }
                in_string = true;
            }
        }

        (TokenKind::String, out)
    }

    fn scan_whitespace(&mut self, pos: Position) -> Token {
        let mut out = String::new();
        loop {
            let c = self.read();
            if !is_whitespace(c) {
                self.unread();
                break;
            }
            out.push(c);
        }
        Token::new(TokenKind::Whitespace, out, pos)
    }

    fn scan_comment(&mut self, pos: Position) -> Token {
        if self.read() != '/' {
            self.unread();
            return Token::new(TokenKind::Illegal, "/", pos);
        }
        Token::new(TokenKind::Comment, self.read_to_lf(), pos)
    }

    fn scan_dash(&mut self, pos: Position) -> Token {
        let (kind, literal) = self.scan_number();
        if matches!(kind, TokenKind::Integer | TokenKind::Float) {
            return Token::new(kind, format!("-{literal}"), pos);
        }

        for _ in 0..2 {
            if self.read() != '-' {
                return Token::new(TokenKind::Illegal, "-", pos);
            }
        }
        Token::new(TokenKind::Delimiter, self.read_to_lf(), pos)
    }

    fn scan_section(&mut self, pos: Position) -> Token {
        for _ in 0..2 {
            if self.read() != '#' {
                self.unread();
                return Token::new(TokenKind::Illegal, "#", pos);
            }
        }

        if self.read() != '#' {
            self.unread();
            return Token::new(TokenKind::Section, "", pos);
        }

        while self.read() == '#' {}
        self.unread();
        Token::new(TokenKind::LogSection, "", pos)
    }

    fn scan_ident(&mut self, pos: Position) -> Token {
        let mut out = String::new();
        loop {
            let c = self.read();
            if !(c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                self.unread();
                break;
            }
            out.push(c);
        }

        let kind = match out.to_lowercase().as_str() {
            "use" => TokenKind::Use,
            "execute" => TokenKind::Execute,
            "return" => TokenKind::Return,
            "as" => TokenKind::As,
            _ => return Token::new(TokenKind::Ident, out, pos),
        };
        Token::new(kind, "", pos)
    }

    fn scan_curly_brace(&mut self, pos: Position) -> Token {
        if self.read() == '{' {
            return self.scan_parameter(pos);
        }
        self.unread();
        Token::new(TokenKind::Illegal, "{", pos)
    }

    /// Scans the body of a `{{ ... }}` placeholder. Nested brace pairs are balanced and
    /// braces inside `"`, `'` or `` ` `` quoted sections are ignored. Within quotes a
    /// backslash escapes the following character.
    fn scan_parameter(&mut self, pos: Position) -> Token {
        let mut out = String::new();
        let mut string_delim: Option<char> = None;
        let mut level = 0usize;

        loop {
            let c = self.read();
            if c == EOF {
                return Token::new(TokenKind::Illegal, out, pos);
            }

            if string_delim.is_some() && c == '\\' {
                out.push(c);
                let escaped = self.read();
                if escaped == EOF {
                    return Token::new(TokenKind::Illegal, out, pos);
                }
                out.push(escaped);
                continue;
            }

            if string_delim.is_none() && c == '{' {
                if self.read() == '{' {
                    level += 1;
                }
                self.unread();
            }

            if string_delim.is_none() && c == '}' {
                if self.read() == '}' {
                    if level == 0 {
                        break;
                    }
                    level -= 1;
                }
                self.unread();
            }

            if c == '"' || c == '\'' || c == '`' {
                match string_delim {
                    Some(delim) if delim == c => string_delim = None,
                    Some(_) => {}
                    None => string_delim = Some(c),
                }
            }

            out.push(c);
        }

        Token::new(TokenKind::Parameter, out, pos)
    }

    fn scan_number(&mut self) -> (TokenKind, String) {
        let mut out = String::new();
        let mut kind = TokenKind::Integer;

        loop {
            let c = self.read();
            match c {
                '.' => kind = TokenKind::Float,
                '_' => continue,
                c if c.is_ascii_digit() => {}
                _ => {
                    self.unread();
                    break;
                }
            }
            out.push(c);
        }

        if out.is_empty() {
            return (TokenKind::Illegal, out);
        }
        (kind, out)
    }
}

fn is_whitespace(c: char) -> bool {
    c == ' ' || c == '\t'
}
