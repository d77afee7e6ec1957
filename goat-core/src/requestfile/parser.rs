//! Recursive descent parser turning requestfile text into a [`Document`].
//!
//! Tokens are pulled from the [`Scanner`] through a [`TokenStream`] which supports a single
//! token of lookahead. Raw content (block bodies, header values, URIs) is read from the scanner
//! directly, which is only valid while no token is buffered.

use super::{
    document::{Action, Document, Invocation},
    error::{ParseError, ParseErrorKind},
    request::{Data, Headers, Request},
    scanner::{Position, Scanner, Token, TokenKind},
    value::Value,
};
use indexmap::IndexMap;
use std::{path::Path, str::FromStr};
use tracing::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "kebab-case")]
enum SectionName {
    Defaults,
    Setup,
    SetupEach,
    Tests,
    Teardown,
    TeardownEach,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(ascii_case_insensitive)]
enum BlockKind {
    QueryParams,
    #[strum(to_string = "Header", serialize = "headers")]
    Header,
    Body,
    PreScript,
    Script,
    Options,
}

/// Token source with one token of lookahead.
pub struct TokenStream {
    scanner: Scanner,
    buffered: Option<Token>,
    last: Position,
}

impl TokenStream {
    pub fn new(input: &str) -> TokenStream {
        TokenStream {
            scanner: Scanner::new(input),
            buffered: None,
            last: Position::default(),
        }
    }

    pub fn next(&mut self) -> Token {
        if let Some(tok) = self.buffered.take() {
            return tok;
        }
        let tok = self.scanner.scan();
        self.last = tok.pos;
        tok
    }

    pub fn next_skip_ws(&mut self) -> Token {
        let tok = self.next();
        if tok.kind == TokenKind::Whitespace {
            return self.next();
        }
        tok
    }

    pub fn peek(&mut self) -> &Token {
        let tok = match self.buffered.take() {
            Some(tok) => tok,
            None => {
                let tok = self.scanner.scan();
                self.last = tok.pos;
                tok
            }
        };
        self.buffered.insert(tok)
    }

    pub fn push_back(&mut self, tok: Token) {
        debug_assert!(self.buffered.is_none(), "only one token can be pushed back");
        self.buffered = Some(tok);
    }

    /// Direct access to the character level scanner.
    fn raw(&mut self) -> &mut Scanner {
        debug_assert!(
            self.buffered.is_none(),
            "raw scanning with a buffered token"
        );
        self.last = self.scanner.position();
        &mut self.scanner
    }
}

pub struct Parser {
    tokens: TokenStream,
    doc: Document,
    defaults_defined: bool,
}

type Result<T> = std::result::Result<T, ParseError>;

/// Parses `input` as the content of the requestfile at `path`.
pub fn parse(input: &str, path: &Path) -> Result<Document> {
    Parser::new(input, path).parse()
}

/// Parses a single standalone value literal.
pub fn parse_value(input: &str) -> Result<Value> {
    let mut parser = Parser::new(input, Path::new(""));
    let value = parser.value()?;
    let tok = parser.tokens.next_skip_ws();
    match tok.kind {
        TokenKind::Eof | TokenKind::LineFeed => Ok(value),
        _ => Err(parser.error(ParseErrorKind::InvalidToken("value"))),
    }
}

impl Parser {
    pub fn new(input: &str, path: &Path) -> Parser {
        Parser {
            tokens: TokenStream::new(input),
            doc: Document::new(path),
            defaults_defined: false,
        }
    }

    pub fn parse(mut self) -> Result<Document> {
        loop {
            let tok = self.tokens.next();
            match tok.kind {
                TokenKind::Whitespace
                | TokenKind::LineFeed
                | TokenKind::Comment
                | TokenKind::Delimiter => continue,
                TokenKind::LogSection => {
                    let text = self.log_section()?;
                    self.doc.tests.push(text);
                }
                TokenKind::Ident | TokenKind::String => {
                    self.tokens.push_back(tok);
                    let req = self.request()?;
                    self.doc.tests.push(Action::Request(Box::new(req)));
                }
                TokenKind::Execute => {
                    let inv = self.invocation()?;
                    self.doc.tests.push(Action::Invocation(inv));
                }
                TokenKind::Use => {
                    let path = self.use_path()?;
                    self.doc.imports.push(path);
                }
                TokenKind::Section => self.section()?,
                TokenKind::Eof => return Ok(self.doc),
                TokenKind::BlockStart => {
                    return Err(self.error(ParseErrorKind::BlockOutOfRequest));
                }
                _ => return Err(self.error(ParseErrorKind::IllegalCharacter)),
            }
        }
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            line: self.tokens.last.line + 1,
            column: self.tokens.last.column + 1,
            kind,
        }
    }

    fn log_section(&mut self) -> Result<Action> {
        let text = self.tokens.raw().scan_until_lf();
        let text = text.trim();
        if text.is_empty() {
            return Err(self.error(ParseErrorKind::InvalidLogSection));
        }
        Ok(Action::LogSection(text.to_string()))
    }

    fn use_path(&mut self) -> Result<String> {
        if self.tokens.next().kind != TokenKind::Whitespace {
            return Err(self.error(ParseErrorKind::InvalidStringLiteral));
        }
        let (kind, path) = self.tokens.raw().scan_string();
        if kind == TokenKind::Illegal {
            return Err(self.error(ParseErrorKind::InvalidStringLiteral));
        }
        if path.is_empty() {
            return Err(self.error(ParseErrorKind::EmptyUsePath));
        }
        Ok(path)
    }

    fn section(&mut self) -> Result<()> {
        let raw_name = self.tokens.raw().read_to_lf().to_lowercase();
        let name = SectionName::from_str(&raw_name)
            .map_err(|_| self.error(ParseErrorKind::InvalidSection))?;

        if name == SectionName::Defaults {
            if self.defaults_defined {
                return Err(self.error(ParseErrorKind::SectionDefinedMultiple));
            }
            self.defaults_defined = true;
            let mut defaults = Request::default();
            defaults.path = self.doc.path.clone();
            self.blocks(&mut defaults)?;
            self.doc.defaults = Some(defaults);
            return Ok(());
        }

        let mut actions = Vec::new();
        loop {
            let tok = self.tokens.next();
            match tok.kind {
                TokenKind::LineFeed
                | TokenKind::Whitespace
                | TokenKind::Delimiter
                | TokenKind::Comment => continue,
                TokenKind::Eof | TokenKind::Section => {
                    self.tokens.push_back(tok);
                    break;
                }
                TokenKind::LogSection => actions.push(self.log_section()?),
                TokenKind::Execute => actions.push(Action::Invocation(self.invocation()?)),
                TokenKind::BlockStart => {
                    return Err(self.error(ParseErrorKind::BlockOutOfRequest));
                }
                _ => {
                    self.tokens.push_back(tok);
                    actions.push(Action::Request(Box::new(self.request()?)));
                }
            }
        }

        let target = match name {
            SectionName::Setup => &mut self.doc.setup,
            SectionName::SetupEach => &mut self.doc.setup_each,
            SectionName::Tests => &mut self.doc.tests,
            SectionName::Teardown => &mut self.doc.teardown,
            SectionName::TeardownEach => &mut self.doc.teardown_each,
            SectionName::Defaults => unreachable!("handled above"),
        };
        target.extend(actions);

        Ok(())
    }

    fn request(&mut self) -> Result<Request> {
        let head = self.tokens.next();
        if !matches!(head.kind, TokenKind::Ident | TokenKind::String) || head.literal.is_empty() {
            return Err(self.error(ParseErrorKind::InvalidRequestMethod));
        }

        let sep = self.tokens.next();
        if !matches!(sep.kind, TokenKind::Whitespace | TokenKind::LineFeed) {
            return Err(self.error(ParseErrorKind::NoRequestUri));
        }

        let (kind, uri) = self.tokens.raw().scan_string();
        if kind != TokenKind::String || uri.is_empty() {
            return Err(self.error(ParseErrorKind::NoRequestUri));
        }

        let mut req = Request::new(head.literal, uri);
        req.path = self.doc.path.clone();
        req.line = head.pos.line + 1;

        self.blocks(&mut req)?;

        Ok(req)
    }

    fn blocks(&mut self, req: &mut Request) -> Result<()> {
        let mut seen = Vec::new();
        loop {
            let kind = self.tokens.peek().kind;
            match kind {
                TokenKind::Comment | TokenKind::Whitespace | TokenKind::LineFeed => {}
                TokenKind::BlockStart => {
                    self.tokens.next();
                    self.block(req, &mut seen)?;
                    continue;
                }
                TokenKind::Eof
                | TokenKind::Section
                | TokenKind::LogSection
                | TokenKind::Delimiter => return Ok(()),
                _ => return Err(self.error(ParseErrorKind::InvalidToken("request"))),
            }
            self.tokens.next();
        }
    }

    fn block(&mut self, req: &mut Request, seen: &mut Vec<BlockKind>) -> Result<()> {
        let name = self.tokens.next_skip_ws();
        if name.kind != TokenKind::Ident || name.literal.is_empty() {
            return Err(self.error(ParseErrorKind::InvalidBlockHeader));
        }
        if self.tokens.next().kind != TokenKind::BlockEnd {
            return Err(self.error(ParseErrorKind::InvalidBlockHeader));
        }

        let after = self.tokens.next_skip_ws();
        match after.kind {
            // the scanner keeps yielding Eof, so nothing is buffered before raw content
            TokenKind::Comment | TokenKind::LineFeed | TokenKind::Eof => {}
            _ => return Err(self.error(ParseErrorKind::InvalidToken("block"))),
        }

        let kind = BlockKind::from_str(&name.literal)
            .map_err(|_| self.error(ParseErrorKind::InvalidBlockHeader))?;
        if seen.contains(&kind) {
            return Err(self.error(ParseErrorKind::BlockDefinedMultiple(kind.to_string())));
        }
        seen.push(kind);

        match kind {
            BlockKind::QueryParams => req.query_params = self.block_entries(None)?,
            BlockKind::Header => {
                if name.literal.eq_ignore_ascii_case("headers") {
                    warn!(
                        location = %req.location(),
                        "the [Headers] block is deprecated, use [Header] instead"
                    );
                }
                req.headers = self.headers()?;
            }
            BlockKind::Body => req.body = self.raw_content()?,
            BlockKind::PreScript => req.pre_script = self.raw_content()?,
            BlockKind::Script => req.script = self.raw_content()?,
            BlockKind::Options => req.options = self.block_entries(None)?,
        }

        Ok(())
    }

    fn block_entries(&mut self, exit: Option<TokenKind>) -> Result<IndexMap<String, Value>> {
        let mut entries = IndexMap::new();
        loop {
            let tok = self.tokens.next_skip_ws();
            match tok.kind {
                TokenKind::LineFeed | TokenKind::Comment => continue,
                TokenKind::Eof
                | TokenKind::Delimiter
                | TokenKind::BlockStart
                | TokenKind::Section
                | TokenKind::LogSection => {
                    self.tokens.push_back(tok);
                    break;
                }
                kind if Some(kind) == exit => {
                    self.tokens.push_back(tok);
                    break;
                }
                TokenKind::Ident => {}
                _ => return Err(self.error(ParseErrorKind::InvalidBlockEntryAssignment)),
            }

            if self.tokens.next_skip_ws().kind != TokenKind::Assignment {
                return Err(self.error(ParseErrorKind::InvalidBlockEntryAssignment));
            }

            let value = self.value()?;
            entries.insert(tok.literal, value);
        }
        Ok(entries)
    }

    fn value(&mut self) -> Result<Value> {
        let tok = self.tokens.next_skip_ws();
        match tok.kind {
            TokenKind::Integer => tok
                .literal
                .parse()
                .map(Value::Integer)
                .map_err(|_| self.error(ParseErrorKind::InvalidNumber(tok.literal.clone()))),
            TokenKind::Float => tok
                .literal
                .parse()
                .map(Value::Float)
                .map_err(|_| self.error(ParseErrorKind::InvalidNumber(tok.literal.clone()))),
            TokenKind::String => Ok(Value::String(tok.literal)),
            TokenKind::Ident => match tok.literal.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(self.error(ParseErrorKind::InvalidLiteral)),
            },
            TokenKind::BlockStart => self.array(),
            TokenKind::Parameter => Ok(Value::Placeholder(tok.literal)),
            TokenKind::LineFeed | TokenKind::Eof => Err(self.error(ParseErrorKind::MissingValue)),
            TokenKind::Illegal => Err(self.error(ParseErrorKind::IllegalCharacter)),
            _ => Err(self.error(ParseErrorKind::InvalidToken("value"))),
        }
    }

    fn array(&mut self) -> Result<Value> {
        let mut items = Vec::new();
        loop {
            let tok = self.tokens.next_skip_ws();
            match tok.kind {
                TokenKind::BlockEnd => break,
                TokenKind::Comma | TokenKind::LineFeed | TokenKind::Comment => continue,
                TokenKind::Eof => return Err(self.error(ParseErrorKind::UnterminatedArray)),
                _ => {
                    self.tokens.push_back(tok);
                    items.push(self.value()?);
                }
            }
        }
        Ok(Value::Array(items))
    }

    fn headers(&mut self) -> Result<Headers> {
        let mut headers = Headers::default();
        loop {
            let tok = self.tokens.next_skip_ws();
            match tok.kind {
                TokenKind::LineFeed | TokenKind::Comment => continue,
                TokenKind::Eof
                | TokenKind::Delimiter
                | TokenKind::BlockStart
                | TokenKind::Section
                | TokenKind::LogSection => {
                    self.tokens.push_back(tok);
                    break;
                }
                TokenKind::Ident => {}
                _ => return Err(self.error(ParseErrorKind::InvalidHeaderKey)),
            }

            if self.tokens.next_skip_ws().kind != TokenKind::Colon {
                return Err(self.error(ParseErrorKind::InvalidHeaderSeparator));
            }

            let value = self.tokens.raw().scan_until_lf();
            let value = value.trim();
            if value.is_empty() {
                return Err(self.error(ParseErrorKind::NoHeaderValue));
            }
            headers.add(&tok.literal, value);
        }
        Ok(headers)
    }

    /// Reads verbatim content until a line starting a delimiter, block or section. Only lines
    /// after the first one can terminate the content, so a body may open with `[`. Lines
    /// between two ```` ``` ```` fence lines are taken as they are.
    fn raw_content(&mut self) -> Result<Data> {
        let base_dir = self.doc.dir().to_path_buf();
        let scanner = self.tokens.raw();

        if scanner.starts_with("@") {
            scanner.read();
            let (kind, path) = scanner.scan_string();
            if kind != TokenKind::String || path.is_empty() {
                return Err(self.error(ParseErrorKind::InvalidFileDescriptor));
            }
            return Ok(Data::File { path, base_dir });
        }

        let mut out = String::new();
        let mut escaped = false;
        loop {
            if scanner.at_eof() {
                if escaped {
                    return Err(self.error(ParseErrorKind::OpenEscapeBlock));
                }
                break;
            }

            if !escaped
                && !out.is_empty()
                && (scanner.starts_with("---")
                    || scanner.starts_with("[")
                    || scanner.starts_with("###"))
            {
                if out.ends_with('\n') {
                    out.pop();
                }
                break;
            }

            let line = scanner.read_line();
            if line.trim_end() == "```" {
                escaped = !escaped;
                continue;
            }
            out.push_str(&line);
        }

        if out.is_empty() {
            return Ok(Data::None);
        }
        Ok(Data::Text(out))
    }

    fn invocation(&mut self) -> Result<Invocation> {
        if self.tokens.next().kind != TokenKind::Whitespace {
            return Err(self.error(ParseErrorKind::InvalidStringLiteral));
        }
        let (kind, path) = self.tokens.raw().scan_string();
        if kind == TokenKind::Illegal {
            return Err(self.error(ParseErrorKind::InvalidStringLiteral));
        }
        if path.is_empty() {
            return Err(self.error(ParseErrorKind::EmptyCallPath));
        }

        let mut inv = Invocation {
            path,
            source: self.doc.path.clone(),
            ..Default::default()
        };

        let mut tok = self.tokens.next_skip_ws();
        if tok.kind == TokenKind::GroupStart {
            inv.params = self.block_entries(Some(TokenKind::GroupEnd))?;
            if self.tokens.next().kind != TokenKind::GroupEnd {
                return Err(self.error(ParseErrorKind::UnclosedGroup));
            }
            tok = self.tokens.next_skip_ws();
        }

        if tok.kind != TokenKind::Return {
            self.tokens.push_back(tok);
            return Ok(inv);
        }

        if self.tokens.next_skip_ws().kind != TokenKind::GroupStart {
            return Err(self.error(ParseErrorKind::MissingGroup));
        }

        loop {
            let key = self.tokens.next_skip_ws();
            match key.kind {
                TokenKind::Eof => return Err(self.error(ParseErrorKind::UnclosedGroup)),
                TokenKind::LineFeed | TokenKind::Comma => continue,
                TokenKind::GroupEnd => break,
                TokenKind::Ident => {}
                _ => return Err(self.error(ParseErrorKind::IllegalCharacter)),
            }

            if self.tokens.next_skip_ws().kind != TokenKind::As {
                return Err(self.error(ParseErrorKind::IllegalCharacter));
            }

            let alias = self.tokens.next_skip_ws();
            if alias.kind != TokenKind::Ident {
                return Err(self.error(ParseErrorKind::IllegalCharacter));
            }

            inv.returns.insert(key.literal, alias.literal);
        }

        Ok(inv)
    }
}
