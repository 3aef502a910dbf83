use crate::error::{LexdexError, Result};
use crate::utils::tokenizer::normalize;

/// Query AST node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryNode {
    /// Single normalized term
    Term(String),
    /// All operands match
    And(Vec<QueryNode>),
    /// Any operand matches
    Or(Vec<QueryNode>),
    /// Every document the operand does not match
    Not(Box<QueryNode>),
    /// Left operand without the right one (`a \ b`)
    Difference(Box<QueryNode>, Box<QueryNode>),
    /// Both terms occur at most `radius` words apart, in either order
    Proximity {
        left: String,
        right: String,
        radius: u32,
    },
    /// Terms occur in this order, not necessarily adjacent
    Ordered(Vec<String>),
    /// Terms occur at consecutive positions
    Phrase(Vec<String>),
}

/// Parse a query. Malformed input is a `QuerySyntax` error carrying the byte
/// offset of the offending token.
pub fn parse_query(input: &str) -> Result<QueryNode> {
    QueryParser::new(input)?.parse()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Word(String),
    And,
    Or,
    Not,
    Difference,
    Open,
    Close,
    Next,
    Near(u32),
    Quote,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Word(w) => format!("word '{}'", w),
        TokenKind::And => "'&'".into(),
        TokenKind::Or => "'|'".into(),
        TokenKind::Not => "'!'".into(),
        TokenKind::Difference => "'\\'".into(),
        TokenKind::Open => "'('".into(),
        TokenKind::Close => "')'".into(),
        TokenKind::Next => "'>'".into(),
        TokenKind::Near(n) => format!("'{{{}}}'", n),
        TokenKind::Quote => "'\"'".into(),
    }
}

/// Splits the raw query into operator and word tokens
struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.input[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.peek_char() {
            self.pos += ch.len_utf8();
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(ch) = self.peek_char() {
            let offset = self.pos;
            let kind = match ch {
                c if c.is_whitespace() => {
                    self.advance();
                    continue;
                }
                '&' => TokenKind::And,
                '|' => TokenKind::Or,
                '!' => TokenKind::Not,
                '\\' => TokenKind::Difference,
                '(' => TokenKind::Open,
                ')' => TokenKind::Close,
                '>' => TokenKind::Next,
                '"' => TokenKind::Quote,
                '{' => {
                    tokens.push(Token {
                        kind: TokenKind::Near(self.radius()?),
                        offset,
                    });
                    continue;
                }
                c if c.is_alphanumeric() => {
                    tokens.push(Token {
                        kind: TokenKind::Word(self.word()),
                        offset,
                    });
                    continue;
                }
                c => {
                    return Err(LexdexError::syntax(
                        offset,
                        format!("unexpected character '{}'", c),
                    ));
                }
            };
            self.advance();
            tokens.push(Token { kind, offset });
        }
        Ok(tokens)
    }

    /// Alphanumeric run with inner apostrophes, normalized like indexed text
    fn word(&mut self) -> String {
        let start = self.pos;
        while let Some(ch) = self.peek_char() {
            if ch.is_alphanumeric()
                || (ch == '\'' && self.peek_second().is_some_and(char::is_alphanumeric))
            {
                self.advance();
            } else {
                break;
            }
        }
        normalize(&self.input[start..self.pos])
    }

    /// `{N}` with a decimal radius
    fn radius(&mut self) -> Result<u32> {
        let open = self.pos;
        self.advance();
        let start = self.pos;
        while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        let digits = &self.input[start..self.pos];
        if digits.is_empty() {
            return Err(LexdexError::syntax(open, "expected a number after '{'"));
        }
        if self.peek_char() != Some('}') {
            return Err(LexdexError::syntax(self.pos, "expected '}' to close the radius"));
        }
        self.advance();
        digits
            .parse()
            .map_err(|_| LexdexError::syntax(start, format!("radius {} is too large", digits)))
    }
}

/// Recursive-descent parser over the token list
struct QueryParser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> QueryParser<'a> {
    fn new(input: &'a str) -> Result<Self> {
        Ok(Self {
            input,
            tokens: Lexer::new(input).tokenize()?,
            pos: 0,
        })
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    /// Offset of the current token, or the end of input
    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|t| t.offset)
            .unwrap_or(self.input.len())
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn consume(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse(mut self) -> Result<QueryNode> {
        if self.tokens.is_empty() {
            return Err(LexdexError::syntax(0, "empty query"));
        }
        let node = self.parse_or()?;
        match self.tokens.get(self.pos) {
            None => Ok(node),
            Some(Token {
                kind: TokenKind::Close,
                offset,
            }) => Err(LexdexError::syntax(*offset, "unbalanced ')'")),
            Some(token) => Err(LexdexError::syntax(
                token.offset,
                format!("expected an operator before {}", describe(&token.kind)),
            )),
        }
    }

    fn parse_or(&mut self) -> Result<QueryNode> {
        let mut node = self.parse_and()?;
        loop {
            if self.consume(&TokenKind::Or) {
                let right = self.parse_and()?;
                node = match node {
                    QueryNode::Or(mut nodes) => {
                        nodes.push(right);
                        QueryNode::Or(nodes)
                    }
                    left => QueryNode::Or(vec![left, right]),
                };
            } else if self.consume(&TokenKind::Difference) {
                let right = self.parse_and()?;
                node = QueryNode::Difference(Box::new(node), Box::new(right));
            } else {
                return Ok(node);
            }
        }
    }

    fn parse_and(&mut self) -> Result<QueryNode> {
        let mut nodes = vec![self.parse_positional()?];
        while self.consume(&TokenKind::And) {
            nodes.push(self.parse_positional()?);
        }
        Ok(if nodes.len() == 1 {
            nodes.swap_remove(0)
        } else {
            QueryNode::And(nodes)
        })
    }

    fn parse_positional(&mut self) -> Result<QueryNode> {
        let first_at = self.offset();
        let first = self.parse_unary()?;

        match self.peek() {
            Some(TokenKind::Near(radius)) => {
                let radius = *radius;
                self.pos += 1;
                let left = positional_operand(first, first_at)?;
                let right_at = self.offset();
                let right = positional_operand(self.parse_unary()?, right_at)?;
                if let Some(TokenKind::Near(_) | TokenKind::Next) = self.peek() {
                    return Err(LexdexError::syntax(
                        self.offset(),
                        "a proximity operator cannot be chained; use '&' or parentheses",
                    ));
                }
                Ok(QueryNode::Proximity {
                    left,
                    right,
                    radius,
                })
            }
            Some(TokenKind::Next) => {
                let mut chain = vec![positional_operand(first, first_at)?];
                while self.consume(&TokenKind::Next) {
                    let at = self.offset();
                    chain.push(positional_operand(self.parse_unary()?, at)?);
                }
                if let Some(TokenKind::Near(_)) = self.peek() {
                    return Err(LexdexError::syntax(
                        self.offset(),
                        "cannot mix '{N}' and '>' in one chain",
                    ));
                }
                Ok(QueryNode::Ordered(chain))
            }
            _ => Ok(first),
        }
    }

    fn parse_unary(&mut self) -> Result<QueryNode> {
        if self.consume(&TokenKind::Not) {
            return Ok(QueryNode::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<QueryNode> {
        let at = self.offset();
        match self.next() {
            Some(Token {
                kind: TokenKind::Word(word),
                ..
            }) => Ok(QueryNode::Term(word)),
            Some(Token {
                kind: TokenKind::Open,
                offset,
            }) => {
                let node = self.parse_or()?;
                if !self.consume(&TokenKind::Close) {
                    return Err(LexdexError::syntax(offset, "unbalanced '('"));
                }
                Ok(node)
            }
            Some(Token {
                kind: TokenKind::Quote,
                offset,
            }) => self.parse_phrase(offset),
            Some(token) => Err(LexdexError::syntax(
                token.offset,
                format!("expected a term, found {}", describe(&token.kind)),
            )),
            None => Err(LexdexError::syntax(at, "missing operand")),
        }
    }

    /// Words up to the closing quote; the opening quote is already consumed
    fn parse_phrase(&mut self, open: usize) -> Result<QueryNode> {
        let mut words = Vec::new();
        loop {
            match self.next() {
                Some(Token {
                    kind: TokenKind::Word(word),
                    ..
                }) => words.push(word),
                Some(Token {
                    kind: TokenKind::Quote,
                    ..
                }) => break,
                Some(token) => {
                    return Err(LexdexError::syntax(
                        token.offset,
                        format!("only words may appear in a phrase, found {}", describe(&token.kind)),
                    ));
                }
                None => return Err(LexdexError::syntax(open, "unclosed phrase")),
            }
        }
        match words.len() {
            0 => Err(LexdexError::syntax(open, "empty phrase")),
            1 => Ok(QueryNode::Term(words.swap_remove(0))),
            _ => Ok(QueryNode::Phrase(words)),
        }
    }
}

fn positional_operand(node: QueryNode, offset: usize) -> Result<String> {
    match node {
        QueryNode::Term(term) => Ok(term),
        _ => Err(LexdexError::syntax(
            offset,
            "operands of '{N}' and '>' must be single terms",
        )),
    }
}
