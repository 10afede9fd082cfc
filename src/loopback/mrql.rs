//! The subset of MRQL the loopback server understands.
//!
//! ```text
//! mrql:category=SPEC and downLink=TC
//! mrql:(label=DAYTIME or label="NIGHT TIME") and not category=XTC
//! fridge                      (no prefix: title search)
//! ```

use crate::types::Item;
use thiserror::Error;

const MRQL_PREFIX: &str = "mrql:";

/// Deepest allowed nesting of parentheses and `not`.
const MAX_DEPTH: usize = 64;

/// Most conditions one query may combine.
const MAX_TERMS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct QueryError(pub String);

/// Resolves relationships while evaluating a query.
pub trait Catalog {
    /// Category of the item with this ID, if it exists.
    fn category_of(&self, id: &str) -> Option<&str>;

    /// IDs of items that link down to `id`.
    fn linked_from(&self, id: &str) -> Vec<&str>;
}

/// A parsed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    All,
    Category(String),
    Label(String),
    Id(String),
    /// Has a downlink to an item of this category
    DownLink(String),
    /// Is linked from an item of this category
    UpLink(String),
    TitleIs(String),
    TitleContains(String),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn matches(&self, item: &Item, catalog: &dyn Catalog) -> bool {
        match self {
            Expr::All => true,
            Expr::Category(category) => item.category.eq_ignore_ascii_case(category),
            Expr::Label(label) => item.labels.iter().any(|l| l == label),
            Expr::Id(id) => item.id.as_deref().is_some_and(|own| own.eq_ignore_ascii_case(id)),
            Expr::DownLink(category) => item.downlinks.iter().any(|link| {
                catalog
                    .category_of(&link.to)
                    .is_some_and(|c| c.eq_ignore_ascii_case(category))
            }),
            Expr::UpLink(category) => item.id.as_deref().is_some_and(|id| {
                catalog
                    .linked_from(id)
                    .iter()
                    .any(|source| catalog.category_of(source).is_some_and(|c| c.eq_ignore_ascii_case(category)))
            }),
            Expr::TitleIs(title) => item.title == *title,
            Expr::TitleContains(text) => item.title.to_lowercase().contains(&text.to_lowercase()),
            Expr::And(a, b) => a.matches(item, catalog) && b.matches(item, catalog),
            Expr::Or(a, b) => a.matches(item, catalog) || b.matches(item, catalog),
            Expr::Not(inner) => !inner.matches(item, catalog),
        }
    }
}

/// Parse a query string.
pub fn parse(query: &str) -> Result<Expr, QueryError> {
    let trimmed = query.trim();
    let Some(body) = strip_prefix_ignore_case(trimmed, MRQL_PREFIX) else {
        if trimmed.is_empty() {
            return Ok(Expr::All);
        }
        return Ok(Expr::TitleContains(trimmed.to_string()));
    };

    let tokens = tokenize(body)?;
    if tokens.is_empty() {
        return Err(QueryError("empty MRQL expression".to_string()));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        terms: 0,
    };
    let expr = parser.or_expr()?;
    if let Some(token) = parser.peek() {
        return Err(QueryError(format!("unexpected {} after expression", token.describe())));
    }
    Ok(expr)
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s.is_char_boundary(prefix.len()) && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
    Eq,
    Tilde,
    Open,
    Close,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Word(w) => format!("'{}'", w),
            Token::Quoted(q) => format!("\"{}\"", q),
            Token::Eq => "'='".to_string(),
            Token::Tilde => "'~'".to_string(),
            Token::Open => "'('".to_string(),
            Token::Close => "')'".to_string(),
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, QueryError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            }
            '~' => {
                chars.next();
                tokens.push(Token::Tilde);
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped) => value.push(escaped),
                            None => return Err(QueryError("unterminated string".to_string())),
                        },
                        Some(other) => value.push(other),
                        None => return Err(QueryError("unterminated string".to_string())),
                    }
                }
                tokens.push(Token::Quoted(value));
            }
            c if is_word_char(c) => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if !is_word_char(c) {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
            other => return Err(QueryError(format!("unexpected character '{}'", other))),
        }
    }

    Ok(tokens)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    terms: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn or_expr(&mut self) -> Result<Expr, QueryError> {
        let mut expr = self.and_expr()?;
        while self.peek().is_some_and(|t| t.is_keyword("or")) {
            self.pos += 1;
            let rhs = self.and_expr()?;
            expr = Expr::Or(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn and_expr(&mut self) -> Result<Expr, QueryError> {
        let mut expr = self.unary()?;
        while self.peek().is_some_and(|t| t.is_keyword("and")) {
            self.pos += 1;
            let rhs = self.unary()?;
            expr = Expr::And(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expr, QueryError> {
        match self.peek() {
            Some(t) if t.is_keyword("not") => {
                self.pos += 1;
                self.descend()?;
                let inner = self.unary()?;
                self.depth -= 1;
                Ok(Expr::Not(Box::new(inner)))
            }
            Some(Token::Open) => {
                self.pos += 1;
                self.descend()?;
                let expr = self.or_expr()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Token::Close) => Ok(expr),
                    _ => Err(QueryError("missing ')'".to_string())),
                }
            }
            _ => self.atom(),
        }
    }

    fn descend(&mut self) -> Result<(), QueryError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(QueryError("query nested too deeply".to_string()));
        }
        Ok(())
    }

    fn atom(&mut self) -> Result<Expr, QueryError> {
        self.terms += 1;
        if self.terms > MAX_TERMS {
            return Err(QueryError(format!("query has more than {} conditions", MAX_TERMS)));
        }
        let field = match self.advance() {
            Some(Token::Word(w)) => w.to_lowercase(),
            Some(other) => return Err(QueryError(format!("expected a field name, found {}", other.describe()))),
            None => return Err(QueryError("unexpected end of query".to_string())),
        };
        let operator = self.advance();
        let value = match self.advance() {
            Some(Token::Word(w)) | Some(Token::Quoted(w)) => w,
            _ => return Err(QueryError(format!("expected a value after '{}'", field))),
        };

        match (field.as_str(), operator) {
            ("category", Some(Token::Eq)) => Ok(Expr::Category(value)),
            ("label", Some(Token::Eq)) => Ok(Expr::Label(value)),
            ("id", Some(Token::Eq)) => Ok(Expr::Id(value)),
            ("downlink", Some(Token::Eq)) => Ok(Expr::DownLink(value)),
            ("uplink", Some(Token::Eq)) => Ok(Expr::UpLink(value)),
            ("title", Some(Token::Eq)) => Ok(Expr::TitleIs(value)),
            ("title", Some(Token::Tilde)) => Ok(Expr::TitleContains(value)),
            (_, Some(Token::Eq)) | (_, Some(Token::Tilde)) => Err(QueryError(format!("unknown field '{}'", field))),
            _ => Err(QueryError(format!("expected '=' or '~' after '{}'", field))),
        }
    }
}
