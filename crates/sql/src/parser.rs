//! Recursive-descent parser for the supported dialect.
//!
//! Tokenization is delegated to `sqlparser`; the grammar itself is
//! hand-driven because the dialect is deliberately small and includes
//! non-standard forms (`INSERT INTO t FROM '<path>' ROWS PER SHARD n`,
//! trailing `IF [NOT] EXISTS`).
//!
//! Static constraints enforced here:
//! - SELECT list items are bare columns, `agg(col)`, or `agg(*)`;
//! - WHERE is a conjunction of `col OP literal` / `col IS [NOT] NULL` atoms;
//! - GROUP BY lists bare columns only;
//! - with any aggregate present, every non-aggregate projection must appear
//!   in GROUP BY.

use std::fmt;

use msf_common::{ColumnDef, ColumnType, MsfError};
use sqlparser::dialect::GenericDialect;
use sqlparser::tokenizer::{Token, TokenWithLocation, Tokenizer, Word};

use crate::ast::{
    AggArg, AggFunc, CmpOp, CreateTable, DropTable, InsertFrom, Literal, Predicate, Projection,
    Select, SelectItem, Statement,
};

/// Parse failure with the byte offset of the offending token and the set of
/// token kinds that would have been accepted there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Byte offset into the statement text.
    pub offset: usize,
    /// Token actually found, or a static-validation description.
    pub found: String,
    /// Accepted alternatives; empty for static-validation failures.
    pub expected: Vec<&'static str>,
}

impl ParseError {
    fn semantic(message: impl Into<String>) -> Self {
        Self {
            offset: 0,
            found: message.into(),
            expected: Vec::new(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.expected.is_empty() {
            write!(f, "{}", self.found)
        } else {
            write!(
                f,
                "expected {}, found {} at offset {}",
                self.expected.join(" | "),
                self.found,
                self.offset
            )
        }
    }
}

impl std::error::Error for ParseError {}

impl From<ParseError> for MsfError {
    fn from(err: ParseError) -> Self {
        MsfError::Parse(err.to_string())
    }
}

/// Parse one SQL statement.
pub fn parse_statement(sql: &str) -> Result<Statement, ParseError> {
    let mut parser = Parser::new(sql)?;
    let statement = parser.parse_statement()?;
    parser.expect_end()?;
    Ok(statement)
}

fn is_reserved(word: &str) -> bool {
    matches!(
        word,
        "select"
            | "create"
            | "drop"
            | "insert"
            | "into"
            | "table"
            | "from"
            | "where"
            | "group"
            | "by"
            | "as"
            | "and"
            | "is"
            | "not"
            | "null"
            | "if"
            | "exists"
            | "rows"
            | "per"
            | "shard"
    )
}

struct Parser<'a> {
    sql: &'a str,
    tokens: Vec<TokenWithLocation>,
    pos: usize,
    eof: Token,
}

impl<'a> Parser<'a> {
    fn new(sql: &'a str) -> Result<Self, ParseError> {
        let dialect = GenericDialect {};
        let tokens = Tokenizer::new(&dialect, sql)
            .tokenize_with_location()
            .map_err(|e| ParseError {
                offset: sql.len(),
                found: e.to_string(),
                expected: vec!["valid token"],
            })?
            .into_iter()
            .filter(|t| !matches!(t.token, Token::Whitespace(_)))
            .collect();
        Ok(Self {
            sql,
            tokens,
            pos: 0,
            eof: Token::EOF,
        })
    }

    fn peek(&self) -> &Token {
        self.peek_ahead(0)
    }

    fn peek_ahead(&self, n: usize) -> &Token {
        self.tokens
            .get(self.pos + n)
            .map(|t| &t.token)
            .unwrap_or(&self.eof)
    }

    fn eat_token(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn offset(&self) -> usize {
        match self.tokens.get(self.pos) {
            Some(t) => byte_offset(self.sql, t.location.line, t.location.column),
            None => self.sql.len(),
        }
    }

    fn error(&self, expected: Vec<&'static str>) -> ParseError {
        let found = match self.peek() {
            Token::EOF => "end of statement".to_string(),
            tok => format!("'{tok}'"),
        };
        ParseError {
            offset: self.offset(),
            found,
            expected,
        }
    }

    fn peek_word(&self) -> Option<&Word> {
        match self.peek() {
            Token::Word(w) => Some(w),
            _ => None,
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        let hit = self
            .peek_word()
            .is_some_and(|w| w.quote_style.is_none() && w.value.eq_ignore_ascii_case(kw));
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn expect_keyword(&mut self, kw: &str, label: &'static str) -> Result<(), ParseError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.error(vec![label]))
        }
    }

    fn expect_token(&mut self, token: &Token, label: &'static str) -> Result<(), ParseError> {
        if self.eat_token(token) {
            Ok(())
        } else {
            Err(self.error(vec![label]))
        }
    }

    fn parse_ident(&mut self, label: &'static str) -> Result<String, ParseError> {
        match self.peek() {
            Token::Word(w) if w.quote_style.is_some() => {
                let value = w.value.clone();
                self.pos += 1;
                Ok(value)
            }
            Token::Word(w) if !is_reserved(&w.value.to_ascii_lowercase()) => {
                let value = w.value.to_ascii_lowercase();
                self.pos += 1;
                Ok(value)
            }
            _ => Err(self.error(vec![label])),
        }
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        if self.eat_keyword("select") {
            return self.parse_select().map(Statement::Select);
        }
        if self.eat_keyword("create") {
            return self.parse_create().map(Statement::CreateTable);
        }
        if self.eat_keyword("drop") {
            return self.parse_drop().map(Statement::DropTable);
        }
        if self.eat_keyword("insert") {
            return self.parse_insert().map(Statement::InsertFrom);
        }
        Err(self.error(vec!["SELECT", "CREATE", "DROP", "INSERT"]))
    }

    fn expect_end(&mut self) -> Result<(), ParseError> {
        let _ = self.expect_token(&Token::SemiColon, ";");
        if matches!(self.peek(), Token::EOF) {
            Ok(())
        } else {
            Err(self.error(vec!["end of statement"]))
        }
    }

    fn parse_if_not_exists(&mut self) -> Result<bool, ParseError> {
        if self.eat_keyword("if") {
            self.expect_keyword("not", "NOT")?;
            self.expect_keyword("exists", "EXISTS")?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn parse_if_exists(&mut self) -> Result<bool, ParseError> {
        if self.eat_keyword("if") {
            self.expect_keyword("exists", "EXISTS")?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn parse_create(&mut self) -> Result<CreateTable, ParseError> {
        self.expect_keyword("table", "TABLE")?;
        let mut if_not_exists = self.parse_if_not_exists()?;
        let table = self.parse_ident("table name")?;
        self.expect_token(&Token::LParen, "(")?;

        let mut columns: Vec<ColumnDef> = Vec::new();
        loop {
            let name = self.parse_ident("column name")?;
            if columns.iter().any(|c| c.name == name) {
                return Err(ParseError::semantic(format!(
                    "duplicate column name '{name}'"
                )));
            }
            let ty = self.parse_type()?;
            let not_null = self.parse_not_null()?;
            columns.push(ColumnDef {
                name,
                ty,
                not_null,
            });
            if !self.eat_token(&Token::Comma) {
                break;
            }
        }
        self.expect_token(&Token::RParen, ")")?;
        if self.parse_if_not_exists()? {
            if_not_exists = true;
        }
        Ok(CreateTable {
            table,
            columns,
            if_not_exists,
        })
    }

    fn parse_type(&mut self) -> Result<ColumnType, ParseError> {
        let err = self.error(vec!["type name"]);
        let Some(word) = self.peek_word() else {
            return Err(err);
        };
        let Some(ty) = ColumnType::parse(&word.value) else {
            return Err(err);
        };
        self.pos += 1;
        // Optional precision arguments, e.g. DECIMAL(10, 2); values are
        // accepted and ignored.
        if self.eat_token(&Token::LParen) {
            loop {
                if !matches!(self.peek(), Token::Number(_, _)) {
                    return Err(self.error(vec!["precision"]));
                }
                self.pos += 1;
                if !self.eat_token(&Token::Comma) {
                    break;
                }
            }
            self.expect_token(&Token::RParen, ")")?;
        }
        Ok(ty)
    }

    // Accepts both the `IS NOT NULL` and the plain `NOT NULL` constraint
    // spellings.
    fn parse_not_null(&mut self) -> Result<bool, ParseError> {
        if self.eat_keyword("is") {
            self.expect_keyword("not", "NOT")?;
            self.expect_keyword("null", "NULL")?;
            return Ok(true);
        }
        if self.eat_keyword("not") {
            self.expect_keyword("null", "NULL")?;
            return Ok(true);
        }
        Ok(false)
    }

    fn parse_drop(&mut self) -> Result<DropTable, ParseError> {
        self.expect_keyword("table", "TABLE")?;
        let mut if_exists = self.parse_if_exists()?;
        let table = self.parse_ident("table name")?;
        if self.parse_if_exists()? {
            if_exists = true;
        }
        Ok(DropTable { table, if_exists })
    }

    fn parse_insert(&mut self) -> Result<InsertFrom, ParseError> {
        self.expect_keyword("into", "INTO")?;
        let table = self.parse_ident("table name")?;
        self.expect_keyword("from", "FROM")?;
        let source = match self.peek().clone() {
            Token::SingleQuotedString(s) => {
                self.pos += 1;
                s
            }
            _ => return Err(self.error(vec!["quoted source path"])),
        };
        let rows_per_shard = if self.eat_keyword("rows") {
            self.expect_keyword("per", "PER")?;
            self.expect_keyword("shard", "SHARD")?;
            match self.peek().clone() {
                Token::Number(n, _) => {
                    let parsed = n.parse::<usize>().map_err(|_| ParseError {
                        offset: self.offset(),
                        found: format!("'{n}'"),
                        expected: vec!["positive integer"],
                    })?;
                    self.pos += 1;
                    Some(parsed)
                }
                _ => return Err(self.error(vec!["positive integer"])),
            }
        } else {
            None
        };
        Ok(InsertFrom {
            table,
            source,
            rows_per_shard,
        })
    }

    fn parse_select(&mut self) -> Result<Select, ParseError> {
        let projection = if self.eat_token(&Token::Mul) {
            Projection::Star
        } else {
            let mut items = Vec::new();
            loop {
                items.push(self.parse_select_item()?);
                if !self.eat_token(&Token::Comma) {
                    break;
                }
            }
            Projection::Items(items)
        };
        self.expect_keyword("from", "FROM")?;
        let table = self.parse_ident("table name")?;

        let mut predicates = Vec::new();
        if self.eat_keyword("where") {
            loop {
                predicates.push(self.parse_predicate()?);
                if !self.eat_keyword("and") {
                    break;
                }
            }
        }

        let mut group_by = Vec::new();
        if self.eat_keyword("group") {
            self.expect_keyword("by", "BY")?;
            loop {
                group_by.push(self.parse_ident("column name")?);
                if !self.eat_token(&Token::Comma) {
                    break;
                }
            }
        }

        let select = Select {
            table,
            projection,
            predicates,
            group_by,
        };
        validate_select(&select)?;
        Ok(select)
    }

    fn parse_select_item(&mut self) -> Result<SelectItem, ParseError> {
        let agg = self.peek_word().and_then(|w| {
            if w.quote_style.is_none() && matches!(self.peek_ahead(1), Token::LParen) {
                AggFunc::parse(&w.value.to_ascii_lowercase())
            } else {
                None
            }
        });
        if let Some(func) = agg {
            self.pos += 1;
            self.expect_token(&Token::LParen, "(")?;
            let arg = if self.eat_token(&Token::Mul) {
                AggArg::Star
            } else {
                AggArg::Column(self.parse_ident("column name")?)
            };
            self.expect_token(&Token::RParen, ")")?;
            let alias = self.parse_alias()?;
            if matches!(arg, AggArg::Star) && func != AggFunc::Count {
                return Err(ParseError::semantic(format!(
                    "{}(*) is not supported; only COUNT accepts *",
                    func.name()
                )));
            }
            Ok(SelectItem::Aggregate { func, arg, alias })
        } else {
            let name = self.parse_ident("column name or aggregate")?;
            let alias = self.parse_alias()?;
            Ok(SelectItem::Column { name, alias })
        }
    }

    fn parse_alias(&mut self) -> Result<Option<String>, ParseError> {
        if self.eat_keyword("as") {
            Ok(Some(self.parse_ident("alias")?))
        } else {
            Ok(None)
        }
    }

    fn parse_predicate(&mut self) -> Result<Predicate, ParseError> {
        let col = self.parse_ident("column name")?;
        if self.eat_keyword("is") {
            return if self.eat_keyword("not") {
                self.expect_keyword("null", "NULL")?;
                Ok(Predicate::IsNotNull { col })
            } else {
                self.expect_keyword("null", "NULL")?;
                Ok(Predicate::IsNull { col })
            };
        }
        let op = match self.peek() {
            Token::Eq => CmpOp::Eq,
            Token::Neq => CmpOp::NotEq,
            Token::Lt => CmpOp::Lt,
            Token::LtEq => CmpOp::LtEq,
            Token::Gt => CmpOp::Gt,
            Token::GtEq => CmpOp::GtEq,
            _ => return Err(self.error(vec!["=", "!=", "<", "<=", ">", ">=", "IS"])),
        };
        self.pos += 1;
        let value = self.parse_literal()?;
        Ok(Predicate::Compare { col, op, value })
    }

    fn parse_literal(&mut self) -> Result<Literal, ParseError> {
        let negative = matches!(self.peek(), Token::Minus);
        if negative {
            self.pos += 1;
        }
        let literal = match self.peek().clone() {
            Token::Number(text, _) => {
                parse_number(&text, negative).ok_or_else(|| ParseError {
                    offset: self.offset(),
                    found: format!("'{text}'"),
                    expected: vec!["numeric literal"],
                })?
            }
            Token::SingleQuotedString(s) if !negative => Literal::Str(s),
            Token::Word(w) if !negative && w.value.eq_ignore_ascii_case("true") => {
                Literal::Bool(true)
            }
            Token::Word(w) if !negative && w.value.eq_ignore_ascii_case("false") => {
                Literal::Bool(false)
            }
            Token::Word(w) if !negative && w.value.eq_ignore_ascii_case("null") => Literal::Null,
            _ => return Err(self.error(vec!["literal"])),
        };
        self.pos += 1;
        Ok(literal)
    }
}

fn parse_number(text: &str, negative: bool) -> Option<Literal> {
    if let Ok(v) = text.parse::<i64>() {
        return Some(Literal::Int(if negative { -v } else { v }));
    }
    text.parse::<f64>()
        .ok()
        .map(|v| Literal::Float(if negative { -v } else { v }))
}

fn validate_select(select: &Select) -> Result<(), ParseError> {
    match &select.projection {
        Projection::Star => {
            if !select.group_by.is_empty() {
                return Err(ParseError::semantic(
                    "SELECT * cannot be combined with GROUP BY",
                ));
            }
        }
        Projection::Items(items) => {
            let grouped = select.has_aggregates() || !select.group_by.is_empty();
            if grouped {
                for item in items {
                    if let SelectItem::Column { name, .. } = item {
                        if !select.group_by.iter().any(|g| g == name) {
                            return Err(ParseError::semantic(format!(
                                "non-aggregate column '{name}' must appear in GROUP BY"
                            )));
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn byte_offset(sql: &str, line: u64, column: u64) -> usize {
    if line == 0 {
        return 0;
    }
    let mut offset = 0usize;
    for (idx, text) in sql.split('\n').enumerate() {
        if idx as u64 + 1 == line {
            let col = column.saturating_sub(1) as usize;
            return offset
                + text
                    .char_indices()
                    .nth(col)
                    .map(|(b, _)| b)
                    .unwrap_or(text.len());
        }
        offset += text.len() + 1;
    }
    sql.len()
}
