#![allow(clippy::module_name_repetitions)]

//! Lexer and parser for the operator console.
//!
//! The lexer uses `regal` to produce a bounded token stream and the parser
//! composes `winnow` combinators over those tokens. Keywords match
//! case-insensitively.

use core::fmt;
use core::ops::Range;

use heapless::Vec as HeaplessVec;
use regal::IncrementalError;
use regal::TokenCache;
use regal_macros::RegalLexer;
use winnow::combinator::{alt, cut_err, opt, preceded};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::any;

use crate::session::Amount;

/// Maximum number of tokens produced per console line.
pub const MAX_TOKENS: usize = 16;
const MAX_CACHE_RECORDS: usize = MAX_TOKENS * 2;

/// Largest `history` count accepted.
pub const MAX_HISTORY_COUNT: u8 = 64;

/// Lexical token kinds recognized by the console grammar.
#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TokenKind {
    /// Decimal literal such as `1.50`.
    #[regex(r"[0-9]+\.[0-9]+", priority = 2)]
    Decimal,
    /// Unsuffixed integer literal.
    #[regex(r"[0-9]+")]
    Integer,
    /// Identifier or keyword.
    #[regex(r"[A-Za-z][A-Za-z0-9-]*")]
    Ident,
    /// Inline whitespace is ignored.
    #[regex(r"[ \t]+", skip)]
    Whitespace,
    /// End-of-line token (`\r`, `\n`, or `\r\n`).
    #[token("\r\n")]
    #[token("\n")]
    #[token("\r")]
    Eol,
    /// Pseudo variant used when the lexer encounters unsupported input.
    #[default]
    #[regex(r".", priority = 1024)]
    Error,
}

/// Token emitted by the lexer with a byte span back into the source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub span: Range<usize>,
}

/// Bounded token buffer to avoid dynamic allocation in `no_std` environments.
pub type TokenBuffer<'a> = HeaplessVec<Token<'a>, MAX_TOKENS>;

/// Lexer errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexError {
    /// Input produced more tokens than the static buffer allows.
    TooManyTokens { processed: usize },
    /// Underlying lexer reported an unrecoverable error.
    Engine,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::TooManyTokens { processed } => {
                write!(f, "token buffer exhausted after {processed} items")
            }
            LexError::Engine => write!(f, "lexer engine error"),
        }
    }
}

/// Grammar errors emitted by the parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrammarError<'a> {
    /// Line holds no command.
    Empty,
    /// First word is not a known command.
    UnknownCommand { lexeme: &'a str, span: Range<usize> },
    /// A token does not fit the command's arguments.
    UnexpectedToken { lexeme: &'a str, span: Range<usize> },
    /// The command needs more arguments.
    UnexpectedEnd,
    /// The lexer could not classify part of the line.
    InvalidToken { lexeme: &'a str, span: Range<usize> },
}

impl fmt::Display for GrammarError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarError::Empty => f.write_str("empty command"),
            GrammarError::UnknownCommand { lexeme, .. } => {
                write!(f, "unknown command `{lexeme}` (try `help`)")
            }
            GrammarError::UnexpectedToken { lexeme, span } => {
                write!(f, "unexpected `{lexeme}` at {span:?}")
            }
            GrammarError::UnexpectedEnd => f.write_str("missing argument"),
            GrammarError::InvalidToken { lexeme, span } => {
                write!(f, "unsupported token `{lexeme}` at {span:?}")
            }
        }
    }
}

/// Combined lex/parse error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError<'a> {
    Lex(LexError),
    Grammar(GrammarError<'a>),
}

impl fmt::Display for ParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(err) => err.fmt(f),
            ParseError::Grammar(err) => err.fmt(f),
        }
    }
}

/// Structured commands produced by the parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Status,
    Price(Amount),
    Buy,
    Cancel,
    History(Option<u8>),
    Help(HelpCommand<'a>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelpCommand<'a> {
    pub topic: Option<&'a str>,
}

type Input<'src, 'slice> = &'slice [Token<'src>];

/// Tokenize the provided line.
///
/// # Errors
///
/// Returns [`LexError`] when the line overflows the token buffer.
pub fn lex(line: &str) -> Result<TokenBuffer<'_>, LexError> {
    let compiled = TokenKind::lexer();
    let mut cache: TokenCache<TokenKind, MAX_CACHE_RECORDS> = TokenCache::new();
    let partial = cache
        .rebuild(compiled, line)
        .map_err(map_incremental_error)?;
    let mut buffer = TokenBuffer::new();

    for record in cache.tokens() {
        if record.skipped {
            continue;
        }

        let span = record.start..record.end;
        let lexeme = &line[span.clone()];
        push_token(
            &mut buffer,
            Token {
                kind: record.token,
                lexeme,
                span,
            },
        )?;
    }

    if let Some(partial) = partial.filter(|partial| !partial.fragment.is_empty()) {
        let start = partial.start;
        let end = start + partial.fragment.len();
        push_token(
            &mut buffer,
            Token {
                kind: TokenKind::Error,
                lexeme: partial.fragment,
                span: start..end,
            },
        )?;
    }

    Ok(buffer)
}

fn push_token<'a>(buffer: &mut TokenBuffer<'a>, token: Token<'a>) -> Result<(), LexError> {
    buffer.push(token).map_err(|_| LexError::TooManyTokens {
        processed: MAX_TOKENS + 1,
    })
}

fn map_incremental_error(error: IncrementalError) -> LexError {
    match error {
        IncrementalError::TokenOverflow => LexError::TooManyTokens {
            processed: MAX_TOKENS,
        },
        _ => LexError::Engine,
    }
}

/// Parse a console command from the provided line.
///
/// # Errors
///
/// Returns [`ParseError`] for lexer failures, unknown commands and bad arguments.
pub fn parse(line: &str) -> Result<Command<'_>, ParseError<'_>> {
    let tokens = lex(line).map_err(ParseError::Lex)?;

    for token in tokens.iter() {
        if token.kind == TokenKind::Error {
            return Err(ParseError::Grammar(GrammarError::InvalidToken {
                lexeme: token.lexeme,
                span: token.span.clone(),
            }));
        }
    }

    let mut significant = tokens.as_slice();
    while let Some((last, head)) = significant.split_last() {
        if last.kind != TokenKind::Eol {
            break;
        }
        significant = head;
    }

    if significant.is_empty() {
        return Err(ParseError::Grammar(GrammarError::Empty));
    }

    command.parse(significant).map_err(|error| {
        let offset = error.offset();
        ParseError::Grammar(match significant.get(offset) {
            Some(token) if offset == 0 => GrammarError::UnknownCommand {
                lexeme: token.lexeme,
                span: token.span.clone(),
            },
            Some(token) => GrammarError::UnexpectedToken {
                lexeme: token.lexeme,
                span: token.span.clone(),
            },
            None => GrammarError::UnexpectedEnd,
        })
    })
}

fn command<'src, 'slice>(input: &mut Input<'src, 'slice>) -> ModalResult<Command<'src>>
where
    'src: 'slice,
{
    alt((
        keyword("status").value(Command::Status),
        keyword("buy").value(Command::Buy),
        keyword("cancel").value(Command::Cancel),
        preceded(keyword("price"), cut_err(amount)).map(Command::Price),
        preceded(keyword("history"), cut_err(opt(history_count))).map(Command::History),
        preceded(keyword("help"), cut_err(opt(topic)))
            .map(|topic| Command::Help(HelpCommand { topic })),
    ))
    .parse_next(input)
}

fn keyword<'src, 'slice>(
    word: &'static str,
) -> impl Parser<Input<'src, 'slice>, Token<'src>, ErrMode<ContextError>>
where
    'src: 'slice,
{
    any.verify(move |token: &Token<'src>| {
        token.kind == TokenKind::Ident && token.lexeme.eq_ignore_ascii_case(word)
    })
}

fn topic<'src, 'slice>(input: &mut Input<'src, 'slice>) -> ModalResult<&'src str>
where
    'src: 'slice,
{
    any.verify(|token: &Token<'src>| token.kind == TokenKind::Ident)
        .map(|token: Token<'src>| token.lexeme)
        .parse_next(input)
}

fn history_count<'src, 'slice>(input: &mut Input<'src, 'slice>) -> ModalResult<u8>
where
    'src: 'slice,
{
    any.verify(|token: &Token<'src>| token.kind == TokenKind::Integer)
        .verify_map(|token: Token<'src>| {
            token
                .lexeme
                .parse::<u8>()
                .ok()
                .filter(|count| (1..=MAX_HISTORY_COUNT).contains(count))
        })
        .parse_next(input)
}

fn amount<'src, 'slice>(input: &mut Input<'src, 'slice>) -> ModalResult<Amount>
where
    'src: 'slice,
{
    any.verify_map(|token: Token<'src>| match token.kind {
        TokenKind::Integer | TokenKind::Decimal => parse_amount(token.lexeme),
        _ => None,
    })
    .parse_next(input)
}

/// Parses `150` as minor units and `1.50` / `1.5` as a decimal amount.
#[must_use]
pub fn parse_amount(text: &str) -> Option<Amount> {
    match text.split_once('.') {
        None => text.parse::<u32>().ok().map(Amount::from_minor),
        Some((whole, fraction)) => {
            if fraction.is_empty() || fraction.len() > 2 {
                return None;
            }
            let whole = whole.parse::<u32>().ok()?;
            let mut cents = fraction.parse::<u32>().ok()?;
            if fraction.len() == 1 {
                cents *= 10;
            }
            whole
                .checked_mul(100)
                .and_then(|minor| minor.checked_add(cents))
                .map(Amount::from_minor)
        }
    }
}
