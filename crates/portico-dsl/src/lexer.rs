//! Tokenizer for template expressions.

use crate::DslError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Number(String),
    Str(String),
    Bool(bool),
    Null,
    Ident(String),

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,

    Dot,
    Comma,
    Question,
    Colon,
    Pipe,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub pos: usize,
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, DslError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        let c = bytes[i] as char;

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        // Line and block comments.
        if c == '/' && bytes.get(i + 1) == Some(&b'/') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && bytes.get(i + 1) == Some(&b'*') {
            let start = i;
            i += 2;
            loop {
                if i + 1 >= bytes.len() {
                    return Err(DslError::at("unterminated block comment", start));
                }
                if bytes[i] == b'*' && bytes[i + 1] == b'/' {
                    i += 2;
                    break;
                }
                i += 1;
            }
            continue;
        }

        let pos = i;
        let kind = match c {
            '0'..='9' => {
                let mut end = i;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if end < bytes.len()
                    && bytes[end] == b'.'
                    && end + 1 < bytes.len()
                    && bytes[end + 1].is_ascii_digit()
                {
                    end += 1;
                    while end < bytes.len() && bytes[end].is_ascii_digit() {
                        end += 1;
                    }
                }
                let lexeme = source[i..end].to_string();
                i = end;
                tokens.push(Token {
                    kind: TokenKind::Number(lexeme),
                    pos,
                });
                continue;
            }
            '"' | '\'' => {
                let (s, next) = read_string(source, i, c)?;
                i = next;
                tokens.push(Token {
                    kind: TokenKind::Str(s),
                    pos,
                });
                continue;
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut end = i;
                while end < bytes.len()
                    && ((bytes[end] as char).is_ascii_alphanumeric() || bytes[end] == b'_')
                {
                    end += 1;
                }
                let word = &source[i..end];
                i = end;
                let kind = match word {
                    "true" => TokenKind::Bool(true),
                    "false" => TokenKind::Bool(false),
                    "null" => TokenKind::Null,
                    _ => TokenKind::Ident(word.to_string()),
                };
                tokens.push(Token { kind, pos });
                continue;
            }
            '=' if bytes.get(i + 1) == Some(&b'=') => {
                i += 2;
                TokenKind::EqEq
            }
            '!' if bytes.get(i + 1) == Some(&b'=') => {
                i += 2;
                TokenKind::NotEq
            }
            '<' if bytes.get(i + 1) == Some(&b'=') => {
                i += 2;
                TokenKind::Le
            }
            '>' if bytes.get(i + 1) == Some(&b'=') => {
                i += 2;
                TokenKind::Ge
            }
            '&' if bytes.get(i + 1) == Some(&b'&') => {
                i += 2;
                TokenKind::AndAnd
            }
            '|' if bytes.get(i + 1) == Some(&b'|') => {
                i += 2;
                TokenKind::OrOr
            }
            _ => {
                i += 1;
                match c {
                    '+' => TokenKind::Plus,
                    '-' => TokenKind::Minus,
                    '*' => TokenKind::Star,
                    '/' => TokenKind::Slash,
                    '%' => TokenKind::Percent,
                    '<' => TokenKind::Lt,
                    '>' => TokenKind::Gt,
                    '!' => TokenKind::Bang,
                    '.' => TokenKind::Dot,
                    ',' => TokenKind::Comma,
                    '?' => TokenKind::Question,
                    ':' => TokenKind::Colon,
                    '|' => TokenKind::Pipe,
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    '[' => TokenKind::LBracket,
                    ']' => TokenKind::RBracket,
                    '{' => TokenKind::LBrace,
                    '}' => TokenKind::RBrace,
                    other => {
                        return Err(DslError::at(format!("unexpected character '{other}'"), pos));
                    }
                }
            }
        };
        tokens.push(Token { kind, pos });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        pos: bytes.len(),
    });
    Ok(tokens)
}

fn read_string(source: &str, start: usize, quote: char) -> Result<(String, usize), DslError> {
    let bytes = source.as_bytes();
    let mut out = String::new();
    let mut i = start + 1;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if c == quote {
            return Ok((out, i + 1));
        }
        if c == '\\' {
            let Some(&esc) = bytes.get(i + 1) else {
                break;
            };
            out.push(match esc as char {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '\\' => '\\',
                '"' => '"',
                '\'' => '\'',
                other => other,
            });
            i += 2;
            continue;
        }
        // Multi-byte chars pass through verbatim.
        let ch_len = source[i..].chars().next().map_or(1, char::len_utf8);
        out.push_str(&source[i..i + ch_len]);
        i += ch_len;
    }

    Err(DslError::at("unterminated string literal", start))
}

#[cfg(test)]
mod tests {
    use super::{TokenKind, tokenize};

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).expect("tokenize").into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn tokenizes_operators_and_literals() {
        assert_eq!(
            kinds(r#"a.b == 1.5 && !c"#),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Dot,
                TokenKind::Ident("b".into()),
                TokenKind::EqEq,
                TokenKind::Number("1.5".into()),
                TokenKind::AndAnd,
                TokenKind::Bang,
                TokenKind::Ident("c".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn distinguishes_pipe_from_logical_or() {
        assert_eq!(
            kinds("a | b || c"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Pipe,
                TokenKind::Ident("b".into()),
                TokenKind::OrOr,
                TokenKind::Ident("c".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn handles_string_escapes_and_comments() {
        assert_eq!(
            kinds("\"a\\nb\" // trailing\n/* block */ 'x'"),
            vec![
                TokenKind::Str("a\nb".into()),
                TokenKind::Str("x".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn rejects_unterminated_strings() {
        assert!(tokenize("\"abc").is_err());
    }
}
