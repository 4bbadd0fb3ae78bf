use crate::lang::EvalError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Let,
    For,
    In,
    If,
    Else,
    True,
    False,
    Null,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semicolon,
    Newline,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

/// Split source text into tokens, always ending with `Eof`
pub fn tokenize(source: &str) -> Result<Vec<Token>, EvalError> {
    let chars: Vec<char> = source.chars().collect();
    let mut idx = 0usize;
    let mut line = 1usize;
    let mut tokens = vec![];

    while idx < chars.len() {
        let c = chars[idx];
        let next = chars.get(idx + 1).copied();
        let single = match c {
            '+' => Some(TokenKind::Plus),
            '-' => Some(TokenKind::Minus),
            '*' => Some(TokenKind::Star),
            '/' => Some(TokenKind::Slash),
            '%' => Some(TokenKind::Percent),
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            '[' => Some(TokenKind::LBracket),
            ']' => Some(TokenKind::RBracket),
            '{' => Some(TokenKind::LBrace),
            '}' => Some(TokenKind::RBrace),
            ',' => Some(TokenKind::Comma),
            ':' => Some(TokenKind::Colon),
            ';' => Some(TokenKind::Semicolon),
            _ => None,
        };
        if let Some(kind) = single {
            tokens.push(Token { kind, line });
            idx += 1;
            continue;
        }

        match c {
            '\n' => {
                tokens.push(Token {
                    kind: TokenKind::Newline,
                    line,
                });
                line += 1;
                idx += 1;
            }
            _ if c.is_whitespace() => idx += 1,
            '#' => {
                while idx < chars.len() && chars[idx] != '\n' {
                    idx += 1;
                }
            }
            '=' | '!' | '<' | '>' => {
                let (kind, width) = match (c, next) {
                    ('=', Some('=')) => (TokenKind::EqEq, 2),
                    ('=', _) => (TokenKind::Assign, 1),
                    ('!', Some('=')) => (TokenKind::NotEq, 2),
                    ('!', _) => (TokenKind::Bang, 1),
                    ('<', Some('=')) => (TokenKind::Le, 2),
                    ('<', _) => (TokenKind::Lt, 1),
                    ('>', Some('=')) => (TokenKind::Ge, 2),
                    _ => (TokenKind::Gt, 1),
                };
                tokens.push(Token { kind, line });
                idx += width;
            }
            '&' | '|' => {
                if next != Some(c) {
                    return Err(EvalError::new(line, format!("unexpected character '{c}', did you mean '{c}{c}'?")));
                }
                let kind = if c == '&' {
                    TokenKind::AndAnd
                } else {
                    TokenKind::OrOr
                };
                tokens.push(Token { kind, line });
                idx += 2;
            }
            '"' | '\'' => {
                let (text, end, lines) = read_string(&chars, idx, line)?;
                tokens.push(Token {
                    kind: TokenKind::Str(text),
                    line,
                });
                line += lines;
                idx = end;
            }
            _ if c.is_ascii_digit() => {
                let (kind, end) = read_number(&chars, idx, line)?;
                tokens.push(Token { kind, line });
                idx = end;
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = idx;
                while idx < chars.len() && (chars[idx].is_alphanumeric() || chars[idx] == '_') {
                    idx += 1;
                }
                let word: String = chars[start..idx].iter().collect();
                let kind = match word.as_str() {
                    "let" => TokenKind::Let,
                    "for" => TokenKind::For,
                    "in" => TokenKind::In,
                    "if" => TokenKind::If,
                    "else" => TokenKind::Else,
                    "true" => TokenKind::True,
                    "false" => TokenKind::False,
                    "null" => TokenKind::Null,
                    _ => TokenKind::Ident(word),
                };
                tokens.push(Token { kind, line });
            }
            _ => {
                return Err(EvalError::new(line, format!("unexpected character '{c}'")));
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        line,
    });
    Ok(tokens)
}

/// Returns the unescaped text, the index after the closing quote and the number of newlines seen
fn read_string(chars: &[char], start: usize, line: usize) -> Result<(String, usize, usize), EvalError> {
    let quote = chars[start];
    let mut idx = start + 1;
    let mut text = String::new();
    let mut lines = 0;
    while idx < chars.len() {
        let c = chars[idx];
        match c {
            _ if c == quote => return Ok((text, idx + 1, lines)),
            '\\' => {
                let escaped = chars
                    .get(idx + 1)
                    .ok_or_else(|| EvalError::new(line + lines, "unterminated string"))?;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    '\\' => '\\',
                    '"' => '"',
                    '\'' => '\'',
                    other => {
                        return Err(EvalError::new(
                            line + lines,
                            format!("unknown escape sequence '\\{other}'"),
                        ))
                    }
                });
                idx += 2;
            }
            '\n' => {
                lines += 1;
                text.push(c);
                idx += 1;
            }
            _ => {
                text.push(c);
                idx += 1;
            }
        }
    }
    Err(EvalError::new(line, "unterminated string"))
}

fn read_number(chars: &[char], start: usize, line: usize) -> Result<(TokenKind, usize), EvalError> {
    let mut idx = start;
    let mut is_float = false;
    while idx < chars.len() && (chars[idx].is_ascii_digit() || chars[idx] == '_') {
        idx += 1;
    }
    if idx + 1 < chars.len() && chars[idx] == '.' && chars[idx + 1].is_ascii_digit() {
        is_float = true;
        idx += 1;
        while idx < chars.len() && chars[idx].is_ascii_digit() {
            idx += 1;
        }
    }
    if idx < chars.len() && matches!(chars[idx], 'e' | 'E') {
        let mut look = idx + 1;
        if look < chars.len() && matches!(chars[look], '+' | '-') {
            look += 1;
        }
        if look < chars.len() && chars[look].is_ascii_digit() {
            is_float = true;
            idx = look;
            while idx < chars.len() && chars[idx].is_ascii_digit() {
                idx += 1;
            }
        }
    }

    let raw: String = chars[start..idx].iter().filter(|c| **c != '_').collect();
    let kind = if is_float {
        raw.parse::<f64>()
            .map(TokenKind::Float)
            .map_err(|e| EvalError::new(line, format!("invalid number '{raw}': {e}")))?
    } else {
        raw.parse::<i64>()
            .map(TokenKind::Int)
            .map_err(|e| EvalError::new(line, format!("invalid integer '{raw}': {e}")))?
    };
    Ok((kind, idx))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn call_with_keywords() {
        assert_eq!(
            kinds("submit(x=1, name='a')"),
            vec![
                TokenKind::Ident("submit".into()),
                TokenKind::LParen,
                TokenKind::Ident("x".into()),
                TokenKind::Assign,
                TokenKind::Int(1),
                TokenKind::Comma,
                TokenKind::Ident("name".into()),
                TokenKind::Assign,
                TokenKind::Str("a".into()),
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn numbers_and_operators() {
        assert_eq!(
            kinds("1_000 2.5 3e2 x<=4 a!=b"),
            vec![
                TokenKind::Int(1000),
                TokenKind::Float(2.5),
                TokenKind::Float(300.0),
                TokenKind::Ident("x".into()),
                TokenKind::Le,
                TokenKind::Int(4),
                TokenKind::Ident("a".into()),
                TokenKind::NotEq,
                TokenKind::Ident("b".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_and_lines() {
        let tokens = tokenize("a # note\n\"multi\nline\" b").unwrap();
        let b = tokens.iter().find(|t| t.kind == TokenKind::Ident("b".into())).unwrap();
        assert_eq!(b.line, 3);
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Str("multi\nline".into())));
    }

    #[test]
    fn escapes() {
        assert_eq!(kinds(r#""a\tb\"c""#)[0], TokenKind::Str("a\tb\"c".into()));
    }

    #[test]
    fn unterminated_string_is_reported() {
        let err = tokenize("\n'open").unwrap_err();
        assert_eq!(err.line, 2);
    }
}
