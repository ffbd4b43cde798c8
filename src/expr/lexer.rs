//! Tokenizer for mapping expressions.

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Token {
    Dot,
    DotDot,
    /// `.name` field access
    Field(String),
    Ident(String),
    Num(f64),
    Str(Vec<StrPart>),
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Pipe,
    Comma,
    Colon,
    Semicolon,
    Question,
    Alt,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum StrPart {
    Lit(String),
    /// Tokens of a `\( .. )` interpolation, without the closing paren
    Interp(Vec<Token>),
}

pub(super) fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
    };
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token == Token::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
            } else if c == '#' {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn next_token(&mut self) -> Result<Token, String> {
        self.skip_trivia();
        let Some(c) = self.bump() else {
            return Ok(Token::Eof);
        };

        let token = match c {
            '.' => match self.peek() {
                Some('.') => {
                    self.pos += 1;
                    Token::DotDot
                }
                Some(n) if is_ident_start(n) => Token::Field(self.ident()),
                _ => Token::Dot,
            },
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '|' => Token::Pipe,
            ',' => Token::Comma,
            ':' => Token::Colon,
            ';' => Token::Semicolon,
            '?' => Token::Question,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '%' => Token::Percent,
            '/' => {
                if self.peek() == Some('/') {
                    self.pos += 1;
                    Token::Alt
                } else {
                    Token::Slash
                }
            }
            '=' if self.peek() == Some('=') => {
                self.pos += 1;
                Token::Eq
            }
            '!' if self.peek() == Some('=') => {
                self.pos += 1;
                Token::Ne
            }
            '<' => {
                if self.peek() == Some('=') {
                    self.pos += 1;
                    Token::Le
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.pos += 1;
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            '"' => Token::Str(self.string()?),
            c if c.is_ascii_digit() => self.number(c)?,
            c if is_ident_start(c) => {
                self.pos -= 1;
                Token::Ident(self.ident())
            }
            other => return Err(format!("unexpected character '{other}'")),
        };
        Ok(token)
    }

    fn number(&mut self, first: char) -> Result<Token, String> {
        let mut text = String::from(first);
        while let Some(c) = self.peek() {
            let exponent_sign =
                (c == '+' || c == '-') && matches!(text.chars().last(), Some('e' | 'E'));
            if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || exponent_sign {
                text.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        text.parse()
            .map(Token::Num)
            .map_err(|_| format!("invalid number '{text}'"))
    }

    fn string(&mut self) -> Result<Vec<StrPart>, String> {
        let mut parts = Vec::new();
        let mut current = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err("unterminated string".into());
            };
            match c {
                '"' => break,
                '\\' => {
                    let Some(escape) = self.bump() else {
                        return Err("unterminated escape".into());
                    };
                    match escape {
                        '"' => current.push('"'),
                        '\\' => current.push('\\'),
                        '/' => current.push('/'),
                        'n' => current.push('\n'),
                        't' => current.push('\t'),
                        'r' => current.push('\r'),
                        'b' => current.push('\u{8}'),
                        'f' => current.push('\u{c}'),
                        'u' => current.push(self.unicode_escape()?),
                        '(' => {
                            if !current.is_empty() {
                                parts.push(StrPart::Lit(std::mem::take(&mut current)));
                            }
                            parts.push(StrPart::Interp(self.interpolation()?));
                        }
                        other => return Err(format!("invalid escape '\\{other}'")),
                    }
                }
                c => current.push(c),
            }
        }
        if !current.is_empty() || parts.is_empty() {
            parts.push(StrPart::Lit(current));
        }
        Ok(parts)
    }

    fn hex4(&mut self) -> Result<u32, String> {
        let mut code = 0;
        for _ in 0..4 {
            let digit = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| "invalid \\u escape".to_string())?;
            code = code * 16 + digit;
        }
        Ok(code)
    }

    fn unicode_escape(&mut self) -> Result<char, String> {
        let high = self.hex4()?;
        if (0xD800..0xDC00).contains(&high)
            && self.peek() == Some('\\')
            && self.peek_at(1) == Some('u')
        {
            self.pos += 2;
            let low = self.hex4()?;
            let combined = 0x10000 + ((high - 0xD800) << 10) + (low.wrapping_sub(0xDC00) & 0x3FF);
            return Ok(char::from_u32(combined).unwrap_or('\u{FFFD}'));
        }
        Ok(char::from_u32(high).unwrap_or('\u{FFFD}'))
    }

    fn interpolation(&mut self) -> Result<Vec<Token>, String> {
        let mut depth = 0usize;
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            match token {
                Token::Eof => return Err("unterminated string interpolation".into()),
                Token::LParen => depth += 1,
                Token::RParen if depth == 0 => break,
                Token::RParen => depth -= 1,
                _ => {}
            }
            tokens.push(token);
        }
        tokens.push(Token::Eof);
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_and_operators() {
        let tokens = tokenize(".Tags[] | .Key // \"none\"").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Field("Tags".into()),
                Token::LBracket,
                Token::RBracket,
                Token::Pipe,
                Token::Field("Key".into()),
                Token::Alt,
                Token::Str(vec![StrPart::Lit("none".into())]),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_interpolation_tokens() {
        let tokens = tokenize(r#""arn:\(.Region):\(.Id)""#).unwrap();
        let Token::Str(parts) = &tokens[0] else {
            panic!("expected string token");
        };
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], StrPart::Lit("arn:".into()));
        assert_eq!(
            parts[1],
            StrPart::Interp(vec![Token::Field("Region".into()), Token::Eof])
        );
    }

    #[test]
    fn test_numbers_and_comments() {
        let tokens = tokenize("1.5e3 # trailing\n- 2").unwrap();
        assert_eq!(
            tokens,
            vec![Token::Num(1500.0), Token::Minus, Token::Num(2.0), Token::Eof]
        );
    }

    #[test]
    fn test_unterminated_string() {
        assert!(tokenize("\"abc").is_err());
    }
}
