use qs_core::{QueueScriptError, SourceRef};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub text: String,
    pub quoted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RawStatement {
    Tokens { tokens: Vec<Token>, line: usize },
    OpenBrace { line: usize },
    CloseBrace { line: usize },
}

struct Splitter<'a> {
    script: &'a str,
    chars: Vec<char>,
    index: usize,
    line: usize,
    token: String,
    token_active: bool,
    token_quoted: bool,
    tokens: Vec<Token>,
    statement_line: usize,
    out: Vec<RawStatement>,
}

impl<'a> Splitter<'a> {
    fn new(script: &'a str, source: &str) -> Self {
        Self {
            script,
            chars: source.chars().collect(),
            index: 0,
            line: 1,
            token: String::new(),
            token_active: false,
            token_quoted: false,
            tokens: Vec::new(),
            statement_line: 1,
            out: Vec::new(),
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.index + offset).copied()
    }

    fn begin_token(&mut self) {
        if !self.token_active {
            self.token_active = true;
            if self.tokens.is_empty() {
                self.statement_line = self.line;
            }
        }
    }

    fn end_token(&mut self) {
        if self.token_active {
            self.tokens.push(Token {
                text: std::mem::take(&mut self.token),
                quoted: self.token_quoted,
            });
            self.token_active = false;
            self.token_quoted = false;
        }
    }

    fn end_statement(&mut self) {
        self.end_token();
        if !self.tokens.is_empty() {
            self.out.push(RawStatement::Tokens {
                tokens: std::mem::take(&mut self.tokens),
                line: self.statement_line,
            });
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(ch) = self.peek(0) {
            if ch == '\n' {
                break;
            }
            self.index += 1;
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), QueueScriptError> {
        let start_line = self.line;
        self.index += 2;
        while self.index < self.chars.len() {
            if self.peek(0) == Some('*') && self.peek(1) == Some('/') {
                self.index += 2;
                return Ok(());
            }
            if self.peek(0) == Some('\n') {
                self.line += 1;
            }
            self.index += 1;
        }
        Err(QueueScriptError::with_origin(
            "PARSE_UNTERMINATED_COMMENT",
            "Block comment is never closed.",
            SourceRef::new(self.script, start_line),
        ))
    }

    fn run(mut self) -> Result<Vec<RawStatement>, QueueScriptError> {
        let mut quote: Option<char> = None;
        while self.index < self.chars.len() {
            let ch = self.chars[self.index];

            if let Some(active) = quote {
                if ch == active {
                    quote = None;
                } else {
                    if ch == '\n' {
                        self.line += 1;
                    }
                    self.token.push(ch);
                }
                self.index += 1;
                continue;
            }

            match ch {
                '\'' | '"' => {
                    self.begin_token();
                    self.token_quoted = true;
                    quote = Some(ch);
                    self.index += 1;
                }
                '/' if self.peek(1) == Some('/') => {
                    self.end_token();
                    self.skip_line_comment();
                }
                '/' if self.peek(1) == Some('*') => {
                    self.end_token();
                    self.skip_block_comment()?;
                }
                ';' => {
                    self.end_statement();
                    self.index += 1;
                }
                '\n' => {
                    self.end_statement();
                    self.line += 1;
                    self.index += 1;
                }
                '{' => {
                    self.end_statement();
                    self.out.push(RawStatement::OpenBrace { line: self.line });
                    self.index += 1;
                }
                '}' => {
                    self.end_statement();
                    self.out.push(RawStatement::CloseBrace { line: self.line });
                    self.index += 1;
                }
                _ if ch.is_whitespace() => {
                    self.end_token();
                    self.index += 1;
                }
                _ => {
                    self.begin_token();
                    self.token.push(ch);
                    self.index += 1;
                }
            }
        }

        if quote.is_some() {
            return Err(QueueScriptError::with_origin(
                "PARSE_UNTERMINATED_QUOTE",
                "Quoted argument is never closed.",
                SourceRef::new(self.script, self.line),
            ));
        }

        self.end_statement();
        Ok(self.out)
    }
}

pub(crate) fn split_statements(
    script: &str,
    source: &str,
) -> Result<Vec<RawStatement>, QueueScriptError> {
    Splitter::new(script, source).run()
}
