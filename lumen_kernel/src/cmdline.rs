//! Kernel command line tokenizer

/// One word of the kernel command line.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum Token<'a> {
    /// A bare word such as `nosmp`.
    Flag(&'a str),
    /// `key=value`, the value may be empty.
    Option { key: &'a str, value: &'a str },
}

impl<'a> Token<'a> {
    pub fn key(&self) -> &'a str {
        match *self {
            Token::Flag(key) => key,
            Token::Option { key, .. } => key,
        }
    }
}

/// Zero-copy iterator over the tokens of a command line.
///
/// Words are separated by whitespace. A symbol in double quotes may contain
/// whitespace and `=`; an unterminated quote extends to the end of the line.
/// Only the first `=` of a word separates key and value.
#[derive(Debug, Clone)]
pub struct CmdLine<'a> {
    rest: &'a str,
}

impl<'a> CmdLine<'a> {
    pub fn new(line: &'a str) -> CmdLine<'a> {
        CmdLine { rest: line }
    }
}

/// Split the next symbol off the front of `rest`.
fn take_symbol<'a>(rest: &mut &'a str, stop_at_equals: bool) -> Option<&'a str> {
    if let Some(quoted) = rest.strip_prefix('"') {
        let (symbol, tail) = quoted.split_once('"').unwrap_or((quoted, ""));
        *rest = tail;
        return Some(symbol);
    }
    if rest.is_empty() {
        return None;
    }
    let end = rest
        .find(|c: char| c.is_whitespace() || (stop_at_equals && c == '='))
        .unwrap_or(rest.len());
    let (symbol, tail) = rest.split_at(end);
    *rest = tail;
    Some(symbol)
}

impl<'a> Iterator for CmdLine<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        self.rest = self.rest.trim_start();
        let key = take_symbol(&mut self.rest, true)?;
        match self.rest.strip_prefix('=') {
            Some(tail) => {
                self.rest = tail;
                let value = take_symbol(&mut self.rest, false).unwrap_or("");
                Some(Token::Option { key, value })
            }
            None => Some(Token::Flag(key)),
        }
    }
}

impl<'a> core::iter::FusedIterator for CmdLine<'a> {}
