use crate::error::{EvalError, EvalResult};
use crate::heap::Heap;
use crate::symbol::{sym, SymbolTable};
use crate::value::{SymbolId, Value};

/// Nesting deeper than this is rejected rather than risking the native stack.
const MAX_DEPTH: usize = 1_000;

/// Parses source text into values.
pub struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
    heap: &'a mut Heap,
    symbols: &'a mut SymbolTable,
}

impl<'a> Reader<'a> {
    pub fn new(input: &'a str, heap: &'a mut Heap, symbols: &'a mut SymbolTable) -> Self {
        Reader {
            input: input.as_bytes(),
            pos: 0,
            depth: 0,
            heap,
            symbols,
        }
    }

    /// Read one expression. Returns None at EOF.
    pub fn read(&mut self) -> EvalResult<Option<Value>> {
        self.skip_whitespace_and_comments();
        if self.pos >= self.input.len() {
            return Ok(None);
        }
        self.read_expr().map(Some)
    }

    /// Return current position in input.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_all(&mut self) -> EvalResult<Vec<Value>> {
        let mut results = Vec::new();
        while let Some(val) = self.read()? {
            results.push(val);
        }
        Ok(results)
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while matches!(self.peek(), Some(ch) if ch.is_ascii_whitespace()) {
                self.pos += 1;
            }
            if self.peek() == Some(b';') {
                while matches!(self.peek(), Some(ch) if ch != b'\n') {
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    fn read_expr(&mut self) -> EvalResult<Value> {
        self.skip_whitespace_and_comments();
        let ch = self.peek().ok_or_else(|| read_error("unexpected EOF"))?;

        if self.depth >= MAX_DEPTH {
            return Err(read_error("nesting too deep"));
        }
        self.depth += 1;
        let result = match ch {
            b'(' => self.read_list(),
            b')' => Err(read_error("unexpected ')'")),
            b'\'' => self.read_prefixed(1, sym::QUOTE),
            b'`' => self.read_prefixed(1, sym::QUASIQUOTE),
            b',' if self.input.get(self.pos + 1) == Some(&b'@') => {
                self.read_prefixed(2, sym::UNQUOTE_SPLICING)
            }
            b',' => self.read_prefixed(1, sym::UNQUOTE),
            b'"' => self.read_string(),
            _ => self.read_word(),
        };
        self.depth -= 1;
        result
    }

    /// Read a list: (a b c) or (a . b) or (a b . c)
    fn read_list(&mut self) -> EvalResult<Value> {
        self.advance(); // consume '('
        let mut elements = Vec::new();
        let mut tail = Value::Nil;

        loop {
            self.skip_whitespace_and_comments();
            match self.peek() {
                None => return Err(read_error("unterminated list")),
                Some(b')') => {
                    self.advance();
                    break;
                }
                Some(b'.') if self.is_dot_separator() => {
                    if elements.is_empty() {
                        return Err(read_error("dot with no preceding element"));
                    }
                    self.advance();
                    tail = self.read_expr()?;
                    self.skip_whitespace_and_comments();
                    if self.advance() != Some(b')') {
                        return Err(read_error("expected ')' after dotted tail"));
                    }
                    break;
                }
                Some(_) => elements.push(self.read_expr()?),
            }
        }

        let mut result = tail;
        for val in elements.into_iter().rev() {
            result = self.heap.cons(val, result)?;
        }
        Ok(result)
    }

    /// A '.' followed by whitespace, ')' or EOF separates a dotted tail.
    fn is_dot_separator(&self) -> bool {
        match self.input.get(self.pos + 1) {
            None => true,
            Some(&next) => next.is_ascii_whitespace() || next == b')',
        }
    }

    /// 'x, `x, ,x and ,@x: consume `len` prefix bytes, wrap the next
    /// expression as `(tag expr)`.
    fn read_prefixed(&mut self, len: usize, tag: SymbolId) -> EvalResult<Value> {
        self.pos += len;
        let expr = self.read_expr()?;
        let inner = self.heap.cons(expr, Value::Nil)?;
        self.heap.cons(Value::Symbol(tag), inner)
    }

    fn read_string(&mut self) -> EvalResult<Value> {
        self.advance(); // consume '"'
        let mut bytes = Vec::new();
        loop {
            let ch = self
                .advance()
                .ok_or_else(|| read_error("unterminated string"))?;
            match ch {
                b'"' => break,
                b'\\' => {
                    let esc = self
                        .advance()
                        .ok_or_else(|| read_error("unterminated escape"))?;
                    bytes.push(match esc {
                        b'n' => b'\n',
                        b't' => b'\t',
                        b'r' => b'\r',
                        other => other,
                    });
                }
                c => bytes.push(c),
            }
        }
        let s = String::from_utf8(bytes).map_err(|_| read_error("invalid UTF-8 in string"))?;
        Ok(self.heap.alloc_string(s))
    }

    /// Read a word: `#t`, an integer, a float or a symbol.
    fn read_word(&mut self) -> EvalResult<Value> {
        let start = self.pos;
        while matches!(self.peek(), Some(ch) if !is_delimiter(ch)) {
            self.pos += 1;
        }
        let word = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| read_error("invalid UTF-8"))?;

        if word.is_empty() {
            return Err(read_error("empty word"));
        }
        if word == "#t" {
            return Ok(Value::True);
        }
        if let Some(num) = parse_number(word) {
            return Ok(num);
        }
        Ok(Value::Symbol(self.symbols.intern(word)))
    }
}

fn is_delimiter(ch: u8) -> bool {
    ch.is_ascii_whitespace() || matches!(ch, b'(' | b')' | b'\'' | b'`' | b',' | b'"' | b';')
}

/// Integers first, then floats. A float needs at least one digit so that
/// words like `inf` and `nan` stay symbols.
fn parse_number(word: &str) -> Option<Value> {
    if let Ok(n) = word.parse::<i64>() {
        return Some(Value::Int(n));
    }
    if !word.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    if word.bytes().any(|b| b.is_ascii_alphabetic() && b != b'e' && b != b'E') {
        return None;
    }
    word.parse::<f64>().ok().map(Value::Float)
}

fn read_error(msg: &str) -> EvalError {
    EvalError::Read(msg.into())
}

/// Read a single expression from a string.
pub fn read_str(input: &str, heap: &mut Heap, symbols: &mut SymbolTable) -> EvalResult<Value> {
    let mut reader = Reader::new(input, heap, symbols);
    reader.read()?.ok_or_else(|| read_error("empty input"))
}

/// Read all expressions from a string.
pub fn read_all(input: &str, heap: &mut Heap, symbols: &mut SymbolTable) -> EvalResult<Vec<Value>> {
    Reader::new(input, heap, symbols).read_all()
}

/// Read one expression starting at byte offset `pos`.
/// Returns `Ok(Some((value, new_pos)))` or `Ok(None)` if only whitespace/comments remain.
pub fn read_one_at(
    input: &str,
    pos: usize,
    heap: &mut Heap,
    symbols: &mut SymbolTable,
) -> EvalResult<Option<(Value, usize)>> {
    let rest = input
        .get(pos..)
        .ok_or_else(|| read_error("position out of range"))?;
    let mut reader = Reader::new(rest, heap, symbols);
    Ok(reader.read()?.map(|val| (val, pos + reader.position())))
}
