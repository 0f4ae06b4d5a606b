use super::IntStream;
use crate::token::{CommonToken, EOF};

/// Producer of tokens, one call per token. Lexers implement this.
///
/// The source is infallible: recognition problems are reported to the
/// source's own error listeners and the source resynchronizes internally,
/// eventually producing an EOF token that it repeats forever.
pub trait TokenSource {
    fn next_token(&mut self) -> CommonToken;
    fn source_name(&self) -> &str;
}

/// An [IntStream] of tokens where `la(k)` is the token type `k` ahead.
pub trait TokenStream: IntStream {
    /// Returns the token `k` positions ahead (`k > 0`, on-channel for
    /// filtering streams) or behind (`k < 0`). `lt(1)` is the current token.
    ///
    /// Returns None only for backward lookups that fall off the start of
    /// the stream; forward lookups always land on the EOF token at worst.
    fn lt(&mut self, k: isize) -> Option<&CommonToken>;

    /// Returns the token at the absolute index `i`.
    fn get(&self, i: usize) -> &CommonToken;
}

/// A buffered [TokenStream] that fetches lazily and filters on one channel.
///
/// All tokens are kept and remain addressable by absolute index through
/// [TokenStream::get]; `lt`, `la` and `consume` only see tokens on the
/// stream's channel. The EOF token is always visible.
pub struct CommonTokenStream<S: TokenSource> {
    source: S,
    tokens: Vec<CommonToken>,
    /// Index into `tokens` of the current token.
    index: usize,
    fetched_eof: bool,
    channel: usize,
}

impl<S: TokenSource> CommonTokenStream<S> {
    /// Builds a stream over `source` filtering on the default channel.
    pub fn new(source: S) -> CommonTokenStream<S> {
        CommonTokenStream::with_channel(source, crate::token::DEFAULT_CHANNEL)
    }

    pub fn with_channel(source: S, channel: usize) -> CommonTokenStream<S> {
        let mut stream = CommonTokenStream {
            source,
            tokens: Vec::new(),
            index: 0,
            fetched_eof: false,
            channel,
        };
        stream.sync(0);
        stream.index = stream.next_on_channel(0);
        stream
    }

    /// Buffers every remaining token.
    pub fn fill(&mut self) {
        while !self.fetched_eof {
            self.fetch(64);
        }
    }

    /// All buffered tokens, off-channel ones included.
    pub fn tokens(&self) -> &[CommonToken] {
        &self.tokens
    }

    /// Ensures `tokens[i]` exists, unless the source ran out first.
    fn sync(&mut self, i: usize) {
        while self.tokens.len() <= i && !self.fetched_eof {
            self.fetch(1);
        }
    }

    fn fetch(&mut self, n: usize) {
        for _ in 0..n {
            if self.fetched_eof {
                return;
            }
            let mut token = self.source.next_token();
            token.index = Some(self.tokens.len());
            if token.is_eof() {
                self.fetched_eof = true;
            }
            self.tokens.push(token);
        }
    }

    /// Smallest index `>= i` holding an on-channel token or the EOF token.
    fn next_on_channel(&mut self, mut i: usize) -> usize {
        self.sync(i);
        loop {
            if i >= self.tokens.len() {
                // source is exhausted, park on the EOF token
                return self.tokens.len().saturating_sub(1);
            }
            let token = &self.tokens[i];
            if token.is_eof() || token.channel == self.channel {
                return i;
            }
            i += 1;
            self.sync(i);
        }
    }

    /// Largest index `<= i` holding an on-channel token, if any.
    fn previous_on_channel(&self, mut i: usize) -> Option<usize> {
        loop {
            let token = &self.tokens[i];
            if token.is_eof() || token.channel == self.channel {
                return Some(i);
            }
            if i == 0 {
                return None;
            }
            i -= 1;
        }
    }

    fn lb(&mut self, k: usize) -> Option<&CommonToken> {
        let mut i = self.index;
        for _ in 0..k {
            i = self.previous_on_channel(i.checked_sub(1)?)?;
        }
        Some(&self.tokens[i])
    }
}

impl<S: TokenSource> IntStream for CommonTokenStream<S> {
    fn consume(&mut self) {
        if self.la(1) == EOF {
            panic!("cannot consume EOF");
        }
        self.index = self.next_on_channel(self.index + 1);
    }

    fn la(&mut self, k: isize) -> i32 {
        self.lt(k).map(|t| t.token_type).unwrap_or(EOF)
    }

    fn mark(&mut self) -> isize {
        -1
    }

    fn release(&mut self, _marker: isize) {}

    fn index(&self) -> usize {
        self.index
    }

    fn seek(&mut self, index: usize) {
        self.sync(index);
        let index = index.min(self.tokens.len().saturating_sub(1));
        self.index = self.next_on_channel(index);
    }

    fn size(&self) -> usize {
        self.tokens.len()
    }

    fn source_name(&self) -> &str {
        self.source.source_name()
    }
}

impl<S: TokenSource> TokenStream for CommonTokenStream<S> {
    fn lt(&mut self, k: isize) -> Option<&CommonToken> {
        if k == 0 {
            panic!("LT(0) is undefined");
        }
        if k < 0 {
            return self.lb((-k) as usize);
        }
        let mut i = self.index;
        for _ in 1..k {
            self.sync(i + 1);
            i = self.next_on_channel(i + 1);
        }
        let i = self.next_on_channel(i);
        Some(&self.tokens[i])
    }

    fn get(&self, i: usize) -> &CommonToken {
        &self.tokens[i]
    }
}

/// A [TokenStream] keeping only a sliding window of tokens.
///
/// Tokens before the window are discarded as soon as no marker pins them,
/// so arbitrarily long inputs parse in constant memory as long as the
/// recognizer marks only around decisions. The stream performs no channel
/// filtering and cannot report a size.
pub struct UnbufferedTokenStream<S: TokenSource> {
    source: S,
    /// The window. `window[p]` is the current token.
    window: Vec<CommonToken>,
    p: usize,
    /// Open markers; while nonzero the window only grows.
    num_markers: usize,
    /// Absolute index of the current token.
    current_index: usize,
    /// Copy of the last consumed token, for `lt(-1)`.
    last_consumed: Option<CommonToken>,
}

impl<S: TokenSource> UnbufferedTokenStream<S> {
    pub fn new(source: S) -> UnbufferedTokenStream<S> {
        let mut stream = UnbufferedTokenStream {
            source,
            window: Vec::new(),
            p: 0,
            num_markers: 0,
            current_index: 0,
            last_consumed: None,
        };
        stream.fill(1);
        stream
    }

    /// Absolute index of `window[0]`.
    fn buffer_start_index(&self) -> usize {
        self.current_index - self.p
    }

    /// Ensures the window holds the token `need` ahead of the current one.
    fn sync_ahead(&mut self, need: usize) {
        let have = self.window.len() - self.p;
        if need > have {
            self.fill(need - have);
        }
    }

    /// Appends up to `n` tokens to the window, stopping after EOF.
    fn fill(&mut self, n: usize) {
        for _ in 0..n {
            if let Some(last) = self.window.last() {
                if last.is_eof() {
                    return;
                }
            }
            let mut token = self.source.next_token();
            token.index = Some(self.buffer_start_index() + self.window.len());
            self.window.push(token);
        }
    }
}

impl<S: TokenSource> IntStream for UnbufferedTokenStream<S> {
    fn consume(&mut self) {
        if self.la(1) == EOF {
            panic!("cannot consume EOF");
        }
        self.last_consumed = Some(self.window[self.p].clone());
        if self.p == self.window.len() - 1 && self.num_markers == 0 {
            // no marker pins the window, restart it
            self.window.clear();
            self.p = 0;
            self.current_index += 1;
            self.fill(1);
            return;
        }
        self.p += 1;
        self.current_index += 1;
        self.sync_ahead(1);
    }

    fn la(&mut self, k: isize) -> i32 {
        self.lt(k).map(|t| t.token_type).unwrap_or(EOF)
    }

    fn mark(&mut self) -> isize {
        self.num_markers += 1;
        -(self.num_markers as isize)
    }

    fn release(&mut self, marker: isize) {
        let expected = -(self.num_markers as isize);
        if marker != expected {
            panic!("release() called with an invalid marker");
        }
        self.num_markers -= 1;
        if self.num_markers == 0 && self.p > 0 {
            // trim tokens released by the last marker
            self.window.drain(..self.p);
            self.p = 0;
        }
    }

    fn index(&self) -> usize {
        self.current_index
    }

    fn seek(&mut self, index: usize) {
        if index == self.current_index {
            return;
        }
        let index = if index > self.current_index {
            self.sync_ahead(index - self.current_index);
            // seeking past the buffered window clamps to the last token
            index.min(self.buffer_start_index() + self.window.len() - 1)
        } else {
            index
        };
        if index < self.buffer_start_index() {
            panic!("cannot seek to index {} before the token window", index);
        }
        self.p = index - self.buffer_start_index();
        self.current_index = index;
        if self.p > 0 {
            self.last_consumed = Some(self.window[self.p - 1].clone());
        }
    }

    fn size(&self) -> usize {
        panic!("unbuffered stream cannot know its size");
    }

    fn source_name(&self) -> &str {
        self.source.source_name()
    }
}

impl<S: TokenSource> TokenStream for UnbufferedTokenStream<S> {
    fn lt(&mut self, k: isize) -> Option<&CommonToken> {
        if k == 0 {
            panic!("LT(0) is undefined");
        }
        if k == -1 {
            return self.last_consumed.as_ref();
        }
        if k < -1 {
            panic!("unbuffered stream only remembers the last consumed token");
        }
        self.sync_ahead(k as usize);
        let i = (self.p + k as usize - 1).min(self.window.len() - 1);
        Some(&self.window[i])
    }

    fn get(&self, i: usize) -> &CommonToken {
        let start = self.buffer_start_index();
        if i < start || i >= start + self.window.len() {
            panic!("token {} is outside the retained window", i);
        }
        &self.window[i - start]
    }
}
