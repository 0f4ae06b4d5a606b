/// Token type of every end-of-file token.
pub const EOF: i32 = -1;
/// Token type reserved for tokens that never matched a rule.
pub const INVALID_TYPE: i32 = 0;
/// Non-consuming pseudo symbol used in lookahead sets for "rule can end here".
pub const EPSILON: i32 = -2;
/// Smallest token type the offline tool assigns to user rules.
pub const MIN_USER_TOKEN_TYPE: i32 = 1;

/// Channel every token is emitted on unless a lexer action reroutes it.
pub const DEFAULT_CHANNEL: usize = 0;
/// Conventional channel for whitespace and comments kept out of the parser.
pub const HIDDEN_CHANNEL: usize = 1;

/// A single token produced by a lexer.
///
/// `start`/`stop` are inclusive character offsets into the source stream,
/// `line` is 1-based and `column` is the 0-based character position in the
/// line. `index` is the position in the token stream, assigned by the stream
/// when the token is buffered, not by the lexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonToken {
    pub token_type: i32,
    pub channel: usize,
    pub start: usize,
    pub stop: usize,
    pub index: Option<usize>,
    pub line: u32,
    pub column: u32,
    pub text: String,
}

impl CommonToken {
    pub fn is_eof(&self) -> bool {
        self.token_type == EOF
    }
}

impl std::fmt::Display for CommonToken {
    /// Prints the token as `[@index,start:stop='text',<type>,line:column]`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.index.map(|i| i as isize).unwrap_or(-1);
        let text = self.text.replace('\n', "\\n").replace('\t', "\\t");
        write!(
            f,
            "[@{},{}:{}='{}',<{}>,{}:{}]",
            index, self.start, self.stop, text, self.token_type, self.line, self.column
        )
    }
}

/// Builds tokens on behalf of a lexer.
///
/// The default factory produces [CommonToken]; hosts that need richer tokens
/// substitute their own factory on the lexer.
pub trait TokenFactory {
    #[allow(clippy::too_many_arguments)]
    fn create(
        &self,
        token_type: i32,
        text: String,
        channel: usize,
        start: usize,
        stop: usize,
        line: u32,
        column: u32,
    ) -> CommonToken;
}

/// The default [TokenFactory].
#[derive(Debug, Default, Clone, Copy)]
pub struct CommonTokenFactory;

impl TokenFactory for CommonTokenFactory {
    fn create(
        &self,
        token_type: i32,
        text: String,
        channel: usize,
        start: usize,
        stop: usize,
        line: u32,
        column: u32,
    ) -> CommonToken {
        CommonToken {
            token_type,
            channel,
            start,
            stop,
            index: None,
            line,
            column,
            text,
        }
    }
}

/// Maps token types to their literal and symbolic names.
///
/// The display name of a type is the literal name (`'+'`) when the token has
/// one, otherwise the symbolic name (`PLUS`), otherwise the numeric type.
/// Used by error messages and by the CLI token dump.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    literal_names: Vec<Option<String>>,
    symbolic_names: Vec<Option<String>>,
}

impl Vocabulary {
    pub fn new(
        literal_names: Vec<Option<String>>,
        symbolic_names: Vec<Option<String>>,
    ) -> Vocabulary {
        Vocabulary {
            literal_names,
            symbolic_names,
        }
    }

    /// Builds a vocabulary with symbolic names only, in token type order
    /// starting at [MIN_USER_TOKEN_TYPE].
    pub fn from_symbolic(names: &[&str]) -> Vocabulary {
        let mut symbolic = vec![None];
        symbolic.extend(names.iter().map(|n| Some(n.to_string())));
        Vocabulary {
            literal_names: Vec::new(),
            symbolic_names: symbolic,
        }
    }

    pub fn literal_name(&self, token_type: i32) -> Option<&str> {
        if token_type < 0 {
            return None;
        }
        self.literal_names
            .get(token_type as usize)
            .and_then(|n| n.as_deref())
    }

    pub fn symbolic_name(&self, token_type: i32) -> Option<&str> {
        if token_type == EOF {
            return Some("EOF");
        }
        self.symbolic_names
            .get(token_type as usize)
            .and_then(|n| n.as_deref())
    }

    pub fn display_name(&self, token_type: i32) -> String {
        self.literal_name(token_type)
            .or_else(|| self.symbolic_name(token_type))
            .map(|n| n.to_string())
            .unwrap_or_else(|| token_type.to_string())
    }
}
