use crate::atn::config_set::AtnConfigSet;
use crate::support::BitSet;
use crate::token::CommonToken;

/// Error wrapping all the possible kind of errors encountered during recognition.
///
/// The possible errors can be:
/// * `Io` - containing an `std::io::Error`, this kind of error can arise when
/// reading a serialized automaton or an input file from disk fails.
/// * `Deserialize` - An error arising while reading a serialized automaton.
/// * `LexerNoViableAlt` - No lexer rule matched at the current character.
/// * `NoViableAlt` - No alternative of a parser decision matched the lookahead.
/// * `InputMismatch` - The current token is not in the expected set.
/// * `FailedPredicate` - A semantic or precedence predicate evaluated to false
/// at a point where the surviving alternative required it.
///
/// Violations of internal invariants (popping an empty mode stack, mutating a
/// frozen configuration set) are bugs, not recoverable conditions, and panic
/// instead of surfacing here.
#[derive(Debug)]
pub enum RecognitionError {
    Io(std::io::Error),
    Deserialize {
        message: String,
    },
    LexerNoViableAlt {
        start_index: usize,
        line: u32,
        column: u32,
        text: String,
    },
    NoViableAlt {
        offending: CommonToken,
        decision: usize,
    },
    InputMismatch {
        offending: CommonToken,
        expected: String,
    },
    FailedPredicate {
        offending: CommonToken,
        rule_index: usize,
        pred_index: usize,
    },
}

impl RecognitionError {
    /// Returns the source position the error should be reported at.
    pub fn position(&self) -> Option<(u32, u32)> {
        match self {
            RecognitionError::Io(_) | RecognitionError::Deserialize { .. } => None,
            RecognitionError::LexerNoViableAlt { line, column, .. } => Some((*line, *column)),
            RecognitionError::NoViableAlt { offending, .. }
            | RecognitionError::InputMismatch { offending, .. }
            | RecognitionError::FailedPredicate { offending, .. } => {
                Some((offending.line, offending.column))
            }
        }
    }

    /// Returns the token the recognizer choked on, when there is one.
    pub fn offending_token(&self) -> Option<&CommonToken> {
        match self {
            RecognitionError::NoViableAlt { offending, .. }
            | RecognitionError::InputMismatch { offending, .. }
            | RecognitionError::FailedPredicate { offending, .. } => Some(offending),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RecognitionError {
    fn from(e: std::io::Error) -> Self {
        RecognitionError::Io(e)
    }
}

impl std::error::Error for RecognitionError {}

impl std::fmt::Display for RecognitionError {
    fn fmt(&self, buffer: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RecognitionError::Io(e) => write!(buffer, "IOError: {}", e),
            RecognitionError::Deserialize { message } => {
                write!(buffer, "DeserializeError: {}", message)
            }
            RecognitionError::LexerNoViableAlt { text, .. } => {
                write!(buffer, "token recognition error at: '{}'", text)
            }
            RecognitionError::NoViableAlt { offending, .. } => {
                write!(buffer, "no viable alternative at input '{}'", offending.text)
            }
            RecognitionError::InputMismatch {
                offending,
                expected,
            } => write!(
                buffer,
                "mismatched input '{}' expecting {}",
                offending.text, expected
            ),
            RecognitionError::FailedPredicate {
                rule_index,
                pred_index,
                ..
            } => write!(
                buffer,
                "rule {} failed predicate {}",
                rule_index, pred_index
            ),
        }
    }
}

/// Receiver for recognition events: syntax errors and prediction reports.
///
/// The default methods ignore the prediction reports, so listeners interested
/// only in syntax errors implement a single method.
pub trait ErrorListener {
    /// A recoverable syntax error at `line`:`column` (column is 0-based).
    fn syntax_error(&mut self, offending: Option<&CommonToken>, line: u32, column: u32, msg: &str);

    /// The prediction for a decision found a true ambiguity between `ambig_alts`.
    fn report_ambiguity(
        &mut self,
        _decision: usize,
        _start_index: usize,
        _stop_index: usize,
        _exact: bool,
        _ambig_alts: &BitSet,
        _configs: &AtnConfigSet,
    ) {
    }

    /// A decision could not be resolved with context-free lookahead and the
    /// simulation is retrying with the full parser stack.
    fn report_attempting_full_context(
        &mut self,
        _decision: usize,
        _start_index: usize,
        _stop_index: usize,
        _conflicting_alts: &BitSet,
        _configs: &AtnConfigSet,
    ) {
    }

    /// The full-context retry produced a unique alternative: the decision is
    /// context sensitive, not ambiguous.
    fn report_context_sensitivity(
        &mut self,
        _decision: usize,
        _start_index: usize,
        _stop_index: usize,
        _prediction: u32,
        _configs: &AtnConfigSet,
    ) {
    }
}

/// Listener printing one line per syntax error to standard error.
pub struct ConsoleErrorListener;

impl ErrorListener for ConsoleErrorListener {
    fn syntax_error(&mut self, _: Option<&CommonToken>, line: u32, column: u32, msg: &str) {
        eprintln!("line {}:{} {}", line, column, msg);
    }
}
