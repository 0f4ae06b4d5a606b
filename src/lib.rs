#![allow(clippy::type_complexity)]
/// Module containing the ATN graph, its configurations and predicates.
pub mod atn;
/// Module providing the shared prediction-context graph and its merges.
pub mod context;
/// Module holding the per-decision DFA caches.
pub mod dfa;
/// Module containing the errors and listeners used during recognition.
pub mod error;
/// Module providing integer interval sets for token and character sets.
pub mod interval;
/// Module driving lexical recognition over an ATN.
pub mod lexer;
/// Contains some crate-level macros.
pub(crate) mod macros;
/// Runtime/tool version agreement checks.
pub mod meta;
/// Module driving syntactic recognition with adaptive prediction.
pub mod parser;
/// Module providing character and token stream implementations.
pub mod stream;
/// Small collection utilities shared by the simulators.
pub mod support;
/// Module defining tokens, factories and vocabularies.
pub mod token;
