use std::sync::Arc;
use tarpan::atn::deserializer::{
    AtnDeserializer, ACTION_SKIP, EDGE_ACTION, EDGE_ATOM, EDGE_EPSILON, EDGE_RANGE,
    SERIALIZED_UUID, SERIALIZED_VERSION, STATE_BASIC, STATE_BLOCK_END, STATE_BLOCK_START,
    STATE_LOOP_END, STATE_PLUS_LOOP_BACK, STATE_RULE_START, STATE_RULE_STOP, STATE_TOKEN_START,
};
use tarpan::lexer::Lexer;
use tarpan::parser::{ParseTree, Parser};
use tarpan::stream::{CommonTokenStream, InputStream, TokenSource};
use tarpan::token::EOF;

/// Word-stream writer mirroring the serialized automaton layout.
struct Blob {
    bytes: Vec<u8>,
}

impl Blob {
    fn new() -> Blob {
        let mut blob = Blob { bytes: Vec::new() };
        blob.word(SERIALIZED_VERSION);
        blob.bytes.extend_from_slice(&SERIALIZED_UUID);
        blob
    }

    fn word(&mut self, w: u32) -> &mut Blob {
        self.bytes.extend(w.to_le_bytes());
        self
    }

    fn signed(&mut self, w: i32) -> &mut Blob {
        self.word(w as u32)
    }

    fn state(&mut self, kind: u32, rule: usize) -> &mut Blob {
        self.word(kind).word(rule as u32)
    }

    fn edge(&mut self, src: usize, trg: usize, kind: u32, a1: u32, a2: u32, a3: u32) -> &mut Blob {
        self.word(src as u32)
            .word(trg as u32)
            .word(kind)
            .word(a1)
            .word(a2)
            .word(a3)
    }
}

/// `ID : [a-z]+ ; NUM : [0-9]+ ; WS : ' ' -> skip ;` with ID=1, NUM=2, WS=3.
fn lexer_blob() -> Vec<u8> {
    let mut b = Blob::new();
    b.word(0); // lexer grammar
    b.word(3); // max token type
    b.word(18); // states
    b.state(STATE_RULE_START, 0); // 0
    b.state(STATE_RULE_STOP, 0); // 1
    b.state(STATE_RULE_START, 1); // 2
    b.state(STATE_RULE_STOP, 1); // 3
    b.state(STATE_RULE_START, 2); // 4
    b.state(STATE_RULE_STOP, 2); // 5
    b.state(STATE_TOKEN_START, 0); // 6
    b.state(STATE_BASIC, 0); // 7
    b.state(STATE_BASIC, 0); // 8
    b.state(STATE_PLUS_LOOP_BACK, 0); // 9
    b.state(STATE_LOOP_END, 0).word(9); // 10
    b.state(STATE_BASIC, 1); // 11
    b.state(STATE_BASIC, 1); // 12
    b.state(STATE_PLUS_LOOP_BACK, 1); // 13
    b.state(STATE_LOOP_END, 1).word(13); // 14
    b.state(STATE_BASIC, 2); // 15
    b.state(STATE_BASIC, 2); // 16
    b.state(STATE_BASIC, 2); // 17
    b.word(0); // non-greedy states
    b.word(3); // rules: start, stop, token type, bypass, left-recursive
    b.word(0).word(1).signed(1).signed(0).word(0);
    b.word(2).word(3).signed(2).signed(0).word(0);
    b.word(4).word(5).signed(3).signed(0).word(0);
    b.word(1); // modes
    b.word(6);
    b.word(0); // sets
    b.word(19); // edges
    b.edge(6, 0, EDGE_EPSILON, 0, 0, 0);
    b.edge(6, 2, EDGE_EPSILON, 0, 0, 0);
    b.edge(6, 4, EDGE_EPSILON, 0, 0, 0);
    b.edge(0, 7, EDGE_EPSILON, 0, 0, 0);
    b.edge(7, 8, EDGE_RANGE, 'a' as u32, 'z' as u32, 0);
    b.edge(8, 9, EDGE_EPSILON, 0, 0, 0);
    b.edge(9, 7, EDGE_EPSILON, 0, 0, 0);
    b.edge(9, 10, EDGE_EPSILON, 0, 0, 0);
    b.edge(10, 1, EDGE_EPSILON, 0, 0, 0);
    b.edge(2, 11, EDGE_EPSILON, 0, 0, 0);
    b.edge(11, 12, EDGE_RANGE, '0' as u32, '9' as u32, 0);
    b.edge(12, 13, EDGE_EPSILON, 0, 0, 0);
    b.edge(13, 11, EDGE_EPSILON, 0, 0, 0);
    b.edge(13, 14, EDGE_EPSILON, 0, 0, 0);
    b.edge(14, 3, EDGE_EPSILON, 0, 0, 0);
    b.edge(4, 15, EDGE_EPSILON, 0, 0, 0);
    b.edge(15, 16, EDGE_ATOM, ' ' as u32, 0, 0);
    b.edge(16, 17, EDGE_ACTION, 2, 0, 0);
    b.edge(17, 5, EDGE_EPSILON, 0, 0, 0);
    b.word(3); // decisions
    b.word(9);
    b.word(13);
    b.word(6);
    b.word(1); // lexer actions
    b.word(ACTION_SKIP).word(0).word(0);
    b.bytes
}

/// `s : ID NUM | ID ID ;` over the lexer above.
fn parser_blob() -> Vec<u8> {
    let mut b = Blob::new();
    b.word(1); // parser grammar
    b.word(3); // max token type
    b.word(10); // states
    b.state(STATE_RULE_START, 0); // 0
    b.state(STATE_RULE_STOP, 0); // 1
    b.state(STATE_BLOCK_START, 0).word(3); // 2, end = 3
    b.state(STATE_BLOCK_END, 0); // 3
    b.state(STATE_BASIC, 0); // 4
    b.state(STATE_BASIC, 0); // 5
    b.state(STATE_BASIC, 0); // 6
    b.state(STATE_BASIC, 0); // 7
    b.state(STATE_BASIC, 0); // 8
    b.state(STATE_BASIC, 0); // 9
    b.word(0); // non-greedy
    b.word(1); // rules
    b.word(0).word(1).signed(0).signed(0).word(0);
    b.word(0); // modes
    b.word(0); // sets
    b.word(10); // edges
    b.edge(0, 2, EDGE_EPSILON, 0, 0, 0);
    b.edge(2, 4, EDGE_EPSILON, 0, 0, 0);
    b.edge(2, 7, EDGE_EPSILON, 0, 0, 0);
    b.edge(4, 5, EDGE_ATOM, 1, 0, 0);
    b.edge(5, 6, EDGE_ATOM, 2, 0, 0);
    b.edge(6, 3, EDGE_EPSILON, 0, 0, 0);
    b.edge(7, 8, EDGE_ATOM, 1, 0, 0);
    b.edge(8, 9, EDGE_ATOM, 1, 0, 0);
    b.edge(9, 3, EDGE_EPSILON, 0, 0, 0);
    b.edge(3, 1, EDGE_EPSILON, 0, 0, 0);
    b.word(1); // decisions
    b.word(2);
    b.bytes
}

fn tokenize(text: &str) -> Vec<(i32, String)> {
    let atn = Arc::new(AtnDeserializer::new().deserialize(&lexer_blob()).unwrap());
    let input = InputStream::from_string(text, "<test>");
    let mut lexer = Lexer::new(atn, input);
    let mut out = Vec::new();
    loop {
        let token = lexer.next_token();
        let done = token.token_type == EOF;
        out.push((token.token_type, token.text.clone()));
        if done {
            return out;
        }
    }
}

#[test]
fn tokenizes_identifiers_and_numbers() {
    let tokens = tokenize("ab 12 x");
    assert_eq!(
        tokens,
        vec![
            (1, "ab".to_string()),
            (2, "12".to_string()),
            (1, "x".to_string()),
            (EOF, "<EOF>".to_string()),
        ]
    );
}

#[test]
fn maximal_munch_keeps_long_identifiers_whole() {
    let text = "abcdefghij".repeat(20);
    let tokens = tokenize(&text);
    assert_eq!(tokens.len(), 2);
    assert_eq!(tokens[0].1.len(), 200);
}

#[test]
fn parses_with_deserialized_automata() {
    let lexer_atn = Arc::new(AtnDeserializer::new().deserialize(&lexer_blob()).unwrap());
    let parser_atn = Arc::new(AtnDeserializer::new().deserialize(&parser_blob()).unwrap());
    let input = InputStream::from_string("ab 12", "<test>");
    let lexer = Lexer::new(lexer_atn, input);
    let stream = CommonTokenStream::new(lexer);
    let mut parser = Parser::new(parser_atn, Box::new(stream));
    let tree = parser.parse(0).unwrap();
    assert_eq!(tree.text(), "ab12");
    match tree {
        ParseTree::Rule { alt, .. } => assert_eq!(alt, 1),
        other => panic!("expected a rule tree, got {:?}", other),
    }
}

#[test]
fn parses_second_alternative_on_two_identifiers() {
    let lexer_atn = Arc::new(AtnDeserializer::new().deserialize(&lexer_blob()).unwrap());
    let parser_atn = Arc::new(AtnDeserializer::new().deserialize(&parser_blob()).unwrap());
    let input = InputStream::from_string("ab cd", "<test>");
    let lexer = Lexer::new(lexer_atn, input);
    let stream = CommonTokenStream::new(lexer);
    let mut parser = Parser::new(parser_atn, Box::new(stream));
    let tree = parser.parse(0).unwrap();
    match tree {
        ParseTree::Rule { alt, .. } => assert_eq!(alt, 2),
        other => panic!("expected a rule tree, got {:?}", other),
    }
}

#[test]
fn shared_caches_serve_multiple_parsers() {
    use tarpan::context::PredictionContextCache;
    use tarpan::parser::parser_dfas;
    let lexer_atn = Arc::new(AtnDeserializer::new().deserialize(&lexer_blob()).unwrap());
    let parser_atn = Arc::new(AtnDeserializer::new().deserialize(&parser_blob()).unwrap());
    let dfas = Arc::new(parser_dfas(&parser_atn));
    let cache = Arc::new(PredictionContextCache::new());
    let mut first_states = 0;
    for input_text in ["ab 12", "cd 34"] {
        let input = InputStream::from_string(input_text, "<test>");
        let lexer = Lexer::new(lexer_atn.clone(), input);
        let stream = CommonTokenStream::new(lexer);
        let mut parser = Parser::with_shared(
            parser_atn.clone(),
            dfas.clone(),
            cache.clone(),
            Box::new(stream),
        );
        let tree = parser.parse(0).unwrap();
        match tree {
            ParseTree::Rule { alt, .. } => assert_eq!(alt, 1),
            other => panic!("expected a rule tree, got {:?}", other),
        }
        if first_states == 0 {
            first_states = dfas[0].num_states();
        } else {
            // same lookahead shape, the warm cache added nothing
            assert_eq!(dfas[0].num_states(), first_states);
        }
    }
}

#[test]
fn rejects_foreign_blob() {
    let mut bytes = lexer_blob();
    bytes[0] = 0xEE;
    let err = AtnDeserializer::new().deserialize(&bytes).unwrap_err();
    assert!(err.to_string().contains("version"));
}
