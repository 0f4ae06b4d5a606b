use clap::Parser as ClapParser;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tarpan::atn::deserializer::AtnDeserializer;
use tarpan::atn::Atn;
use tarpan::error::RecognitionError;
use tarpan::lexer::Lexer;
use tarpan::parser::{ParseTree, Parser};
use tarpan::stream::{CommonTokenStream, InputStream, TokenSource};
use tarpan::token::EOF;

/// Recognize an input file with serialized automatons
///
/// Loads the serialized lexer automaton produced by the offline tool,
/// tokenizes the input and prints the tokens as JSON. With a parser
/// automaton and a start rule it parses as well and prints the tree.
#[derive(Debug, ClapParser)]
#[command(author, version, about, long_about)]
struct Args {
    /// Path to the serialized lexer automaton
    lexer_atn: PathBuf,
    /// Path to the input file (UTF-8)
    input: PathBuf,
    /// Path to the serialized parser automaton
    #[arg(long)]
    parser_atn: Option<PathBuf>,
    /// Start rule index for parsing
    #[arg(long, default_value_t = 0)]
    rule: usize,
    /// Dump the warmed lexer DFAs as graphviz dot to stderr after the run
    #[arg(long)]
    dump_dfa: bool,
}

#[derive(Serialize)]
struct TokenOut {
    #[serde(rename = "type")]
    token_type: i32,
    text: String,
    channel: usize,
    line: u32,
    column: u32,
}

#[derive(Serialize)]
#[serde(untagged)]
enum TreeOut {
    Leaf {
        token: String,
    },
    Rule {
        rule: usize,
        children: Vec<TreeOut>,
    },
}

fn tree_out(tree: &ParseTree) -> TreeOut {
    match tree {
        ParseTree::Terminal(token) | ParseTree::Error(token) => TreeOut::Leaf {
            token: token.text.clone(),
        },
        ParseTree::Rule {
            rule_index,
            children,
            ..
        } => TreeOut::Rule {
            rule: *rule_index,
            children: children.iter().map(tree_out).collect(),
        },
    }
}

fn load_atn(path: &PathBuf) -> Result<Arc<Atn>, RecognitionError> {
    let bytes = std::fs::read(path)?;
    Ok(Arc::new(AtnDeserializer::new().deserialize(&bytes)?))
}

fn run(args: &Args) -> Result<(), RecognitionError> {
    let lexer_atn = load_atn(&args.lexer_atn)?;
    let file = std::fs::File::open(&args.input)?;
    let input = InputStream::from_reader(file, &args.input.display().to_string())?;
    let mut lexer = Lexer::new(lexer_atn, input);
    let lexer_dfas = lexer.sim_dfas();
    match &args.parser_atn {
        None => {
            let mut tokens = Vec::new();
            loop {
                let token = lexer.next_token();
                let done = token.token_type == EOF;
                tokens.push(TokenOut {
                    token_type: token.token_type,
                    text: token.text,
                    channel: token.channel,
                    line: token.line,
                    column: token.column,
                });
                if done {
                    break;
                }
            }
            println!(
                "{}",
                serde_json::to_string(&tokens).expect("token list serializes")
            );
        }
        Some(parser_atn) => {
            let parser_atn = load_atn(parser_atn)?;
            let stream = CommonTokenStream::new(lexer);
            let mut parser = Parser::new(parser_atn, Box::new(stream));
            let tree = parser.parse(args.rule)?;
            println!(
                "{}",
                serde_json::to_string(&tree_out(&tree)).expect("tree serializes")
            );
        }
    }
    if args.dump_dfa {
        for dfa in lexer_dfas.iter() {
            eprintln!("{}", dfa.to_dot());
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
