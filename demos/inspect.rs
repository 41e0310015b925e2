//! Print every rule in a rule file with its tags, metadata and strings.
//!
//! ```text
//! RUST_LOG=yarrow=debug cargo run --example inspect -- rules.yar
//! ```

use std::env;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;
use yarrow::Compiler;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let Some(path) = env::args().nth(1) else {
        eprintln!("usage: inspect <rules.yar>");
        return ExitCode::FAILURE;
    };

    let rules = match Compiler::new().add_file(&path) {
        Ok(compiler) => match compiler.compile() {
            Ok(rules) => rules,
            Err(e) => {
                eprintln!("{path}: {e}");
                return ExitCode::FAILURE;
            }
        },
        Err(e) => {
            eprintln!("{path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    for rule in rules.rules() {
        let mut qualifiers = Vec::new();
        if rule.is_private() {
            qualifiers.push("private");
        }
        if rule.is_global() {
            qualifiers.push("global");
        }
        println!("{rule} {qualifiers:?}");

        match (rule.tags(), rule.metadata(), rule.strings()) {
            (Ok(tags), Ok(metadata), Ok(strings)) => {
                println!("  tags: {}", tags.join(" "));
                for (key, value) in metadata.iter() {
                    println!("  meta {key} = {value}");
                }
                for s in strings {
                    println!("  {} = {} [{}]", s.id, s.value, s.modifiers);
                }
            }
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
                eprintln!("  cannot enumerate: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}
