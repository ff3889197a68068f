use coat::engine::{CoatEngine, Operation};
use coat::vcf_filter::Connector;
use serde::Serialize;
use std::{env, fs};

fn usage() {
    eprintln!(
        "Usage:\n  \
  coat_cli --version\n  \
  coat_cli capabilities\n  \
  coat_cli summary INPUT.vcf[.gz]\n  \
  coat_cli ops INPUT.vcf[.gz] '<operations-json>'\n  \
  coat_cli filter INPUT.vcf[.gz] OUTPUT.vcf COLUMN[:KEY] CONNECTOR VALUE [...]\n  \
  coat_cli tsv INPUT.vcf[.gz] OUTPUT.tsv [EMPTY_VALUE]\n  \
  coat_cli annotate INPUT.vcf[.gz] OUTPUT.vcf [ENDPOINT_URL]\n  \
  coat_cli combine-mist OUTPUT.mist INPUT.mist [INPUT.mist ...]\n\n  \
  CONNECTOR is one of: equals, is-not, contains, matches, differs,\n  \
  more-than, less-than, true, false\n  \
  Tip: pass @file.json instead of inline JSON"
    );
}

fn load_json_arg(value: &str) -> Result<String, String> {
    if let Some(path) = value.strip_prefix('@') {
        fs::read_to_string(path).map_err(|e| format!("Could not read JSON file '{path}': {e}"))
    } else {
        Ok(value.to_string())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Could not serialize JSON output: {e}"))?;
    println!("{text}");
    Ok(())
}

fn parse_connector(text: &str) -> Result<Connector, String> {
    match text.to_ascii_lowercase().as_str() {
        "equals" | "eq" | "=" | "==" => Ok(Connector::Equals),
        "is-not" | "isnot" | "ne" | "!=" => Ok(Connector::IsNot),
        "contains" => Ok(Connector::Contains),
        "matches" => Ok(Connector::Matches),
        "differs" => Ok(Connector::Differs),
        "more-than" | "morethan" | "gt" | ">" => Ok(Connector::MoreThan),
        "less-than" | "lessthan" | "lt" | "<" => Ok(Connector::LessThan),
        "true" => Ok(Connector::True),
        "false" => Ok(Connector::False),
        _ => Err(format!("Unknown connector '{text}'")),
    }
}

/// Splits `COLUMN` or `INFO:KEY` into the AddFilter column/key pair.
fn parse_filter_column(text: &str) -> (String, Option<String>) {
    match text.split_once(':') {
        Some((column, key)) => (column.to_string(), Some(key.to_string())),
        None => (text.to_string(), None),
    }
}

fn load_engine(path: &str) -> Result<CoatEngine, String> {
    let mut engine = CoatEngine::new();
    engine
        .apply(Operation::LoadFile {
            path: path.to_string(),
        })
        .map_err(|e| e.to_string())?;
    Ok(engine)
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().collect();
    if args.len() <= 1 {
        usage();
        return Err("Missing command".to_string());
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("coat_cli {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let command = &args[1];
    match command.as_str() {
        "capabilities" => print_json(&CoatEngine::capabilities()),
        "summary" => {
            if args.len() <= 2 {
                usage();
                return Err("Missing input file".to_string());
            }
            let engine = load_engine(&args[2])?;
            print_json(&engine.summary())
        }
        "ops" => {
            if args.len() <= 3 {
                usage();
                return Err("ops requires: INPUT '<operations-json>'".to_string());
            }
            let json = load_json_arg(&args[3])?;
            let ops: Vec<Operation> =
                serde_json::from_str(&json).map_err(|e| format!("Invalid operations JSON: {e}"))?;
            let mut engine = load_engine(&args[2])?;
            let mut results = Vec::with_capacity(ops.len());
            for op in ops {
                results.push(engine.apply(op).map_err(|e| e.to_string())?);
            }
            print_json(&results)
        }
        "filter" => {
            if args.len() <= 4 || (args.len() - 4) % 3 != 0 {
                usage();
                return Err(
                    "filter requires: INPUT OUTPUT and COLUMN CONNECTOR VALUE triples".to_string(),
                );
            }
            let mut engine = load_engine(&args[2])?;
            for triple in args[4..].chunks(3) {
                let (column, key) = parse_filter_column(&triple[0]);
                engine
                    .apply(Operation::AddFilter {
                        column,
                        key,
                        connector: parse_connector(&triple[1])?,
                        value: triple[2].clone(),
                    })
                    .map_err(|e| e.to_string())?;
            }
            engine
                .apply(Operation::ApplyFilters)
                .map_err(|e| e.to_string())?;
            let result = engine
                .apply(Operation::SaveVcf {
                    path: args[3].clone(),
                    filtered_only: true,
                })
                .map_err(|e| e.to_string())?;
            print_json(&result)
        }
        "tsv" => {
            if args.len() <= 3 {
                usage();
                return Err("tsv requires: INPUT OUTPUT [EMPTY_VALUE]".to_string());
            }
            let mut engine = load_engine(&args[2])?;
            let result = engine
                .apply(Operation::SaveTsv {
                    path: args[3].clone(),
                    empty_value: args.get(4).cloned(),
                    filtered_only: false,
                })
                .map_err(|e| e.to_string())?;
            print_json(&result)
        }
        "annotate" => {
            if args.len() <= 3 {
                usage();
                return Err("annotate requires: INPUT OUTPUT [ENDPOINT_URL]".to_string());
            }
            let mut engine = load_engine(&args[2])?;
            let annotated = engine
                .apply(Operation::Annotate {
                    endpoint: args.get(4).cloned(),
                })
                .map_err(|e| e.to_string())?;
            for warning in &annotated.warnings {
                eprintln!("{warning}");
            }
            let result = engine
                .apply(Operation::SaveVcf {
                    path: args[3].clone(),
                    filtered_only: false,
                })
                .map_err(|e| e.to_string())?;
            print_json(&result)
        }
        "combine-mist" => {
            if args.len() <= 3 {
                usage();
                return Err("combine-mist requires: OUTPUT and at least one INPUT".to_string());
            }
            let mut engine = CoatEngine::new();
            let result = engine
                .apply(Operation::CombineMist {
                    inputs: args[3..].to_vec(),
                    output: args[2].clone(),
                })
                .map_err(|e| e.to_string())?;
            print_json(&result)
        }
        _ => {
            usage();
            Err(format!("Unknown command '{command}'"))
        }
    }
}
