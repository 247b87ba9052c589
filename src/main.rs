use clap::Parser;
use lunar_logo::runtime::{Interpreter, RuntimeError, RuntimeResult, ScopeRef};

#[derive(Debug, Parser)]
#[command(
    name = "lunar",
    version,
    about = "Lunar Logo: clean, minimal scripting language based on Logo and Lua"
)]
struct Cli {
    /// Logo code, one word per argument; `load <file>` runs a script file
    #[arg(value_name = "CODE", trailing_var_arg = true, allow_hyphen_values = true)]
    words: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    if cli.words.is_empty() {
        print_usage();
        return;
    }
    if let Err(err) = run_words(&cli.words) {
        report_runtime_error(&err);
        std::process::exit(1);
    }
}

fn run_words(words: &[String]) -> RuntimeResult<()> {
    let mut interpreter = Interpreter::new();
    let toplevel = ScopeRef::root();
    let code = interpreter.parse_words(words.iter().map(String::as_str))?;
    for value in interpreter.results(&code, &toplevel)? {
        println!("{value}");
    }
    Ok(())
}

fn print_usage() {
    println!("Lunar Logo {}", env!("CARGO_PKG_VERSION"));
    println!("Usage:\n\tlunar [logo code...]\n\tlunar load <filename>");
}

fn report_runtime_error(error: &RuntimeError) {
    eprintln!("{error}");
}
