fn main() {
    if let Err(err) = cli_gpt::cli::main() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
