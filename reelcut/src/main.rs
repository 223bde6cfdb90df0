use clap::Parser;

fn main() {
    let cli = reelcut::Cli::parse();
    if let Err(err) = reelcut::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
