fn main() {
    if let Err(error) = token_scanner_lib::run() {
        eprintln!("token-scanner: {error}");
        std::process::exit(1);
    }
}
