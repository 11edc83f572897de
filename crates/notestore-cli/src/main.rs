#![forbid(unsafe_code)]

fn main() {
    std::process::exit(notestore_cli::run());
}
