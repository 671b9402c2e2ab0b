//! autotest CLI entry point

fn main() {
    autotest::cli::run();
}
