fn main() {
    if let Err(e) = portcomm_lib::run() {
        eprintln!("portcomm: {e}");
        std::process::exit(1);
    }
}
