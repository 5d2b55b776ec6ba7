fn main() {
    #[cfg(feature = "cli")]
    oxipack::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("oxipack: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
