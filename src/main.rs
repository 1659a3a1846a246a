use aetherion_core::cli::CliOverrides;
use aetherion_core::run_with_overrides;

fn main() {
    let cli = match CliOverrides::parse_from_env() {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("[cli] {err}");
            std::process::exit(2);
        }
    };
    let config_path = cli.config_path().cloned();
    if let Err(err) = run_with_overrides(config_path.as_deref(), cli.into_config_overrides()) {
        eprintln!("Application error: {err:?}");
        std::process::exit(1);
    }
}
