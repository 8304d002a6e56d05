fn main() {
    // Host builds (unit tests, simulation) have no ESP-IDF environment to export.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }

    for var in ["CARDIAC_API_URL", "CARDIAC_API_KEY"] {
        println!("cargo:rerun-if-env-changed={var}");
    }
}
