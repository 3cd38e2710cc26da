fn main() {
    // cfg.toml が無い場合は toml-cfg の #[default] 値でビルドされる
    if !std::path::Path::new("cfg.toml").exists() {
        println!("cargo:warning=cfg.toml not found, building with default settings (see cfg.toml.example)");
    }
    println!("cargo:rerun-if-changed=cfg.toml");

    #[cfg(feature = "esp")]
    embuild::espidf::sysenv::output();
}
