fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    // Pass through AWARENESS_GIT_HASH from a packaging environment without a .git directory
    println!("cargo:rerun-if-env-changed=AWARENESS_GIT_HASH");
    if let Ok(hash) = std::env::var("AWARENESS_GIT_HASH") {
        println!("cargo:rustc-env=AWARENESS_GIT_HASH={}", hash);
    }
}
