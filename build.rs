fn main() {
    // Build date is advertised to publishers in the subscription
    // connection string's assemblyInfo block.
    println!(
        "cargo:rustc-env=GEP_BUILD_DATE={}",
        chrono::Utc::now().format("%Y-%m-%d")
    );
    println!("cargo:rerun-if-changed=build.rs");
}
