// ABOUTME: Build script for compile-time validation
// ABOUTME: Warns when the binary is built without any voice transport

fn main() {
    if !cfg!(feature = "discord") {
        println!(
            "cargo::warning=No transport feature enabled. \
             The binary will resolve accounts but cannot connect. Enable: discord"
        );
    }
}
