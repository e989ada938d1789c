use std::{
    env,
    io::{self, Write},
    path::Path,
    process::Command,
};

fn xcrun(args: &[&str], what: &str) {
    let output = Command::new("xcrun")
        .args(["-sdk", "macosx"])
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Building {} failed: {}", what, e));
    io::stdout().write_all(&output.stdout).unwrap();
    io::stderr().write_all(&output.stderr).unwrap();
    assert!(output.status.success(), "Building {} failed", what);
}

fn build_metal_kernel(path: &str, out_dir: &Path) {
    println!("cargo::rerun-if-changed={}", path);
    let stem = Path::new(path).file_stem().unwrap().to_str().unwrap();
    let air = out_dir.join(format!("{}.air", stem));
    let metallib = out_dir.join(format!("{}.metallib", stem));
    xcrun(
        &["metal", "-c", path, "-o", air.to_str().unwrap()],
        "metal air",
    );
    xcrun(
        &["metallib", air.to_str().unwrap(), "-o", metallib.to_str().unwrap()],
        "metallib",
    );
}

fn main() {
    println!("cargo::rerun-if-changed=build.rs");
    // Only the Metal backend has shaders to compile.
    if env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("macos") {
        return;
    }
    let out_dir = env::var("OUT_DIR").unwrap();
    build_metal_kernel("src/device/gpu/histogram.metal", Path::new(&out_dir));
}
