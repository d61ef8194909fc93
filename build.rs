//! Build script for the test fixture model
//!
//! Compiles test/fixtures/model.c into a shared library with the host C
//! compiler so the integration tests can load a real library from disk.
//! The library path is exported as BMI_FIXTURE_LIB; it is empty when no
//! compiler is available and the fixture tests skip themselves.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=test/fixtures/model.c");

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let target = env::var("TARGET").unwrap_or_default();

    let library = if target.contains("windows") {
        None
    } else {
        build_fixture(&out_dir, &target)
    };

    let path = library
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    println!("cargo:rustc-env=BMI_FIXTURE_LIB={}", path);
}

/// Compile the fixture model. Returns the library path on success.
fn build_fixture(out_dir: &Path, target: &str) -> Option<PathBuf> {
    let fixture_dir = out_dir.join("fixture");
    if let Err(e) = std::fs::create_dir_all(&fixture_dir) {
        println!("cargo:warning=Cannot create {}: {}", fixture_dir.display(), e);
        return None;
    }

    let filename = if target.contains("apple") {
        "libmodel.dylib"
    } else {
        "libmodel.so"
    };
    let library = fixture_dir.join(filename);

    let compiler = match cc::Build::new().cargo_metadata(false).try_get_compiler() {
        Ok(compiler) => compiler,
        Err(e) => {
            println!("cargo:warning=No C compiler, fixture model tests are skipped: {}", e);
            return None;
        }
    };

    let mut cmd: Command = compiler.to_command();
    cmd.args(["-shared", "-fPIC", "-O1", "-o"])
        .arg(&library)
        .arg("test/fixtures/model.c");

    match cmd.status() {
        Ok(status) if status.success() => Some(library),
        Ok(status) => {
            println!("cargo:warning=Fixture model build failed: {}", status);
            None
        }
        Err(e) => {
            println!("cargo:warning=Fixture model build failed: {}", e);
            None
        }
    }
}
