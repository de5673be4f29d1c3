//! Build script generating the vtable snippet table
//!
//! Writes `snippet_table.rs` (offsets, and for hosts the encoded image) and,
//! when targeting 32-bit ARM, `snippets.s` which the library links with
//! `global_asm!`.

use std::env;
use std::fs;
use std::path::Path;

#[path = "src/snippet/gen.rs"]
mod gen;

fn main() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src/snippet/gen.rs");

    let arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    let pointer_bytes = env::var("CARGO_CFG_TARGET_POINTER_WIDTH")
        .ok()
        .and_then(|w| w.parse::<u32>().ok())
        .map_or(8, |bits| bits / 8);
    let is_arm = arch == "arm";

    let image = gen::generate(gen::FUNCTION_INDICES, gen::VTABLE_SEGMENTS, pointer_bytes);
    let table = gen::render_table_source(&image, !is_arm);
    fs::write(Path::new(&out_dir).join("snippet_table.rs"), table)
        .expect("Failed to write snippet table");

    if is_arm {
        let vendor = env::var("CARGO_CFG_TARGET_VENDOR").unwrap_or_default();
        let abi = env::var("CARGO_CFG_TARGET_ABI").unwrap_or_default();
        let executor = if abi == "eabihf" {
            gen::Executor::Vfp
        } else {
            gen::Executor::SoftFloat
        };
        let prefix = if vendor == "apple" { "_" } else { "" };
        let asm = gen::render_assembly(gen::FUNCTION_INDICES, gen::VTABLE_SEGMENTS, executor, prefix);
        fs::write(Path::new(&out_dir).join("snippets.s"), asm)
            .expect("Failed to write snippet assembly");
    }
}
