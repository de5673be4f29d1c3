//! Snippet image generator
//!
//! Compiled twice: by `build.rs` to produce the precompiled table, and into
//! the library so that the index formula and limits have one definition.
//!
//! Every snippet is four ARM words:
//!
//! ```text
//! mov  ip, pc              @ ip = address of the two data words
//! b    executor
//! .long function_index     @ high bit set: hidden return pointer
//! .long vtable_offset      @ byte offset of the vtable inside the proxy
//! ```

#![allow(dead_code)]

use std::fmt::Write;

/// Number of function indices covered by the table
pub const FUNCTION_INDICES: u32 = 128;

/// Number of vtable segments covered by the table
pub const VTABLE_SEGMENTS: u32 = 4;

/// Bytes per snippet
pub const SNIPPET_SIZE: u32 = 16;

/// Byte offset of the data words inside a snippet
pub const SNIPPET_DATA_OFFSET: u32 = 8;

/// Function-index flag for calls that pass a hidden return pointer
pub const HIDDEN_RETURN_FLAG: u32 = 0x8000_0000;

/// Symbol of the first snippet
pub const TABLE_SYMBOL: &str = "uno_bridge_snippets";

/// Symbol of the dispatcher entry the executor calls
pub const ENTRY_SYMBOL: &str = "cpp_vtable_call";

const MOV_IP_PC: u32 = 0xE1A0_C00F;
const BX_LR: u32 = 0xE12F_FF1E;

/// Table index of a (function index, vtable segment, hidden return) triple.
#[inline]
pub fn snippet_index(function_index: u32, segment: u32, hidden: bool, segments: u32) -> usize {
    (function_index as usize * segments as usize + segment as usize) * 2 + hidden as usize
}

/// First data word of a snippet
#[inline]
pub fn function_word(function_index: u32, hidden: bool) -> u32 {
    if hidden {
        function_index | HIDDEN_RETURN_FLAG
    } else {
        function_index
    }
}

/// ARM `b` from the instruction at `from` to `to`
pub fn encode_branch(from: u32, to: u32) -> u32 {
    let delta = (i64::from(to) - (i64::from(from) + 8)) >> 2;
    0xEA00_0000 | (delta as u32 & 0x00FF_FFFF)
}

/// Flavour of the shared executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Executor {
    /// Core registers only
    SoftFloat,
    /// Also spills `d0`-`d7` below the core registers, and reloads
    /// `d0`-`d3` from that area on return
    Vfp,
}

/// Encoded table for hosts that cannot execute ARM code.
pub struct SnippetImage {
    /// Machine words, snippets first, executor last
    pub words: Vec<u32>,
    /// Byte offset of every snippet, by table index
    pub offsets: Vec<u32>,
    /// Byte offset of the executor
    pub executor_offset: u32,
}

/// Build the encoded table. `pointer_size` scales the vtable offsets.
pub fn generate(function_indices: u32, segments: u32, pointer_size: u32) -> SnippetImage {
    let count = function_indices * segments * 2;
    let executor_offset = count * SNIPPET_SIZE;
    let mut words = Vec::with_capacity(count as usize * 4 + 1);
    let mut offsets = Vec::with_capacity(count as usize);

    for function_index in 0..function_indices {
        for segment in 0..segments {
            for hidden in [false, true] {
                let at = snippet_index(function_index, segment, hidden, segments) as u32 * SNIPPET_SIZE;
                debug_assert_eq!(at as usize, words.len() * 4);
                offsets.push(at);
                words.push(MOV_IP_PC);
                words.push(encode_branch(at + 4, executor_offset));
                words.push(function_word(function_index, hidden));
                words.push(segment * pointer_size);
            }
        }
    }
    words.push(BX_LR);

    SnippetImage {
        words,
        offsets,
        executor_offset,
    }
}

/// ARM assembly for the table and its executor.
///
/// `prefix` is prepended to global symbols (`"_"` on Mach-O).
pub fn render_assembly(function_indices: u32, segments: u32, executor: Executor, prefix: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "    .text");
    let _ = writeln!(out, "    .arm");
    let _ = writeln!(out, "    .p2align 2");
    let _ = writeln!(out, "    .globl {}{}", prefix, TABLE_SYMBOL);
    let _ = writeln!(out, "{}{}:", prefix, TABLE_SYMBOL);

    for function_index in 0..function_indices {
        for segment in 0..segments {
            for hidden in [false, true] {
                let _ = writeln!(out, "    mov ip, pc");
                let _ = writeln!(out, "    b uno_bridge_snippet_executor");
                let _ = writeln!(out, "    .long 0x{:08x}", function_word(function_index, hidden));
                let _ = writeln!(out, "    .long {}", segment * 4);
            }
        }
    }

    let _ = writeln!(out, "uno_bridge_snippet_executor:");
    let _ = writeln!(out, "    stmfd sp!, {{r0-r3}}");
    match executor {
        Executor::SoftFloat => {
            let _ = writeln!(out, "    mov r0, ip");
            let _ = writeln!(out, "    mov r1, sp");
            let _ = writeln!(out, "    stmfd sp!, {{r4, lr}}");
            let _ = writeln!(out, "    bl {}{}", prefix, ENTRY_SYMBOL);
            let _ = writeln!(out, "    ldmfd sp!, {{r4, lr}}");
            let _ = writeln!(out, "    add sp, sp, #16");
        }
        Executor::Vfp => {
            let _ = writeln!(out, "    vpush {{d0-d7}}");
            let _ = writeln!(out, "    mov r0, ip");
            let _ = writeln!(out, "    add r1, sp, #64");
            let _ = writeln!(out, "    stmfd sp!, {{r4, lr}}");
            let _ = writeln!(out, "    bl {}{}", prefix, ENTRY_SYMBOL);
            let _ = writeln!(out, "    ldmfd sp!, {{r4, lr}}");
            let _ = writeln!(out, "    vldmia sp, {{d0-d3}}");
            let _ = writeln!(out, "    add sp, sp, #80");
        }
    }
    let _ = writeln!(out, "    bx lr");
    out
}

/// Rust source of the generated table module.
///
/// The image is only emitted for hosts; ARM builds link the assembly.
pub fn render_table_source(image: &SnippetImage, with_image: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "// @generated by build.rs");
    let _ = writeln!(
        out,
        "pub(crate) static SNIPPET_OFFSETS: [u32; {}] = [",
        image.offsets.len()
    );
    for chunk in image.offsets.chunks(16) {
        let line: Vec<String> = chunk.iter().map(|o| o.to_string()).collect();
        let _ = writeln!(out, "    {},", line.join(", "));
    }
    let _ = writeln!(out, "];");
    if with_image {
        let _ = writeln!(
            out,
            "pub(crate) static SNIPPET_IMAGE: [u32; {}] = [",
            image.words.len()
        );
        for chunk in image.words.chunks(8) {
            let line: Vec<String> = chunk.iter().map(|w| format!("0x{:08x}", w)).collect();
            let _ = writeln!(out, "    {},", line.join(", "));
        }
        let _ = writeln!(out, "];");
    }
    out
}
