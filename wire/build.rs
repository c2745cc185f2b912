//! Compiles `proto/opamp.proto` into Rust types via `prost-build`.
//!
//! Mirrors the code-generation split the upstream OpAMP client tooling uses
//! (a dedicated `prost-build` pass feeding a hand-written client/codec
//! layer) instead of shelling out to an external protoc-consuming process.

fn main() {
    println!("cargo:rerun-if-changed=proto/opamp.proto");
    prost_build::compile_protos(&["proto/opamp.proto"], &["proto/"])
        .expect("failed to compile opamp.proto");
}
