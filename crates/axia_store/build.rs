use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=schema_manifest.json");
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));
    let manifest = fs::read_to_string("schema_manifest.json").expect("read schema_manifest.json");
    fs::write(out_dir.join("schema_manifest.json"), manifest).expect("copy schema manifest");
}
