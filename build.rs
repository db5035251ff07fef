use std::error::Error;
use std::path::PathBuf;
use walkdir::WalkDir;

fn main() -> Result<(), Box<dyn Error>> {
    let proto_root = PathBuf::from("protos");
    let protos: Vec<PathBuf> = WalkDir::new(&proto_root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().map_or(false, |ext| ext == "proto"))
        .collect();

    for proto in &protos {
        println!("cargo:rerun-if-changed={}", proto.display());
    }

    let mut includes = vec![proto_root.clone()];

    // Fall back to a bundled protoc so the crate builds without one installed.
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
        includes.push(protoc_bin_vendored::include_path()?);
    }

    tonic_build::configure()
        .build_server(true)
        .type_attribute(".", "#[derive(serde::Serialize)]")
        .compile_protos(&protos, &includes)?;
    Ok(())
}
