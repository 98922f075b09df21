use std::{env, path::PathBuf};

const PROTOS: &[&str] = &["proto/loco/v1/loco.proto"];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Don't depend on a protoc installed on the host.
    if env::var_os("PROTOC").is_none() {
        env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    let include = protoc_bin_vendored::include_path()?;
    let out = PathBuf::from(env::var("OUT_DIR")?);
    tonic_build::configure()
        .build_client(false)
        .build_server(true)
        .file_descriptor_set_path(out.join("loco_descriptor.bin"))
        .compile_protos(PROTOS, &[PathBuf::from("proto"), include])?;

    for proto in PROTOS {
        println!("cargo:rerun-if-changed={proto}");
    }
    Ok(())
}
