//! Generates the protobuf messages and gRPC services from `proto/`.
//!
//! `protoc` comes from `protoc-bin-vendored`, so no system install is needed.

const PROTOS: &[&str] = &[
    "proto/ipc.proto",
    "proto/kafka.proto",
    "proto/telemetry.proto",
    "proto/flowdocument.proto",
    "proto/mdt_dialout.proto",
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    let well_known = protoc_bin_vendored::include_path()?;

    for proto in PROTOS {
        println!("cargo:rerun-if-changed={proto}");
    }

    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_protos(PROTOS, &[std::path::Path::new("proto"), well_known.as_path()])?;
    Ok(())
}
