fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the vendored protoc so the build does not depend on a system install
    let protoc = protoc_bin_vendored::protoc_bin_path()?;
    std::env::set_var("PROTOC", protoc);

    println!("cargo:rerun-if-changed=../proto/chunkmesh.proto");

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["../proto/chunkmesh.proto"], &["../proto"])?;

    Ok(())
}
