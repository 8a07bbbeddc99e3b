fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Compile proto files for the services netds connects to:
    // - gnmi.proto: southbound device sessions (Get, Set, Subscribe)
    // - schema.proto: schema server (config/state classification)
    tonic_build::configure()
        .build_server(false) // Client only
        .build_client(true)
        .compile_protos(&["proto/gnmi.proto", "proto/schema.proto"], &["proto"])?;
    Ok(())
}
