fn main() {
    println!("cargo:rerun-if-changed=proto/generic_message.proto");

    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path().unwrap());

    prost_build::Config::new()
        .compile_protos(&["proto/generic_message.proto"], &["proto/"])
        .expect("failed to compile generic_message.proto");
}
