// Generates the MoneyMovementService server and client from a Rust-side
// service definition. Message types live in src/proto.rs.
fn main() {
    let service = tonic_build::manual::Service::builder()
        .name("MoneyMovementService")
        .package("money_movement")
        .method(
            tonic_build::manual::Method::builder()
                .name("authorize")
                .route_name("Authorize")
                .input_type("crate::proto::AuthorizePayload")
                .output_type("crate::proto::AuthorizeResponse")
                .codec_path("tonic_prost::ProstCodec")
                .build(),
        )
        .method(
            tonic_build::manual::Method::builder()
                .name("capture")
                .route_name("Capture")
                .input_type("crate::proto::CapturePayload")
                .output_type("crate::proto::Empty")
                .codec_path("tonic_prost::ProstCodec")
                .build(),
        )
        .build();

    tonic_build::manual::Builder::new().compile(&[service]);
}
