// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
use tonic_build::manual::{Builder, Method, Service};

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Both RPCs carry google.protobuf.Any envelopes, so the service is declared
    // in Rust and no .proto file (or protoc) is needed.
    let service = Service::builder()
        .name("ConnectionService")
        .package("modkit.connection")
        .method(
            // Bidirectional session used by clients and servers
            Method::builder()
                .name("connect_stream")
                .route_name("Connect")
                .input_type("::prost_types::Any")
                .output_type("::prost_types::Any")
                .codec_path("::tonic::codec::ProstCodec")
                .client_streaming()
                .server_streaming()
                .build(),
        )
        .method(
            // Server-streaming feed used by write-less subscribers
            Method::builder()
                .name("publications")
                .route_name("Publications")
                .input_type("::prost_types::Any")
                .output_type("::prost_types::Any")
                .codec_path("::tonic::codec::ProstCodec")
                .server_streaming()
                .build(),
        )
        .build();

    Builder::new().compile(&[service]);
}
