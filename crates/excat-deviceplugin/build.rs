//! Generates the kubelet device plugin v1beta1 service stubs.
//!
//! The protobuf messages are declared by hand in `src/api.rs`; only the
//! service glue is generated here, so no `protoc` is required.

use tonic_build::manual::{Builder, Method, Service};

const PACKAGE: &str = "v1beta1";
const CODEC: &str = "tonic::codec::ProstCodec";

fn method(name: &str, route: &str, input: &str, output: &str) -> tonic_build::manual::MethodBuilder {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::api::{}", input))
        .output_type(format!("crate::api::{}", output))
        .codec_path(CODEC)
}

fn main() {
    let registration = Service::builder()
        .name("Registration")
        .package(PACKAGE)
        .method(method("register", "Register", "RegisterRequest", "Empty").build())
        .build();

    let device_plugin = Service::builder()
        .name("DevicePlugin")
        .package(PACKAGE)
        .method(
            method(
                "get_device_plugin_options",
                "GetDevicePluginOptions",
                "Empty",
                "DevicePluginOptions",
            )
            .build(),
        )
        .method(
            method("list_and_watch", "ListAndWatch", "Empty", "ListAndWatchResponse")
                .server_streaming()
                .build(),
        )
        .method(
            method(
                "get_preferred_allocation",
                "GetPreferredAllocation",
                "PreferredAllocationRequest",
                "PreferredAllocationResponse",
            )
            .build(),
        )
        .method(method("allocate", "Allocate", "AllocateRequest", "AllocateResponse").build())
        .method(
            method(
                "pre_start_container",
                "PreStartContainer",
                "PreStartContainerRequest",
                "PreStartContainerResponse",
            )
            .build(),
        )
        .build();

    Builder::new().compile(&[registration, device_plugin]);
    println!("cargo:rerun-if-changed=build.rs");
}
