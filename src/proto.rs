//! Wire messages for `money_movement.MoneyMovementService`.
//!
//! Field numbers follow `proto/money_movement.proto`. The server and client
//! stubs are generated by `build.rs`.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuthorizePayload {
    #[prost(string, tag = "1")]
    pub customer_wallet_user_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub merchant_wallet_user_id: ::prost::alloc::string::String,
    #[prost(int64, tag = "3")]
    pub cents: i64,
    #[prost(string, tag = "4")]
    pub currency: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuthorizeResponse {
    #[prost(string, tag = "1")]
    pub pid: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CapturePayload {
    #[prost(string, tag = "1")]
    pub pid: ::prost::alloc::string::String,
}

/// Same encoding as `google.protobuf.Empty`
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Empty {}

include!(concat!(env!("OUT_DIR"), "/money_movement.MoneyMovementService.rs"));
