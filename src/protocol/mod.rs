//! JSON-RPC protocol types

mod messages;

pub use messages::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId, is_initialize_request,
};
