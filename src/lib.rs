// iot-data-bridge: workspace root crate.
//
// The runtime lives in `services/bridge`; shared wire types in
// `crates/bridge-protocol`. This crate exists to host the cross-service
// integration suites under `tests/integration/` and re-exports the protocol
// types they assert against.

pub use bridge_protocol as protocol;
