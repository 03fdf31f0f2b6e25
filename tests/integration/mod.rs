pub mod connection_test;
pub mod websocket_test;
