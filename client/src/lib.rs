//! Terminal client for the chat relay. Speaks the same wire protocol as any
//! other client: NAME first, then TEXT lines, DISCONNECT to leave.

// io
pub mod input_handler;

// client
pub mod client;
