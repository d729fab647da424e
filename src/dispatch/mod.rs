// Peer-facing side: wire types, transports and the dispatcher main loop.
pub mod channel;
pub mod dispatcher;
pub mod request;
