// One activation per RPC namespace. The hierarchy store is the only one.
pub mod hierarchy;
