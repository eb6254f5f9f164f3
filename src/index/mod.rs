pub mod arena;
pub mod node;
pub mod tree;

pub use node::NodeId;
pub use tree::BPlusTree;
