pub mod interface;
pub mod topology;

pub use interface::Interface;
pub use topology::{Adjacency, Endpoint, Link, LinkKind, Node, Role, RouterGraph, Topology};
