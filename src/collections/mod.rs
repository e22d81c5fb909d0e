//! Containers shared by the keyspace and the connection layer

mod dict;
mod list;

#[cfg(test)]
mod dict_proptest;

pub use dict::{Dict, DictError, Iter as DictIter, FORCE_RATIO, INITIAL_SIZE};
pub use list::{Iter as ListIter, List, NodeId};
